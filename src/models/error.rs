use derive_more::Display;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Display, Clone, PartialEq)]
pub enum SError {
    #[display("Parse error: {_0}")]
    ParseError(String),
    #[display("IO error: {_0}")]
    IOError(String),
    #[display("Network error: {_0}")]
    Network(String),
    #[display("HTTP Error: {_0}")]
    HttpStatus(u16),
    #[display("Extraction failed: {_0}")]
    Extraction(String),
    #[display("Mod not found: {_0}")]
    ModNotFound(String),
    #[display("Download not found: {_0}")]
    TransferNotFound(String),
    #[display("Game path not configured")]
    GamePathNotConfigured,
    #[display("No usable files found in {_0}")]
    NoUsableFiles(String),
    #[display("No download files found for this mod.")]
    NoDownloadAvailable,
    #[display("Game is already running")]
    GameRunning,
    #[display("Process launch failed: {_0}")]
    Launch(String),
    #[display("Unexpected error: {_0:?}")]
    Unexpected(Option<String>),
}

impl std::error::Error for SError {}

impl From<std::io::Error> for SError {
    fn from(e: std::io::Error) -> Self {
        SError::IOError(e.to_string())
    }
}

impl From<serde_json::Error> for SError {
    fn from(e: serde_json::Error) -> Self {
        SError::ParseError(e.to_string())
    }
}

impl From<zip::result::ZipError> for SError {
    fn from(e: zip::result::ZipError) -> Self {
        SError::Extraction(e.to_string())
    }
}

impl From<reqwest::Error> for SError {
    fn from(e: reqwest::Error) -> Self {
        SError::Network(e.to_string())
    }
}

impl From<walkdir::Error> for SError {
    fn from(e: walkdir::Error) -> Self {
        SError::IOError(e.to_string())
    }
}

impl From<std::path::StripPrefixError> for SError {
    fn from(e: std::path::StripPrefixError) -> Self {
        SError::ParseError(e.to_string())
    }
}
