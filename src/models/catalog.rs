use derive_more::Display;
use serde::{Deserialize, Serialize};

/// Mod metadata as handed over by the remote catalog.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct CatalogMod {
    #[serde(rename = "gameBananaId")]
    pub catalog_id: u64,
    pub name: String,
    pub author: String,
    pub version: String,
    pub description: String,
    pub category: Option<String>,
    pub icon_url: Option<String>,
    pub images: Vec<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveLocation {
    pub download_url: String,
    pub display_name: String,
    pub author_name: String,
    pub version: String,
    pub file_id: u64,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CatalogRelease {
    pub version: String,
    pub file_id: u64,
    pub download_url: String,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Display, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    #[display("info")]
    Info,
    #[display("success")]
    Success,
    #[display("warning")]
    Warning,
    #[display("error")]
    Error,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Notification {
    pub level: NotificationLevel,
    pub message: String,
}

impl Notification {
    pub fn new(level: NotificationLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
        }
    }
}
