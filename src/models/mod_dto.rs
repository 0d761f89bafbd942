use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

/// A mod present in the registry. Persisted as one entry of `mods.json`.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct InstalledMod {
    pub id: String,
    #[serde(rename = "gameBananaId", skip_serializing_if = "Option::is_none")]
    pub catalog_id: Option<u64>,
    pub name: String,
    pub author: String,
    pub version: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub file_size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
    pub images: Vec<String>,
    pub is_enabled: bool,
    pub priority: i64,
    /// Absolute paths written by the last deployment; the undo list.
    pub deployed_files: Vec<Utf8PathBuf>,
    pub folder_path: Utf8PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_file_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_file_url: Option<String>,
    pub has_update: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ue4ss_mod_name: Option<String>,
}

impl InstalledMod {
    /// Category used for conflict detection; blank categories never conflict.
    pub fn conflict_category(&self) -> Option<&str> {
        self.category
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PriorityDirection {
    Up,
    Down,
}

/// Result shape every boundary operation returns instead of an error.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ActionResult {
    pub success: bool,
    pub message: String,
}

impl ActionResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ToggleResult {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflict: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOutcome {
    pub mod_id: String,
    pub success: bool,
    pub message: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSummary {
    pub success_count: usize,
    pub fail_count: usize,
    pub results: Vec<UpdateOutcome>,
}
