use camino::Utf8PathBuf;
use derive_more::Display;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Display, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransferState {
    #[display("queued")]
    Queued,
    #[display("progressing")]
    Progressing,
    #[display("paused")]
    Paused,
    #[display("completed")]
    Completed,
    #[display("failed")]
    Failed,
    #[display("cancelled")]
    Cancelled,
}

impl TransferState {
    /// States swept by `clear_finished`.
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    pub fn can_resume(self) -> bool {
        matches!(self, Self::Paused | Self::Failed)
    }
}

/// What a transfer was started for, carried untouched for correlation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TransferContext {
    #[serde(rename_all = "camelCase")]
    Install { catalog_id: u64 },
    #[serde(rename_all = "camelCase")]
    Update { mod_id: String },
    #[serde(rename = "ue4ssInstall")]
    LoaderInstall,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Transfer {
    pub id: String,
    pub url: String,
    pub filename: String,
    pub save_path: Utf8PathBuf,
    pub total_bytes: u64,
    pub received_bytes: u64,
    pub state: TransferState,
    /// Bytes per second over the last sampling window.
    pub speed: f64,
    /// 0-100.
    pub progress: f64,
    pub started_at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<TransferContext>,
}

impl Transfer {
    pub fn new(
        id: String,
        url: String,
        filename: String,
        save_path: Utf8PathBuf,
        context: Option<TransferContext>,
    ) -> Self {
        Self {
            id,
            url,
            filename,
            save_path,
            total_bytes: 0,
            received_bytes: 0,
            state: TransferState::Queued,
            speed: 0.0,
            progress: 0.0,
            started_at: unix_millis(),
            error: None,
            context,
        }
    }

    pub fn record_chunk(&mut self, len: u64) {
        self.received_bytes += len;
        self.refresh_progress();
    }

    pub fn refresh_progress(&mut self) {
        self.progress = if self.total_bytes > 0 {
            self.received_bytes as f64 / self.total_bytes as f64 * 100.0
        } else {
            0.0
        };
    }

    /// Marks success. The byte count is left as received.
    pub fn complete(&mut self) {
        self.state = TransferState::Completed;
        self.progress = 100.0;
        self.speed = 0.0;
        self.error = None;
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.state = TransferState::Failed;
        self.speed = 0.0;
        self.error = Some(error.into());
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum TransferEventKind {
    Completed,
    Failed { error: String },
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TransferEvent {
    pub id: String,
    #[serde(flatten)]
    pub kind: TransferEventKind,
}

pub fn unix_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
