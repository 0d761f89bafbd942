//! Collaborators the core talks to but does not own.

use crate::models::catalog::{ArchiveLocation, CatalogRelease, Notification, NotificationLevel};
use crate::models::error::SError;
use async_trait::async_trait;
use camino::Utf8Path;
use tracing::{error, info, warn};

/// Remote mod catalog.
#[async_trait]
pub trait ModCatalog: Send + Sync {
    /// Where to download the archive of a catalog entry. `None` when the
    /// entry has no downloadable file.
    async fn fetch_archive_location(&self, catalog_id: u64) -> Result<Option<ArchiveLocation>, SError>;

    async fn fetch_latest_release(&self, catalog_id: u64) -> Result<Option<CatalogRelease>, SError>;
}

#[async_trait]
pub trait ArchiveExtractor: Send + Sync {
    /// Unpacks `archive` into `destination`. Fails on corrupt or
    /// unsupported archives.
    async fn extract(&self, archive: &Utf8Path, destination: &Utf8Path) -> Result<(), SError>;
}

#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    async fn launch(&self, executable: &Utf8Path, args: &[String]) -> Result<(), SError>;
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Sends notifications to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, n: Notification) {
        match n.level {
            NotificationLevel::Error => error!(target: "notify", "{}", n.message),
            NotificationLevel::Warning => warn!(target: "notify", "{}", n.message),
            NotificationLevel::Info | NotificationLevel::Success => info!(target: "notify", "{}", n.message),
        }
    }
}

/// Spawns the executable detached, working directory set to its folder.
#[derive(Debug, Default, Clone, Copy)]
pub struct CommandLauncher;

#[async_trait]
impl ProcessLauncher for CommandLauncher {
    async fn launch(&self, executable: &Utf8Path, args: &[String]) -> Result<(), SError> {
        let mut cmd = tokio::process::Command::new(executable);
        cmd.args(args);
        if let Some(dir) = executable.parent() {
            cmd.current_dir(dir);
        }

        let child = cmd
            .spawn()
            .map_err(|e| SError::Launch(format!("{executable}: {e}")))?;

        info!("Launched {executable} (pid {:?})", child.id());
        Ok(())
    }
}
