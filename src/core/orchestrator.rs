use crate::config::SettingsService;
use crate::core::decompression::ZipExtractor;
use crate::core::mod_manager::ModManager;
use crate::core::ports::{
    ArchiveExtractor, CommandLauncher, ModCatalog, Notifier, ProcessLauncher, TracingNotifier,
};
use crate::core::transfer::TransferEngine;
use crate::models::catalog::{ArchiveLocation, CatalogMod, Notification, NotificationLevel};
use crate::models::error::SError;
use crate::models::mod_dto::{ActionResult, UpdateOutcome, UpdateSummary};
use crate::models::paths::GamePathRules;
use crate::models::transfer::{TransferContext, TransferEvent, TransferEventKind, TransferState};
use crate::utils::process::ProcessChecker;
use camino::{Utf8Path, Utf8PathBuf};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use sysinfo::System;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, error, info, instrument, warn};

const LAUNCH_FLAG: &str = "-fileopenlog";
const LOADER_ARCHIVE: &str = "ue4ss.zip";

/// What to do once a transfer finishes.
#[derive(Debug, Clone)]
enum PendingAction {
    Install {
        catalog_mod: CatalogMod,
        location: ArchiveLocation,
    },
    Update {
        mod_id: String,
    },
    LoaderInstall,
}

/// A started transfer waiting for its outcome. The archive path is fixed
/// when the transfer starts so completion never depends on the engine
/// still tracking the record.
#[derive(Debug)]
struct Pending {
    archive: Utf8PathBuf,
    action: PendingAction,
}

/// Turns finished downloads into installed mods.
///
/// Owns the transfer id -> action map. A mapping is consumed by the first
/// event for its id, whatever the outcome, so nothing is ever retried.
/// Events lost to a lagging subscription are recovered from the engine's
/// table.
pub struct Orchestrator {
    settings: Arc<SettingsService>,
    transfers: TransferEngine,
    mods: Arc<ModManager>,
    catalog: Arc<dyn ModCatalog>,
    extractor: Arc<dyn ArchiveExtractor>,
    launcher: Arc<dyn ProcessLauncher>,
    notifier: Arc<dyn Notifier>,
    pending: Mutex<HashMap<String, Pending>>,
}

impl Orchestrator {
    pub fn new(
        settings: Arc<SettingsService>,
        transfers: TransferEngine,
        mods: Arc<ModManager>,
        catalog: Arc<dyn ModCatalog>,
    ) -> Self {
        Self {
            settings,
            transfers,
            mods,
            catalog,
            extractor: Arc::new(ZipExtractor),
            launcher: Arc::new(CommandLauncher),
            notifier: Arc::new(TracingNotifier),
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_launcher(mut self, launcher: Arc<dyn ProcessLauncher>) -> Self {
        self.launcher = launcher;
        self
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn ArchiveExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn transfers(&self) -> &TransferEngine {
        &self.transfers
    }

    pub fn mods(&self) -> &Arc<ModManager> {
        &self.mods
    }

    /// Number of transfers still waiting for their completion handling.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    #[instrument(skip_all, fields(catalog_id = catalog_mod.catalog_id))]
    pub async fn install_online(&self, catalog_mod: &CatalogMod) -> ActionResult {
        let location = match self.catalog.fetch_archive_location(catalog_mod.catalog_id).await {
            Ok(Some(location)) => location,
            Ok(None) => return ActionResult::fail(SError::NoDownloadAvailable.to_string()),
            Err(e) => {
                error!("Catalog lookup failed: {e}");
                return ActionResult::fail(e.to_string());
            }
        };

        let url = location.download_url.clone();
        let filename = format!("{}.zip", catalog_mod.catalog_id);
        let context = TransferContext::Install {
            catalog_id: catalog_mod.catalog_id,
        };
        self.begin(
            &url,
            &filename,
            context,
            PendingAction::Install {
                catalog_mod: catalog_mod.clone(),
                location,
            },
        );

        ActionResult::ok(format!("Downloading {}", catalog_mod.name))
    }

    #[instrument(skip(self))]
    pub fn update_mod(&self, mod_id: &str) -> ActionResult {
        let Some(m) = self.mods.registry().find(mod_id) else {
            return ActionResult::fail(SError::ModNotFound(mod_id.to_string()).to_string());
        };
        let Some(url) = m.latest_file_url.clone() else {
            return ActionResult::fail(format!("No update available for {}", m.name));
        };

        self.begin(
            &url,
            &format!("update_{mod_id}.zip"),
            TransferContext::Update {
                mod_id: mod_id.to_string(),
            },
            PendingAction::Update {
                mod_id: mod_id.to_string(),
            },
        );
        ActionResult::ok(format!("Updating {}", m.name))
    }

    /// Starts one update per id. A failure to start one does not stop the
    /// others.
    pub fn update_all(&self, mod_ids: &[String]) -> UpdateSummary {
        let mut summary = UpdateSummary::default();
        for mod_id in mod_ids {
            let result = self.update_mod(mod_id);
            if result.success {
                summary.success_count += 1;
            } else {
                summary.fail_count += 1;
            }
            summary.results.push(UpdateOutcome {
                mod_id: mod_id.clone(),
                success: result.success,
                message: result.message,
            });
        }
        info!(
            "Update all: {} started, {} failed",
            summary.success_count, summary.fail_count
        );
        summary
    }

    /// Downloads the script loader runtime into the game's binaries.
    #[instrument(skip(self))]
    pub fn install_loader(&self, url: &str) -> ActionResult {
        if let Err(e) = self.settings.game_paths() {
            return ActionResult::fail(e.to_string());
        }

        self.begin(
            url,
            LOADER_ARCHIVE,
            TransferContext::LoaderInstall,
            PendingAction::LoaderInstall,
        );
        ActionResult::ok("Downloading UE4SS")
    }

    /// Subscribes to the engine and runs the event loop on the current
    /// runtime.
    pub fn spawn(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let this = self.clone();
        let events = self.transfers.subscribe_events();
        tokio::spawn(async move { this.run(events).await })
    }

    /// Consumes transfer events until the engine goes away.
    pub async fn run(&self, mut events: broadcast::Receiver<TransferEvent>) {
        loop {
            match events.recv().await {
                Ok(event) => self.handle_event(event).await,
                Err(RecvError::Lagged(missed)) => {
                    warn!("Missed {missed} transfer events, reconciling");
                    self.reconcile().await;
                }
                Err(RecvError::Closed) => break,
            }
        }
        debug!("Transfer event stream closed");
    }

    /// Settles every pending transfer the engine reports as finished.
    /// Transfers still running keep their mapping.
    pub async fn reconcile(&self) {
        let ids: Vec<String> = self.pending.lock().keys().cloned().collect();
        for id in ids {
            let kind = match self.transfers.get(&id) {
                Some(t) => match t.state {
                    TransferState::Completed => TransferEventKind::Completed,
                    TransferState::Failed => TransferEventKind::Failed {
                        error: t.error.unwrap_or_else(|| "unknown error".into()),
                    },
                    TransferState::Cancelled => {
                        debug!("Transfer {id} was cancelled, dropping its action");
                        self.pending.lock().remove(&id);
                        continue;
                    }
                    _ => continue,
                },
                None => {
                    warn!("Transfer {id} is no longer tracked, dropping its action");
                    self.pending.lock().remove(&id);
                    continue;
                }
            };
            self.handle_event(TransferEvent { id, kind }).await;
        }
    }

    pub async fn handle_event(&self, event: TransferEvent) {
        let pending = self.pending.lock().remove(&event.id);
        let Some(Pending { archive, action }) = pending else {
            debug!("No pending action for transfer {}", event.id);
            return;
        };

        match event.kind {
            TransferEventKind::Failed { error } => {
                self.notify(NotificationLevel::Error, format!("Download failed: {error}"));
            }
            TransferEventKind::Completed => {
                self.complete(action, &archive).await;

                if let Err(e) = tokio::fs::remove_file(&archive).await {
                    debug!("Could not remove {archive}: {e}");
                }
            }
        }
    }

    #[instrument(skip(self))]
    pub async fn launch_game(&self) -> ActionResult {
        match self.try_launch().await {
            Ok(exe) => ActionResult::ok(format!("Launched {exe}")),
            Err(e) => {
                error!("Launch failed: {e}");
                ActionResult::fail(e.to_string())
            }
        }
    }

    async fn try_launch(&self) -> Result<Utf8PathBuf, SError> {
        let paths = self.settings.game_paths()?;
        let exe = [&paths.game_exe, &paths.shipping_exe]
            .into_iter()
            .find(|p| p.is_file())
            .cloned()
            .ok_or_else(|| SError::Launch(format!("No game executable under {}", paths.binaries)))?;

        if is_game_running(&paths).await {
            return Err(SError::GameRunning);
        }

        let mut args = vec![LAUNCH_FLAG.to_string()];
        if let Some(extra) = self.settings.get().launch_args {
            args.extend(extra.split_whitespace().map(str::to_string));
        }

        self.launcher.launch(&exe, &args).await?;
        Ok(exe)
    }

    /// Starts a transfer and records its action before any event for it
    /// can be handled.
    fn begin(&self, url: &str, filename: &str, context: TransferContext, action: PendingAction) -> String {
        let folder = self.settings.download_dir();
        let mut pending = self.pending.lock();
        let id = self.transfers.start(url, &folder, filename, Some(context));
        pending.insert(
            id.clone(),
            Pending {
                archive: folder.join(filename),
                action,
            },
        );
        id
    }

    async fn complete(&self, action: PendingAction, archive: &Utf8Path) {
        match action {
            PendingAction::Install {
                catalog_mod,
                location,
            } => match self.mods.install_downloaded(&catalog_mod, &location, archive).await {
                Ok(m) => self.notify(NotificationLevel::Success, format!("{} installed", m.name)),
                Err(e) => self.notify(
                    NotificationLevel::Error,
                    format!("Failed to install {}: {e}", catalog_mod.name),
                ),
            },
            PendingAction::Update { mod_id } => match self.mods.apply_update(&mod_id, archive).await {
                Ok(m) => self.notify(
                    NotificationLevel::Success,
                    format!("{} updated to {}", m.name, m.version),
                ),
                Err(e) => self.notify(NotificationLevel::Error, format!("Failed to update mod: {e}")),
            },
            PendingAction::LoaderInstall => match self.install_loader_files(archive).await {
                Ok(()) => self.notify(NotificationLevel::Success, "UE4SS installed"),
                Err(e) => self.notify(
                    NotificationLevel::Error,
                    format!("Failed to extract/install UE4SS: {e}"),
                ),
            },
        }
    }

    async fn install_loader_files(&self, archive: &Utf8Path) -> Result<(), SError> {
        let paths = self.settings.game_paths()?;
        self.extractor.extract(archive, &paths.binaries).await?;
        info!("UE4SS extracted into {}", paths.binaries);
        Ok(())
    }

    fn notify(&self, level: NotificationLevel, message: impl Into<String>) {
        self.notifier.notify(Notification::new(level, message));
    }
}

async fn is_game_running(paths: &GamePathRules) -> bool {
    let targets: Vec<_> = [&paths.game_exe, &paths.shipping_exe]
        .into_iter()
        .filter_map(|p| dunce::canonicalize(p).ok())
        .collect();
    let names = [
        paths.game_exe.file_name().unwrap_or_default().to_string(),
        paths.shipping_exe.file_name().unwrap_or_default().to_string(),
    ];

    tokio::task::spawn_blocking(move || {
        let mut sys = System::new();
        let names: Vec<&str> = names.iter().map(String::as_str).collect();
        ProcessChecker::is_running(&mut sys, &targets) || ProcessChecker::is_name_running(&mut sys, &names)
    })
    .await
    .unwrap_or_else(|e| {
        warn!("Process check failed: {e}");
        false
    })
}
