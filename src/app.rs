use crate::config::{default_data_dir, SettingsService};
use crate::core::decompression::ZipExtractor;
use crate::core::mod_manager::ModManager;
use crate::core::orchestrator::Orchestrator;
use crate::core::ports::ModCatalog;
use crate::core::transfer::TransferEngine;
use crate::models::error::SError;
use crate::utils::logging;
use camino::Utf8Path;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;

/// The wired-up core: settings, mod store, transfers and the completion
/// loop. This is what a UI shell holds on to.
pub struct App {
    pub settings: Arc<SettingsService>,
    pub orchestrator: Arc<Orchestrator>,
    events: JoinHandle<()>,
    _log_guard: WorkerGuard,
}

impl App {
    /// Must be called from within a tokio runtime. `data_dir` defaults to
    /// the platform data directory.
    pub fn start(data_dir: Option<&Utf8Path>, catalog: Arc<dyn ModCatalog>) -> Result<Self, SError> {
        let data_dir = data_dir
            .map(Utf8Path::to_path_buf)
            .unwrap_or_else(default_data_dir);

        let settings = Arc::new(SettingsService::load(&data_dir));
        let log_guard = logging::init(&settings.lib_paths().logs);

        settings.save()?;
        std::fs::create_dir_all(settings.mods_dir())?;

        let mods = Arc::new(ModManager::new(settings.clone(), Arc::new(ZipExtractor)));
        let orchestrator = Arc::new(Orchestrator::new(
            settings.clone(),
            TransferEngine::new()?,
            mods,
            catalog,
        ));
        let events = orchestrator.spawn();

        info!("Core started with data dir {data_dir}");
        Ok(Self {
            settings,
            orchestrator,
            events,
            _log_guard: log_guard,
        })
    }

    /// Stops the completion loop. Transfers still running are abandoned.
    pub fn shutdown(self) {
        self.events.abort();
        info!("Core stopped");
    }
}
