#![allow(dead_code)]

pub mod http;

use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use kamisama_loader::core::decompression::ZipExtractor;
use kamisama_loader::core::mod_manager::ModManager;
use kamisama_loader::core::ports::{ModCatalog, Notifier, ProcessLauncher};
use kamisama_loader::models::catalog::{ArchiveLocation, CatalogRelease, Notification};
use kamisama_loader::models::error::SError;
use kamisama_loader::models::mod_dto::InstalledMod;
use kamisama_loader::models::paths::GamePathRules;
use kamisama_loader::SettingsService;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub struct TestEnv {
    pub _tmp: TempDir,
    pub root: Utf8PathBuf,
    pub game_root: Utf8PathBuf,
    pub data_dir: Utf8PathBuf,
    pub settings: Arc<SettingsService>,
}

impl TestEnv {
    pub fn rules(&self) -> GamePathRules {
        GamePathRules::new(&self.game_root)
    }

    pub fn mods_dir(&self) -> Utf8PathBuf {
        self.settings.mods_dir()
    }

    pub fn manager(&self) -> ModManager {
        ModManager::new(self.settings.clone(), Arc::new(ZipExtractor))
    }
}

/// Temp game install plus a data dir whose settings point at it.
pub fn setup_test_env() -> TestEnv {
    let tmp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).unwrap();

    let game_root = root.join("game");
    let data_dir = root.join("data");

    // 1. Game skeleton
    let rules = GamePathRules::new(&game_root);
    fs::create_dir_all(&rules.paks_mods).unwrap();
    fs::create_dir_all(&rules.binaries).unwrap();

    // 2. Settings pointing at it
    let settings = SettingsService::load(&data_dir);
    settings
        .update(|s| s.game_path = game_root.clone())
        .unwrap();

    TestEnv {
        _tmp: tmp,
        root,
        game_root,
        data_dir,
        settings: Arc::new(settings),
    }
}

/// Same layout but without a configured game path.
pub fn setup_env_without_game() -> TestEnv {
    let env = setup_test_env();
    env.settings.update(|s| s.game_path = Utf8PathBuf::new()).unwrap();
    env
}

/// Writes a mod folder under `parent/name` with the given relative files.
pub fn create_test_mod(parent: &Utf8Path, name: &str, files: &[(&str, &[u8])]) -> Utf8PathBuf {
    let dir = parent.join(name);
    for (rel, data) in files {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, data).unwrap();
    }
    fs::create_dir_all(&dir).unwrap();
    dir
}

pub fn installed(id: &str, name: &str, folder: &Utf8Path, priority: i64) -> InstalledMod {
    InstalledMod {
        id: id.into(),
        name: name.into(),
        author: "tester".into(),
        version: "1.0".into(),
        priority,
        folder_path: folder.to_path_buf(),
        ..Default::default()
    }
}

/// Seeds the registry with `mods`.
pub fn seed(manager: &ModManager, mods: Vec<InstalledMod>) {
    manager
        .registry()
        .update(move |list| {
            *list = mods;
            Ok(())
        })
        .unwrap();
}

pub fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut zip = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    for (name, data) in entries {
        zip.start_file(*name, zip::write::SimpleFileOptions::default())
            .unwrap();
        zip.write_all(data).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

pub fn write_zip(path: &Utf8Path, entries: &[(&str, &[u8])]) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, zip_bytes(entries)).unwrap();
}

/// Polls `cond` until it holds or ten seconds pass.
pub async fn wait_until<F: FnMut() -> bool>(mut cond: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !cond() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[derive(Default)]
pub struct MockCatalog {
    pub locations: Mutex<HashMap<u64, ArchiveLocation>>,
    pub releases: Mutex<HashMap<u64, Result<Option<CatalogRelease>, SError>>>,
    pub calls: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub delay: Option<Duration>,
}

impl MockCatalog {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }

    pub fn location(&self, catalog_id: u64, url: &str) {
        self.locations.lock().insert(
            catalog_id,
            ArchiveLocation {
                download_url: url.to_string(),
                display_name: format!("mod_{catalog_id}.zip"),
                author_name: "Uploader".into(),
                version: "1.0".into(),
                file_id: 100,
            },
        );
    }

    pub fn release(&self, catalog_id: u64, result: Result<Option<CatalogRelease>, SError>) {
        self.releases.lock().insert(catalog_id, result);
    }
}

#[async_trait]
impl ModCatalog for MockCatalog {
    async fn fetch_archive_location(&self, catalog_id: u64) -> Result<Option<ArchiveLocation>, SError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.locations.lock().get(&catalog_id).cloned())
    }

    async fn fetch_latest_release(&self, catalog_id: u64) -> Result<Option<CatalogRelease>, SError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.releases
            .lock()
            .get(&catalog_id)
            .cloned()
            .unwrap_or(Ok(None))
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub log: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<Notification> {
        self.log.lock().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: Notification) {
        self.log.lock().push(notification);
    }
}

#[derive(Default)]
pub struct RecordingLauncher {
    pub launches: Mutex<Vec<(Utf8PathBuf, Vec<String>)>>,
}

#[async_trait]
impl ProcessLauncher for RecordingLauncher {
    async fn launch(&self, executable: &Utf8Path, args: &[String]) -> Result<(), SError> {
        self.launches
            .lock()
            .push((executable.to_path_buf(), args.to_vec()));
        Ok(())
    }
}
