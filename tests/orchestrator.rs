mod common;

use common::http::TestServer;
use common::{
    create_test_mod, installed, seed, setup_env_without_game, setup_test_env, wait_until, zip_bytes,
    MockCatalog, RecordingLauncher, RecordingNotifier, TestEnv,
};
use kamisama_loader::core::transfer::TransferEngine;
use kamisama_loader::models::catalog::{CatalogMod, NotificationLevel};
use kamisama_loader::models::transfer::{TransferEvent, TransferEventKind, TransferState};
use kamisama_loader::Orchestrator;
use std::fs;
use std::sync::Arc;
use tokio::sync::broadcast;

struct Harness {
    orchestrator: Arc<Orchestrator>,
    notifier: Arc<RecordingNotifier>,
    launcher: Arc<RecordingLauncher>,
}

impl Harness {
    fn new(env: &TestEnv, catalog: Arc<MockCatalog>) -> Self {
        let notifier = Arc::new(RecordingNotifier::default());
        let launcher = Arc::new(RecordingLauncher::default());
        let orchestrator = Orchestrator::new(
            env.settings.clone(),
            TransferEngine::new().unwrap(),
            Arc::new(env.manager()),
            catalog,
        )
        .with_notifier(notifier.clone())
        .with_launcher(launcher.clone());

        Self {
            orchestrator: Arc::new(orchestrator),
            notifier,
            launcher,
        }
    }

    fn has_message(&self, level: NotificationLevel) -> bool {
        self.notifier.messages().iter().any(|n| n.level == level)
    }
}

fn goku() -> CatalogMod {
    CatalogMod {
        catalog_id: 42,
        name: "Goku".into(),
        author: "Toriyama".into(),
        version: "1.0".into(),
        description: "Ultra Instinct".into(),
        category: Some("Characters".into()),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_install_online_end_to_end() {
    let env = setup_test_env();
    let rules = env.rules();
    let server = TestServer::start().await;
    server.file("/goku.zip", &zip_bytes(&[("Goku.pak", b"goku pak")]));

    let catalog = Arc::new(MockCatalog::default());
    catalog.location(42, &server.url("/goku.zip"));
    let h = Harness::new(&env, catalog);
    let _loop = h.orchestrator.spawn();

    // 1. Kick off
    let result = h.orchestrator.install_online(&goku()).await;
    assert!(result.success);
    assert_eq!(result.message, "Downloading Goku");

    // 2. Download, extract, register, deploy
    let archive = env.settings.download_dir().join("42.zip");
    wait_until(|| h.has_message(NotificationLevel::Success) && !archive.exists()).await;

    let mods = h.orchestrator.mods().installed_mods();
    assert_eq!(mods.len(), 1);
    let m = &mods[0];
    assert_eq!(m.catalog_id, Some(42));
    assert_eq!(m.name, "Goku");
    assert_eq!(m.author, "Uploader");
    assert_eq!(m.category.as_deref(), Some("Characters"));
    assert_eq!(m.latest_file_id, Some(100));
    assert!(m.is_enabled);
    assert!(!m.has_update);
    assert_eq!(m.folder_path, env.mods_dir().join("Goku"));

    let deployed = rules.paks_mods.join("001_Goku.pak");
    assert_eq!(fs::read(&deployed).unwrap(), b"goku pak");

    // 3. The mapping is consumed
    assert_eq!(h.orchestrator.pending_count(), 0);
}

#[tokio::test]
async fn test_install_online_without_download() {
    let env = setup_test_env();
    let h = Harness::new(&env, Arc::new(MockCatalog::default()));

    let result = h.orchestrator.install_online(&goku()).await;

    assert!(!result.success);
    assert_eq!(result.message, "No download files found for this mod.");
    assert!(h.orchestrator.transfers().list().is_empty());
    assert_eq!(h.orchestrator.pending_count(), 0);
}

#[tokio::test]
async fn test_unmapped_event_is_ignored() {
    let env = setup_test_env();
    let h = Harness::new(&env, Arc::new(MockCatalog::default()));

    h.orchestrator
        .handle_event(TransferEvent {
            id: "not-ours".into(),
            kind: TransferEventKind::Completed,
        })
        .await;

    assert!(h.notifier.messages().is_empty());
    assert!(h.orchestrator.mods().installed_mods().is_empty());
}

#[tokio::test]
async fn test_failed_download_clears_mapping() {
    let env = setup_test_env();
    let server = TestServer::start().await;

    let catalog = Arc::new(MockCatalog::default());
    catalog.location(42, &server.url("/gone.zip"));
    let h = Harness::new(&env, catalog);
    let _loop = h.orchestrator.spawn();

    assert!(h.orchestrator.install_online(&goku()).await.success);
    wait_until(|| h.has_message(NotificationLevel::Error)).await;

    let messages = h.notifier.messages();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].message.starts_with("Download failed"));
    assert!(messages[0].message.contains("404"));
    assert_eq!(h.orchestrator.pending_count(), 0);
    assert!(h.orchestrator.mods().installed_mods().is_empty());
}

#[tokio::test]
async fn test_completion_after_records_were_cleared() {
    let env = setup_test_env();
    let rules = env.rules();
    let server = TestServer::start().await;
    server.file("/goku.zip", &zip_bytes(&[("Goku.pak", b"goku pak")]));

    let catalog = Arc::new(MockCatalog::default());
    catalog.location(42, &server.url("/goku.zip"));
    let h = Harness::new(&env, catalog);
    let mut events = h.orchestrator.transfers().subscribe_events();

    assert!(h.orchestrator.install_online(&goku()).await.success);
    let event = events.recv().await.unwrap();
    assert_eq!(event.kind, TransferEventKind::Completed);

    // The UI clears finished records before the loop gets to the event
    h.orchestrator.transfers().clear_finished();
    assert!(h.orchestrator.transfers().get(&event.id).is_none());

    h.orchestrator.handle_event(event).await;

    assert!(h.has_message(NotificationLevel::Success));
    assert_eq!(h.orchestrator.mods().installed_mods().len(), 1);
    assert!(rules.paks_mods.join("001_Goku.pak").exists());
    assert!(!env.settings.download_dir().join("42.zip").exists());
    assert_eq!(h.orchestrator.pending_count(), 0);
}

#[tokio::test]
async fn test_lagged_loop_recovers_finished_transfers() {
    let env = setup_test_env();
    let server = TestServer::start().await;
    server.file("/goku.zip", &zip_bytes(&[("Goku.pak", b"goku pak")]));

    let catalog = Arc::new(MockCatalog::default());
    catalog.location(42, &server.url("/goku.zip"));
    catalog.location(7, &server.url("/missing.zip"));
    let h = Harness::new(&env, catalog);

    // 1. Two transfers finish while nobody listens
    assert!(h.orchestrator.install_online(&goku()).await.success);
    let broken = CatalogMod {
        catalog_id: 7,
        name: "Broken".into(),
        ..Default::default()
    };
    assert!(h.orchestrator.install_online(&broken).await.success);
    wait_until(|| {
        let list = h.orchestrator.transfers().list();
        list.len() == 2 && list.iter().all(|t| t.state.is_finished())
    })
    .await;
    assert_eq!(h.orchestrator.pending_count(), 2);

    // 2. A receiver that overflowed before it saw their events
    let (tx, rx) = broadcast::channel(1);
    for i in 0..3 {
        tx.send(TransferEvent {
            id: format!("noise-{i}"),
            kind: TransferEventKind::Completed,
        })
        .unwrap();
    }
    drop(tx);
    h.orchestrator.run(rx).await;

    // 3. Both outcomes were still handled
    assert_eq!(h.orchestrator.pending_count(), 0);
    let mods = h.orchestrator.mods().installed_mods();
    assert_eq!(mods.len(), 1);
    assert_eq!(mods[0].name, "Goku");
    assert!(h.has_message(NotificationLevel::Success));
    assert!(h
        .notifier
        .messages()
        .iter()
        .any(|n| n.level == NotificationLevel::Error && n.message.starts_with("Download failed")));
    let states: Vec<TransferState> = h.orchestrator.transfers().list().into_iter().map(|t| t.state).collect();
    assert!(states.contains(&TransferState::Failed));
}

#[tokio::test]
async fn test_update_mod_applies_new_files() {
    let env = setup_test_env();
    let rules = env.rules();
    let server = TestServer::start().await;
    server.file("/goku-v2.zip", &zip_bytes(&[("Goku.pak", b"v2")]));

    let folder = create_test_mod(&env.mods_dir(), "Goku", &[("Goku.pak", b"v1")]);
    let mut m = installed("1", "Goku", &folder, 1);
    m.catalog_id = Some(42);
    m.is_enabled = true;
    m.has_update = true;
    m.latest_version = Some("2.0".into());
    m.latest_file_url = Some(server.url("/goku-v2.zip"));

    let h = Harness::new(&env, Arc::new(MockCatalog::default()));
    seed(h.orchestrator.mods(), vec![m]);
    let _loop = h.orchestrator.spawn();

    let result = h.orchestrator.update_mod("1");
    assert!(result.success);

    let mods = h.orchestrator.mods().clone();
    wait_until(|| mods.registry().find("1").is_some_and(|m| m.version == "2.0")).await;

    let m = mods.registry().find("1").unwrap();
    assert!(!m.has_update);
    assert_eq!(m.folder_path, folder);
    assert_eq!(fs::read(folder.join("Goku.pak")).unwrap(), b"v2");
    assert_eq!(fs::read(rules.paks_mods.join("001_Goku.pak")).unwrap(), b"v2");
    assert!(!env.mods_dir().join(".update_1").exists());
}

#[tokio::test]
async fn test_update_all_counts_outcomes() {
    let env = setup_test_env();
    let server = TestServer::start().await;
    server.file("/a.zip", &zip_bytes(&[("A.pak", b"a")]));

    let a_folder = create_test_mod(&env.mods_dir(), "A", &[("A.pak", b"old")]);
    let mut a = installed("a", "A", &a_folder, 2);
    a.latest_file_url = Some(server.url("/a.zip"));
    let b_folder = create_test_mod(&env.mods_dir(), "B", &[("B.pak", b"old")]);
    let b = installed("b", "B", &b_folder, 1);

    let h = Harness::new(&env, Arc::new(MockCatalog::default()));
    seed(h.orchestrator.mods(), vec![a, b]);

    let ids = vec!["a".to_string(), "b".to_string(), "ghost".to_string()];
    let summary = h.orchestrator.update_all(&ids);

    assert_eq!(summary.success_count, 1);
    assert_eq!(summary.fail_count, 2);
    assert_eq!(summary.results.len(), 3);
    assert_eq!(summary.results[1].message, "No update available for B");
    assert_eq!(h.orchestrator.pending_count(), 1);
}

#[tokio::test]
async fn test_install_loader_extracts_into_binaries() {
    let env = setup_test_env();
    let rules = env.rules();
    let server = TestServer::start().await;
    server.file(
        "/ue4ss.zip",
        &zip_bytes(&[("UE4SS.dll", b"dll"), ("Mods/mods.txt", b"Keybinds : 1\n")]),
    );

    let h = Harness::new(&env, Arc::new(MockCatalog::default()));
    let _loop = h.orchestrator.spawn();

    let result = h.orchestrator.install_loader(&server.url("/ue4ss.zip"));
    assert!(result.success);

    wait_until(|| h.has_message(NotificationLevel::Success)).await;
    assert!(rules.binaries.join("UE4SS.dll").exists());
    assert_eq!(
        fs::read_to_string(&rules.loader_manifest).unwrap(),
        "Keybinds : 1\n"
    );
}

#[tokio::test]
async fn test_install_loader_needs_game_path() {
    let env = setup_env_without_game();
    let h = Harness::new(&env, Arc::new(MockCatalog::default()));

    let result = h.orchestrator.install_loader("http://127.0.0.1:9/ue4ss.zip");

    assert!(!result.success);
    assert!(h.orchestrator.transfers().list().is_empty());
    assert_eq!(h.orchestrator.pending_count(), 0);
}

#[tokio::test]
async fn test_launch_game_passes_arguments() {
    let env = setup_test_env();
    let rules = env.rules();
    fs::write(&rules.game_exe, b"exe").unwrap();
    env.settings
        .update(|s| s.launch_args = Some("-dx11  -windowed".into()))
        .unwrap();
    let h = Harness::new(&env, Arc::new(MockCatalog::default()));

    let result = h.orchestrator.launch_game().await;
    assert!(result.success, "{}", result.message);

    let launches = h.launcher.launches.lock().clone();
    assert_eq!(launches.len(), 1);
    assert_eq!(launches[0].0, rules.game_exe);
    assert_eq!(launches[0].1, vec!["-fileopenlog", "-dx11", "-windowed"]);
}

#[tokio::test]
async fn test_launch_game_falls_back_to_shipping_exe() {
    let env = setup_test_env();
    let rules = env.rules();
    fs::write(&rules.shipping_exe, b"exe").unwrap();
    let h = Harness::new(&env, Arc::new(MockCatalog::default()));

    assert!(h.orchestrator.launch_game().await.success);

    let launches = h.launcher.launches.lock().clone();
    assert_eq!(launches[0].0, rules.shipping_exe);
    assert_eq!(launches[0].1, vec!["-fileopenlog"]);
}

#[tokio::test]
async fn test_launch_game_without_executable_fails() {
    let env = setup_test_env();
    let h = Harness::new(&env, Arc::new(MockCatalog::default()));

    let result = h.orchestrator.launch_game().await;

    assert!(!result.success);
    assert!(h.launcher.launches.lock().is_empty());
}
