use crate::models::error::SError;
use crate::models::paths::{GamePathRules, LibPathRules};
use crate::utils::json::Json;
use camino::{Utf8Path, Utf8PathBuf};
use directories::ProjectDirs;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AppSettings {
    /// Install root, `SparkingZERO` folder, `Binaries/Win64` or an exe.
    pub game_path: Utf8PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mod_download_path: Option<Utf8PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mods_path: Option<Utf8PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub launch_args: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background_image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background_opacity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_profile_id: Option<String>,
}

/// Platform data directory, falling back to the folder of the executable.
pub fn default_data_dir() -> Utf8PathBuf {
    ProjectDirs::from("com", "kamisama", "KamisamaLoader")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .or_else(|| {
            std::env::current_exe()
                .ok()
                .and_then(|exe_path| exe_path.parent().map(|p| p.to_path_buf()))
        })
        .and_then(|p| Utf8PathBuf::from_path_buf(p).ok())
        .unwrap_or_else(|| Utf8PathBuf::from("."))
}

/// Owns the settings file and the in-memory copy. One instance is shared
/// by everything that needs settings.
pub struct SettingsService {
    lib_paths: LibPathRules,
    current: RwLock<AppSettings>,
}

impl SettingsService {
    /// Reads `settings.json` under `data_dir`. A missing or corrupt file
    /// yields defaults.
    pub fn load(data_dir: &Utf8Path) -> Self {
        let lib_paths = LibPathRules::new(data_dir);
        let current = match Json::read::<AppSettings>(&lib_paths.settings) {
            Ok(settings) => settings,
            Err(SError::IOError(_)) => AppSettings::default(),
            Err(e) => {
                warn!("Ignoring unreadable settings at {}: {e}", lib_paths.settings);
                AppSettings::default()
            }
        };

        Self {
            lib_paths,
            current: RwLock::new(current),
        }
    }

    pub fn get(&self) -> AppSettings {
        self.current.read().clone()
    }

    /// Applies `f` to a copy, persists it, and only then swaps it in.
    pub fn update<F>(&self, f: F) -> Result<(), SError>
    where
        F: FnOnce(&mut AppSettings),
    {
        let mut guard = self.current.write();
        let mut next = guard.clone();
        f(&mut next);

        Json::write(&self.lib_paths.settings, &next).inspect_err(|e| {
            error!("Failed to save settings: {e}");
        })?;

        *guard = next;
        Ok(())
    }

    pub fn save(&self) -> Result<(), SError> {
        Json::write(&self.lib_paths.settings, &*self.current.read())
    }

    pub fn lib_paths(&self) -> &LibPathRules {
        &self.lib_paths
    }

    pub fn mods_dir(&self) -> Utf8PathBuf {
        self.current
            .read()
            .mods_path
            .clone()
            .unwrap_or_else(|| self.lib_paths.mods.clone())
    }

    pub fn download_dir(&self) -> Utf8PathBuf {
        self.current
            .read()
            .mod_download_path
            .clone()
            .unwrap_or_else(|| self.lib_paths.downloads.clone())
    }

    pub fn game_paths(&self) -> Result<GamePathRules, SError> {
        GamePathRules::resolve(&self.current.read().game_path)
    }
}
