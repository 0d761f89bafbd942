use crate::models::error::SError;
use crate::models::mod_dto::InstalledMod;
use crate::utils::json::Json;
use camino::{Utf8Path, Utf8PathBuf};
use parking_lot::Mutex;
use tracing::warn;

/// The persisted list of installed mods (`mods.json`).
///
/// Every mutation is a full read-modify-write of the file, serialised by
/// the registry lock, so two callers can never interleave mid-write.
pub struct ModRegistry {
    path: Utf8PathBuf,
    lock: Mutex<()>,
}

impl ModRegistry {
    pub fn new(path: &Utf8Path) -> Self {
        Self {
            path: path.to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Current contents. A missing or unreadable file reads as empty.
    pub fn load(&self) -> Vec<InstalledMod> {
        let _guard = self.lock.lock();
        self.read_unlocked()
    }

    pub fn find(&self, mod_id: &str) -> Option<InstalledMod> {
        self.load().into_iter().find(|m| m.id == mod_id)
    }

    /// Runs `f` on a fresh copy of the list and writes the result back.
    /// Nothing is written when `f` fails.
    pub fn update<R, F>(&self, f: F) -> Result<R, SError>
    where
        F: FnOnce(&mut Vec<InstalledMod>) -> Result<R, SError>,
    {
        let _guard = self.lock.lock();
        let mut mods = self.read_unlocked();
        let out = f(&mut mods)?;
        Json::write(&self.path, &mods)?;
        Ok(out)
    }

    fn read_unlocked(&self) -> Vec<InstalledMod> {
        match Json::read::<Vec<InstalledMod>>(&self.path) {
            Ok(mods) => mods,
            Err(SError::IOError(_)) if !self.path.exists() => Vec::new(),
            Err(e) => {
                warn!("Failed to read {}: {e}", self.path);
                Vec::new()
            }
        }
    }
}
