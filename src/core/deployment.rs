use crate::config::SettingsService;
use crate::core::{linker, ue4ss};
use crate::models::error::SError;
use crate::models::mod_dto::InstalledMod;
use crate::models::paths::GamePathRules;
use camino::{Utf8Path, Utf8PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

const PAK_EXTENSIONS: [&str; 4] = ["pak", "utoc", "ucas", "sig"];

/// Where a single source file should land.
#[derive(Debug, PartialEq)]
struct Target {
    dest: Utf8PathBuf,
    loader_mod: Option<String>,
}

/// Places mod files into the game tree and removes them again.
pub struct Deployer {
    settings: Arc<SettingsService>,
}

impl Deployer {
    pub fn new(settings: Arc<SettingsService>) -> Self {
        Self { settings }
    }

    /// Deploys `m` and records what was written in `m.deployed_files`.
    /// Returns false only when the game path is unusable or the source
    /// folder cannot be walked.
    pub fn deploy(&self, m: &mut InstalledMod) -> bool {
        match self.try_deploy(m) {
            Ok(()) => true,
            Err(e) => {
                error!("Deploy of {} failed: {e}", m.name);
                false
            }
        }
    }

    /// `deploy` with the reason for an operation-level failure.
    pub fn try_deploy(&self, m: &mut InstalledMod) -> Result<(), SError> {
        let paths = self.settings.game_paths()?;

        if !m.deployed_files.is_empty() {
            debug!("{} is already deployed, clearing previous placement", m.name);
            self.undeploy_with(Some(&paths), m);
        }

        deploy_files(&paths, m)
    }

    /// Removes every recorded file. Never fails; what cannot be deleted is
    /// logged and left behind.
    pub fn undeploy(&self, m: &mut InstalledMod) -> bool {
        let paths = self.settings.game_paths().ok();
        self.undeploy_with(paths.as_ref(), m);
        true
    }

    fn undeploy_with(&self, paths: Option<&GamePathRules>, m: &mut InstalledMod) {
        for file in m.deployed_files.drain(..) {
            if let Err(e) = linker::unlink(&file) {
                warn!("Could not remove {file}: {e}");
            }
        }

        if let (Some(paths), Some(name)) = (paths, m.ue4ss_mod_name.as_deref()) {
            if let Err(e) = ue4ss::set_entry(&paths.loader_manifest, name, false) {
                warn!("Could not disable {name} in mods.txt: {e}");
            }
        }

        info!("Undeployed {}", m.name);
    }
}

/// First other enabled mod that shares the target's category.
pub fn find_conflict<'a>(mods: &'a [InstalledMod], target: &InstalledMod) -> Option<&'a InstalledMod> {
    let category = target.conflict_category()?;
    mods.iter()
        .find(|m| m.id != target.id && m.is_enabled && m.conflict_category() == Some(category))
}

fn deploy_files(paths: &GamePathRules, m: &mut InstalledMod) -> Result<(), SError> {
    let root = &m.folder_path;
    if !root.is_dir() {
        return Err(SError::IOError(format!("Source folder missing: {root}")));
    }

    let mut written = Vec::new();
    let mut loader_mod = None;

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => return Err(e.into()),
            Err(e) => {
                warn!("Skipping unreadable entry in {root}: {e}");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let Some(src) = Utf8Path::from_path(entry.path()) else {
            warn!("Skipping non UTF-8 path {:?}", entry.path());
            continue;
        };
        let rel = src.strip_prefix(root)?;

        let Some(target) = resolve_target(paths, rel, m.priority) else {
            continue;
        };

        match linker::place(src, &target.dest) {
            Ok(how) => {
                debug!("{rel} -> {} ({how:?})", target.dest);
                written.push(target.dest);
                if target.loader_mod.is_some() {
                    loader_mod = target.loader_mod;
                }
            }
            Err(e) => error!("Failed to place {rel}: {e}"),
        }
    }

    if let Some(name) = &loader_mod {
        if let Err(e) = ue4ss::set_entry(&paths.loader_manifest, name, true) {
            warn!("Could not enable {name} in mods.txt: {e}");
        }
    }

    info!("Deployed {} ({} files)", m.name, written.len());
    m.deployed_files = written;
    if loader_mod.is_some() {
        m.ue4ss_mod_name = loader_mod;
    }
    Ok(())
}

fn resolve_target(paths: &GamePathRules, rel: &Utf8Path, priority: i64) -> Option<Target> {
    let parts: Vec<&str> = rel.iter().collect();
    let file_name = rel.file_name()?;

    for (i, part) in parts.iter().enumerate() {
        let rest = &parts[i + 1..];

        if part.eq_ignore_ascii_case("LogicMods") {
            return Some(Target {
                dest: paths.logic_mods.join(file_name),
                loader_mod: None,
            });
        }

        if part.eq_ignore_ascii_case("Movies") {
            return Some(Target {
                dest: paths.movies.join(rest.iter().collect::<Utf8PathBuf>()),
                loader_mod: None,
            });
        }

        if part.eq_ignore_ascii_case("ue4ss") {
            let loader_mod = match rest {
                [mods, manifest] if mods.eq_ignore_ascii_case("Mods") && manifest.eq_ignore_ascii_case("mods.txt") => {
                    return None;
                }
                [mods, name, _, ..] if mods.eq_ignore_ascii_case("Mods") => Some(name.to_string()),
                _ => None,
            };
            return Some(Target {
                dest: paths.binaries.join(rest.iter().collect::<Utf8PathBuf>()),
                loader_mod,
            });
        }
    }

    let ext = rel.extension()?.to_ascii_lowercase();
    if PAK_EXTENSIONS.contains(&ext.as_str()) {
        return Some(Target {
            dest: paths.paks_mods.join(format!("{priority:03}_{file_name}")),
            loader_mod: None,
        });
    }

    None
}
