use crate::config::SettingsService;
use crate::core::deployment::{find_conflict, Deployer};
use crate::core::linker;
use crate::core::ports::{ArchiveExtractor, ModCatalog};
use crate::core::registry::ModRegistry;
use crate::models::catalog::{ArchiveLocation, CatalogMod, CatalogRelease};
use crate::models::error::SError;
use crate::models::mod_dto::{ActionResult, InstalledMod, PriorityDirection, ToggleResult};
use crate::utils::file::FileUtils;
use camino::{Utf8Path, Utf8PathBuf};
use futures_util::{stream, StreamExt};
use std::cmp::Ordering;
use std::fs;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

const UPDATE_CHECK_CONCURRENCY: usize = 5;

/// Local mod store: the registry plus the deployment of its entries.
pub struct ModManager {
    settings: Arc<SettingsService>,
    registry: Arc<ModRegistry>,
    deployer: Arc<Deployer>,
    extractor: Arc<dyn ArchiveExtractor>,
}

impl ModManager {
    pub fn new(settings: Arc<SettingsService>, extractor: Arc<dyn ArchiveExtractor>) -> Self {
        let registry = Arc::new(ModRegistry::new(&settings.lib_paths().registry));
        let deployer = Arc::new(Deployer::new(settings.clone()));
        Self {
            settings,
            registry,
            deployer,
            extractor,
        }
    }

    pub fn installed_mods(&self) -> Vec<InstalledMod> {
        self.registry.load()
    }

    pub fn registry(&self) -> &ModRegistry {
        &self.registry
    }

    pub fn deployer(&self) -> &Deployer {
        &self.deployer
    }

    pub fn mods_dir(&self) -> Utf8PathBuf {
        self.settings.mods_dir()
    }

    pub fn folder_size(&self, path: &Utf8Path) -> u64 {
        FileUtils::folder_size(path)
    }

    /// Enables or disables a mod. Enabling reports, but never prevents, a
    /// clash with another enabled mod of the same category.
    #[instrument(skip(self))]
    pub fn toggle(&self, mod_id: &str, enable: bool) -> ToggleResult {
        match self.registry.find(mod_id) {
            Some(m) if m.is_enabled == enable => {
                return ToggleResult {
                    success: true,
                    message: format!("{} is already {}", m.name, state_word(enable)),
                    conflict: None,
                };
            }
            Some(_) => {}
            None => {
                return ToggleResult {
                    success: false,
                    message: SError::ModNotFound(mod_id.to_string()).to_string(),
                    conflict: None,
                };
            }
        }

        let result = self.registry.update(|mods| {
            let idx = position(mods, mod_id)?;
            let target = &mut mods[idx];
            target.is_enabled = enable;

            if !enable {
                let removed = target.deployed_files.clone();
                self.deployer.undeploy(target);
                let name = target.name.clone();
                restore_shared(&self.deployer, mods, &removed, None);
                return Ok((name, None));
            }

            self.deployer.try_deploy(target)?;
            let placed = target.deployed_files.clone();
            restore_shared(&self.deployer, mods, &placed, Some(mod_id));
            let target = &mods[idx];
            let conflict = find_conflict(mods.as_slice(), target).map(|other| {
                format!(
                    "Warning: This mod conflicts with \"{}\" (same category: {}).",
                    other.name,
                    other.conflict_category().unwrap_or_default()
                )
            });
            Ok((target.name.clone(), conflict))
        });

        match result {
            Ok((name, conflict)) => {
                if let Some(c) = &conflict {
                    warn!("{name}: {c}");
                }
                ToggleResult {
                    success: true,
                    message: format!("{name} {}", state_word(enable)),
                    conflict,
                }
            }
            Err(e) => {
                error!("Toggle of {mod_id} failed: {e}");
                ToggleResult {
                    success: false,
                    message: e.to_string(),
                    conflict: None,
                }
            }
        }
    }

    /// Rewrites priorities as a dense descending sequence (ties by name)
    /// and redeploys enabled mods when anything moved.
    #[instrument(skip(self))]
    pub fn fix_priorities(&self) -> ActionResult {
        let mut preview = self.registry.load();
        if !reassign_priorities(&mut preview) {
            return ActionResult::ok("Priorities already in order");
        }

        let result = self.registry.update(|mods| {
            self.undeploy_enabled(mods);
            reassign_priorities(mods);
            self.deploy_enabled(mods);
            Ok(())
        });

        match result {
            Ok(()) => ActionResult::ok("Priorities updated"),
            Err(e) => {
                error!("Failed to fix priorities: {e}");
                ActionResult::fail(e.to_string())
            }
        }
    }

    /// Moves a mod one step in the load order.
    #[instrument(skip(self))]
    pub fn set_priority(&self, mod_id: &str, direction: PriorityDirection) -> bool {
        let result = self.registry.update(|mods| {
            mods.sort_by(by_load_order);
            let idx = position(mods, mod_id)?;
            let swap_with = match direction {
                PriorityDirection::Up if idx > 0 => idx - 1,
                PriorityDirection::Down if idx + 1 < mods.len() => idx + 1,
                _ => return Ok(false),
            };

            self.undeploy_enabled(mods);
            mods.swap(idx, swap_with);
            assign_dense(mods);
            self.deploy_enabled(mods);
            Ok(true)
        });

        result.unwrap_or_else(|e| {
            error!("Failed to move {mod_id}: {e}");
            false
        })
    }

    /// Undeploys and forgets a mod, then deletes its source folder.
    #[instrument(skip(self))]
    pub fn uninstall(&self, mod_id: &str) -> ActionResult {
        let removed = self.registry.update(|mods| {
            let idx = position(mods, mod_id)?;
            let mut m = mods.remove(idx);
            let removed = m.deployed_files.clone();
            self.deployer.undeploy(&mut m);
            restore_shared(&self.deployer, mods, &removed, None);
            Ok(m)
        });

        match removed {
            Ok(m) => {
                if m.folder_path.is_dir() {
                    if let Err(e) = std::fs::remove_dir_all(&m.folder_path) {
                        warn!("Could not delete {}: {e}", m.folder_path);
                    }
                }
                info!("Uninstalled {}", m.name);
                ActionResult::ok(format!("{} uninstalled", m.name))
            }
            Err(e) => ActionResult::fail(e.to_string()),
        }
    }

    /// Installs a mod from a file on disk: a zip is unpacked, anything else
    /// is copied as is.
    #[instrument(skip(self))]
    pub async fn install_local(&self, archive: &Utf8Path) -> ActionResult {
        match self.try_install_local(archive).await {
            Ok(m) => ActionResult::ok(format!("{} installed", m.name)),
            Err(e) => {
                error!("Local install of {archive} failed: {e}");
                ActionResult::fail(format!("Installation failed: {e}"))
            }
        }
    }

    async fn try_install_local(&self, archive: &Utf8Path) -> Result<InstalledMod, SError> {
        let name = archive
            .file_stem()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| SError::ParseError(format!("No file name in {archive}")))?
            .to_string();
        let folder = self.mods_dir().join(&name);

        self.stage(archive, &folder).await?;

        self.with_store(move |registry, deployer| {
            let file_size = FileUtils::folder_size(&folder);
            registry.update(|mods| {
                let fresh = InstalledMod {
                    id: uuid::Uuid::new_v4().to_string(),
                    name: name.clone(),
                    author: "Local".into(),
                    version: "1.0".into(),
                    description: "Locally installed mod".into(),
                    priority: next_priority(mods),
                    ..Default::default()
                };
                let idx = upsert(mods, |m| m.name == name, fresh);

                let m = &mut mods[idx];
                m.is_enabled = true;
                m.file_size = file_size;
                m.folder_path = folder.clone();
                deployer.deploy(m);

                let placed = m.deployed_files.clone();
                let id = m.id.clone();
                restore_shared(deployer, mods, &placed, Some(id.as_str()));
                Ok(mods[idx].clone())
            })
        })
        .await
    }

    /// Registers a catalog download that finished. The archive is unpacked
    /// into the mod store and deployed.
    #[instrument(skip_all, fields(catalog_id = catalog_mod.catalog_id))]
    pub async fn install_downloaded(
        &self,
        catalog_mod: &CatalogMod,
        location: &ArchiveLocation,
        archive: &Utf8Path,
    ) -> Result<InstalledMod, SError> {
        let name = non_empty(&catalog_mod.name, &location.display_name);
        let folder = self.mods_dir().join(FileUtils::sanitize_name(&name));

        self.stage(archive, &folder).await?;

        let catalog_mod = catalog_mod.clone();
        let location = location.clone();
        self.with_store(move |registry, deployer| {
            let file_size = FileUtils::folder_size(&folder);
            let catalog_id = catalog_mod.catalog_id;
            registry.update(|mods| {
                let fresh = InstalledMod {
                    id: uuid::Uuid::new_v4().to_string(),
                    priority: next_priority(mods),
                    ..Default::default()
                };
                let idx = upsert(mods, |m| m.catalog_id == Some(catalog_id), fresh);

                let m = &mut mods[idx];
                m.catalog_id = Some(catalog_id);
                m.name = name.clone();
                m.author = non_empty(&location.author_name, &catalog_mod.author);
                m.version = non_empty(&location.version, &catalog_mod.version);
                m.description = catalog_mod.description.clone();
                m.category = catalog_mod.category.clone();
                m.icon_url = catalog_mod.icon_url.clone();
                m.images = catalog_mod.images.clone();
                m.file_size = file_size;
                m.folder_path = folder.clone();
                m.latest_version = Some(m.version.clone());
                m.latest_file_id = Some(location.file_id);
                m.latest_file_url = Some(location.download_url.clone());
                m.has_update = false;
                m.is_enabled = true;
                deployer.deploy(m);

                let placed = m.deployed_files.clone();
                let id = m.id.clone();
                restore_shared(deployer, mods, &placed, Some(id.as_str()));
                Ok(mods[idx].clone())
            })
        })
        .await
    }

    /// Replaces a mod's files with a downloaded update and redeploys it if
    /// it was enabled. Until the new files are in place nothing of the old
    /// install is touched; on failure the mod stays as it was.
    #[instrument(skip(self))]
    pub async fn apply_update(&self, mod_id: &str, archive: &Utf8Path) -> Result<InstalledMod, SError> {
        let current = self
            .registry
            .find(mod_id)
            .ok_or_else(|| SError::ModNotFound(mod_id.to_string()))?;
        let folder = if current.folder_path.as_str().is_empty() {
            self.mods_dir().join(FileUtils::sanitize_name(&current.name))
        } else {
            current.folder_path.clone()
        };

        let staging = self.mods_dir().join(format!(".update_{mod_id}"));
        let result = match self.stage(archive, &staging).await {
            Ok(()) => {
                let mod_id = mod_id.to_string();
                let staged = staging.clone();
                self.with_store(move |registry, deployer| {
                    swap_in_update(registry, deployer, &mod_id, &staged, &folder)
                })
                .await
            }
            Err(e) => Err(e),
        };

        if let Err(e) = &result {
            warn!("Update of {mod_id} failed, keeping the installed files: {e}");
            let leftover = staging.clone();
            let cleanup = run_blocking(move || {
                if leftover.exists() {
                    fs::remove_dir_all(&leftover)?;
                }
                Ok(())
            })
            .await;
            if let Err(e) = cleanup {
                warn!("Could not remove {staging}: {e}");
            }
        }
        result
    }

    /// Asks the catalog about every catalog-backed mod, at most five at a
    /// time. A mod whose lookup fails is skipped. Returns the ids that have
    /// an update.
    pub async fn check_for_updates(&self, catalog: &dyn ModCatalog) -> Vec<String> {
        let candidates: Vec<(String, u64)> = self
            .registry
            .load()
            .into_iter()
            .filter_map(|m| m.catalog_id.map(|cid| (m.id, cid)))
            .collect();
        if candidates.is_empty() {
            return Vec::new();
        }

        let releases: Vec<(String, CatalogRelease)> = stream::iter(candidates)
            .map(|(id, cid)| async move { (id, cid, catalog.fetch_latest_release(cid).await) })
            .buffer_unordered(UPDATE_CHECK_CONCURRENCY)
            .filter_map(|(id, cid, result)| async move {
                match result {
                    Ok(Some(release)) => Some((id, release)),
                    Ok(None) => None,
                    Err(e) => {
                        warn!("Update check for catalog mod {cid} failed: {e}");
                        None
                    }
                }
            })
            .collect()
            .await;

        let result = self.registry.update(|mods| {
            let mut updates = Vec::new();
            for m in mods.iter_mut() {
                let Some((_, release)) = releases.iter().find(|(id, _)| *id == m.id) else {
                    continue;
                };
                if !is_newer(m, release) {
                    continue;
                }
                m.has_update = true;
                m.latest_version = Some(release.version.clone());
                m.latest_file_id = Some(release.file_id);
                m.latest_file_url = Some(release.download_url.clone());
                updates.push(m.id.clone());
            }
            Ok(updates)
        });

        result.unwrap_or_else(|e| {
            error!("Failed to save update check results: {e}");
            Vec::new()
        })
    }

    /// Fills `folder` from `archive`, off the runtime threads.
    async fn stage(&self, archive: &Utf8Path, folder: &Utf8Path) -> Result<(), SError> {
        let target = folder.to_path_buf();
        run_blocking(move || {
            if target.exists() {
                fs::remove_dir_all(&target)?;
            }
            Ok(())
        })
        .await?;

        if archive.extension().is_some_and(|e| e.eq_ignore_ascii_case("zip")) {
            self.extractor.extract(archive, folder).await?;
        } else {
            let file_name = archive
                .file_name()
                .ok_or_else(|| SError::ParseError(format!("No file name in {archive}")))?
                .to_string();
            let (source, target) = (archive.to_path_buf(), folder.to_path_buf());
            run_blocking(move || {
                fs::create_dir_all(&target)?;
                fs::copy(&source, target.join(file_name))?;
                Ok(())
            })
            .await?;
        }

        let (source, target) = (archive.to_path_buf(), folder.to_path_buf());
        run_blocking(move || {
            if FileUtils::count_files(&target) == 0 {
                let _ = fs::remove_dir_all(&target);
                return Err(SError::NoUsableFiles(source.to_string()));
            }
            Ok(())
        })
        .await
    }

    /// Runs registry and deployment work on the blocking pool.
    async fn with_store<R, F>(&self, f: F) -> Result<R, SError>
    where
        F: FnOnce(&ModRegistry, &Deployer) -> Result<R, SError> + Send + 'static,
        R: Send + 'static,
    {
        let registry = self.registry.clone();
        let deployer = self.deployer.clone();
        run_blocking(move || f(&registry, &deployer)).await
    }

    fn undeploy_enabled(&self, mods: &mut [InstalledMod]) {
        for m in mods.iter_mut().filter(|m| m.is_enabled) {
            self.deployer.undeploy(m);
        }
    }

    /// Lowest priority first so higher priorities win shared destinations.
    fn deploy_enabled(&self, mods: &mut [InstalledMod]) {
        let mut order: Vec<usize> = (0..mods.len()).filter(|&i| mods[i].is_enabled).collect();
        order.sort_by_key(|&i| mods[i].priority);
        for i in order {
            self.deployer.deploy(&mut mods[i]);
        }
    }
}

/// Moves the staged update into the mod folder, then swaps the deployment
/// over. Fails without touching the registry entry or the old files.
fn swap_in_update(
    registry: &ModRegistry,
    deployer: &Deployer,
    mod_id: &str,
    staging: &Utf8Path,
    folder: &Utf8Path,
) -> Result<InstalledMod, SError> {
    registry.update(|mods| {
        let idx = position(mods, mod_id)?;
        linker::replace_dir(staging, folder)?;

        let m = &mut mods[idx];
        let mut touched = m.deployed_files.clone();
        deployer.undeploy(m);

        m.folder_path = folder.to_path_buf();
        m.file_size = FileUtils::folder_size(folder);
        if let Some(latest) = m.latest_version.clone() {
            m.version = latest;
        }
        m.has_update = false;
        if m.is_enabled {
            deployer.deploy(m);
        }
        info!("Updated {} to {}", m.name, m.version);

        touched.extend(m.deployed_files.iter().cloned());
        let redeployed = m.is_enabled.then(|| m.id.clone());
        restore_shared(deployer, mods, &touched, redeployed.as_deref());
        Ok(mods[idx].clone())
    })
}

/// Redeploys every enabled mod that also placed one of `touched`, lowest
/// priority first, so the highest priority owner of a shared destination
/// ends up on disk.
fn restore_shared(
    deployer: &Deployer,
    mods: &mut [InstalledMod],
    touched: &[Utf8PathBuf],
    just_deployed: Option<&str>,
) {
    if touched.is_empty() {
        return;
    }

    let mut owners: Vec<usize> = (0..mods.len())
        .filter(|&i| mods[i].is_enabled && mods[i].deployed_files.iter().any(|p| touched.contains(p)))
        .collect();
    if owners.is_empty() || (owners.len() == 1 && Some(mods[owners[0]].id.as_str()) == just_deployed) {
        return;
    }

    owners.sort_by_key(|&i| mods[i].priority);
    for i in owners {
        debug!("Restoring shared files of {}", mods[i].name);
        deployer.deploy(&mut mods[i]);
    }
}

async fn run_blocking<R, F>(f: F) -> Result<R, SError>
where
    F: FnOnce() -> Result<R, SError> + Send + 'static,
    R: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| SError::Unexpected(Some(format!("blocking task failed: {e}"))))?
}

fn state_word(enabled: bool) -> &'static str {
    if enabled {
        "enabled"
    } else {
        "disabled"
    }
}

fn position(mods: &[InstalledMod], mod_id: &str) -> Result<usize, SError> {
    mods.iter()
        .position(|m| m.id == mod_id)
        .ok_or_else(|| SError::ModNotFound(mod_id.to_string()))
}

fn next_priority(mods: &[InstalledMod]) -> i64 {
    mods.iter().map(|m| m.priority).max().unwrap_or(0) + 1
}

/// Index of the entry matching `pred`, inserting `fresh` when none does.
fn upsert<F>(mods: &mut Vec<InstalledMod>, pred: F, fresh: InstalledMod) -> usize
where
    F: Fn(&InstalledMod) -> bool,
{
    match mods.iter().position(pred) {
        Some(idx) => idx,
        None => {
            mods.push(fresh);
            mods.len() - 1
        }
    }
}

fn non_empty(preferred: &str, fallback: &str) -> String {
    if preferred.trim().is_empty() {
        fallback.to_string()
    } else {
        preferred.to_string()
    }
}

/// Highest priority first, ties by name.
fn by_load_order(a: &InstalledMod, b: &InstalledMod) -> Ordering {
    b.priority.cmp(&a.priority).then_with(|| a.name.cmp(&b.name))
}

/// Assigns `n, n-1, ..., 1` in the current order.
fn assign_dense(mods: &mut [InstalledMod]) -> bool {
    let n = mods.len() as i64;
    let mut changed = false;
    for (i, m) in mods.iter_mut().enumerate() {
        let p = n - i as i64;
        if m.priority != p {
            m.priority = p;
            changed = true;
        }
    }
    changed
}

/// Sorts into load order and densifies. Returns whether any priority moved.
pub fn reassign_priorities(mods: &mut [InstalledMod]) -> bool {
    mods.sort_by(by_load_order);
    assign_dense(mods)
}

fn is_newer(m: &InstalledMod, release: &CatalogRelease) -> bool {
    match m.latest_file_id {
        Some(known) => release.file_id > known,
        None => match (
            semver::Version::parse(release.version.trim_start_matches('v')),
            semver::Version::parse(m.version.trim_start_matches('v')),
        ) {
            (Ok(latest), Ok(current)) => latest > current,
            _ => release.version != m.version,
        },
    }
}
