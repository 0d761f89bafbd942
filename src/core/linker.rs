use camino::{Utf8Path, Utf8PathBuf};
use file_id::FileId;
use std::fs;
use std::io;
use tracing::{debug, warn};
use walkdir::WalkDir;

#[cfg(unix)]
const CROSS_DEVICE: i32 = 18; // EXDEV
#[cfg(windows)]
const CROSS_DEVICE: i32 = 17; // ERROR_NOT_SAME_DEVICE

/// How a file ended up at its destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Linked,
    Copied,
    /// Destination already was the source file.
    Unchanged,
}

pub fn get_id(path: &Utf8Path) -> io::Result<FileId> {
    file_id::get_file_id(path)
}

pub fn is_same_file(a: &Utf8Path, b: &Utf8Path) -> bool {
    match (get_id(a), get_id(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

pub fn is_cross_device(err: &io::Error) -> bool {
    #[cfg(any(unix, windows))]
    {
        err.raw_os_error() == Some(CROSS_DEVICE)
    }
    #[cfg(not(any(unix, windows)))]
    {
        let _ = err;
        false
    }
}

/// Hard links `source` to `target`, replacing whatever was there.
/// Falls back to a copy only when the two paths live on different devices.
pub fn place(source: &Utf8Path, target: &Utf8Path) -> io::Result<Placement> {
    place_with(source, target, |s, t| fs::hard_link(s, t))
}

/// `place` with an injectable link primitive.
pub fn place_with<F>(source: &Utf8Path, target: &Utf8Path, link: F) -> io::Result<Placement>
where
    F: FnOnce(&Utf8Path, &Utf8Path) -> io::Result<()>,
{
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }

    if target.exists() || target.is_symlink() {
        if is_same_file(source, target) {
            return Ok(Placement::Unchanged);
        }
        fs::remove_file(target)?;
    }

    match link(source, target) {
        Ok(()) => Ok(Placement::Linked),
        Err(e) if is_cross_device(&e) => {
            debug!("Cross-device link for {target}, copying instead");
            fs::copy(source, target)?;
            Ok(Placement::Copied)
        }
        Err(e) => Err(e),
    }
}

/// Removes a deployed file. Missing targets are not an error.
pub fn unlink(target: &Utf8Path) -> io::Result<()> {
    if !target.exists() && !target.is_symlink() {
        return Ok(());
    }

    let meta = fs::symlink_metadata(target)?;
    if meta.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("Refusing to unlink directory {target}"),
        ));
    }

    fs::remove_file(target)
}

/// Moves a directory. Across devices the tree is copied and the source
/// removed afterwards.
pub fn move_dir(source: &Utf8Path, target: &Utf8Path) -> io::Result<()> {
    move_dir_with(source, target, |s, t| fs::rename(s, t))
}

/// `move_dir` with an injectable rename primitive.
pub fn move_dir_with<F>(source: &Utf8Path, target: &Utf8Path, rename: F) -> io::Result<()>
where
    F: FnOnce(&Utf8Path, &Utf8Path) -> io::Result<()>,
{
    match rename(source, target) {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device(&e) => {
            debug!("Cross-device move of {source}, copying instead");
            if let Err(e) = copy_tree(source, target) {
                let _ = fs::remove_dir_all(target);
                return Err(e);
            }
            fs::remove_dir_all(source)
        }
        Err(e) => Err(e),
    }
}

/// Puts `staging` in place of `target`. The old `target` is parked next to
/// it and only deleted once the new tree is in place; on failure it is put
/// back and `target` is left as it was.
pub fn replace_dir(staging: &Utf8Path, target: &Utf8Path) -> io::Result<()> {
    replace_dir_with(staging, target, move_dir)
}

/// `replace_dir` with an injectable move primitive.
pub fn replace_dir_with<F>(staging: &Utf8Path, target: &Utf8Path, mover: F) -> io::Result<()>
where
    F: FnOnce(&Utf8Path, &Utf8Path) -> io::Result<()>,
{
    let parked = parked_path(target);
    let had_old = target.exists();
    if had_old {
        if parked.exists() {
            fs::remove_dir_all(&parked)?;
        }
        fs::rename(target, &parked)?;
    }

    match mover(staging, target) {
        Ok(()) => {
            if had_old {
                if let Err(e) = fs::remove_dir_all(&parked) {
                    warn!("Could not delete old files at {parked}: {e}");
                }
            }
            Ok(())
        }
        Err(e) => {
            if target.exists() {
                let _ = fs::remove_dir_all(target);
            }
            if had_old {
                if let Err(restore) = fs::rename(&parked, target) {
                    warn!("Could not restore {target} from {parked}: {restore}");
                }
            }
            Err(e)
        }
    }
}

fn parked_path(target: &Utf8Path) -> Utf8PathBuf {
    let name = target.file_name().unwrap_or("mod");
    target.with_file_name(format!(".{name}.old"))
}

fn copy_tree(source: &Utf8Path, target: &Utf8Path) -> io::Result<()> {
    for entry in WalkDir::new(source) {
        let entry = entry.map_err(io::Error::from)?;
        let rel = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let dest = target.as_std_path().join(rel);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&dest)?;
        } else {
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &dest)?;
        }
    }
    Ok(())
}
