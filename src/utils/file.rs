use camino::Utf8Path;
use tracing::debug;
use walkdir::WalkDir;

pub struct FileUtils;

impl FileUtils {
    /// Total size of the regular files below `root`. Entries that cannot be
    /// read are skipped.
    pub fn folder_size(root: &Utf8Path) -> u64 {
        WalkDir::new(root)
            .into_iter()
            .filter_map(|e| match e {
                Ok(entry) => Some(entry),
                Err(err) => {
                    debug!("skipping unreadable entry while sizing {root}: {err}");
                    None
                }
            })
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| e.metadata().ok())
            .map(|m| m.len())
            .sum()
    }

    /// Counts regular files below `root`.
    pub fn count_files(root: &Utf8Path) -> usize {
        WalkDir::new(root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .count()
    }

    /// Turns a display name into a folder name: anything outside
    /// `[A-Za-z0-9]` becomes `_`.
    pub fn sanitize_name(name: &str) -> String {
        let cleaned: String = name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        if cleaned.is_empty() {
            "mod".to_string()
        } else {
            cleaned
        }
    }

    /// Deletes a file, treating "already gone" as success.
    pub fn remove_file_if_exists(path: &Utf8Path) -> std::io::Result<()> {
        match std::fs::remove_file(path) {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}
