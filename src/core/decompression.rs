use crate::core::ports::ArchiveExtractor;
use crate::models::error::SError;
use async_trait::async_trait;
use camino::Utf8Path;
use std::fs::{self, File};
use std::io;
use tracing::{debug, warn};

/// Zip extraction on the blocking pool.
#[derive(Debug, Default, Clone, Copy)]
pub struct ZipExtractor;

#[async_trait]
impl ArchiveExtractor for ZipExtractor {
    async fn extract(&self, archive: &Utf8Path, destination: &Utf8Path) -> Result<(), SError> {
        let archive = archive.to_path_buf();
        let destination = destination.to_path_buf();

        tokio::task::spawn_blocking(move || extract_zip(&archive, &destination))
            .await
            .map_err(|e| SError::Extraction(e.to_string()))?
    }
}

pub fn extract_zip(archive_path: &Utf8Path, destination: &Utf8Path) -> Result<(), SError> {
    let file = File::open(archive_path)?;
    let mut archive = zip::ZipArchive::new(file)?;

    fs::create_dir_all(destination)?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;

        // enclosed_name rejects absolute paths and `..` escapes
        let Some(safe_path) = entry.enclosed_name() else {
            warn!("Skipping unsafe entry {:?} in {archive_path}", entry.name());
            continue;
        };

        let output_path = destination.as_std_path().join(&safe_path);

        if entry.is_dir() {
            fs::create_dir_all(&output_path)?;
        } else {
            if let Some(parent) = output_path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut outfile = File::create(&output_path)?;
            io::copy(&mut entry, &mut outfile)?;
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = entry.unix_mode() {
                let _ = fs::set_permissions(&output_path, fs::Permissions::from_mode(mode));
            }
        }
    }

    debug!("Extracted {} entries from {archive_path}", archive.len());
    Ok(())
}
