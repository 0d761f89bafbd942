use crate::models::error::SError;
use camino::Utf8Path;

pub struct Json;

impl Json {
    /// Writes pretty JSON through a sibling temp file so a crash mid-write
    /// never leaves a truncated document behind.
    pub fn write<T: serde::Serialize>(path: &Utf8Path, data: &T) -> Result<(), SError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let text = serde_json::to_string_pretty(data)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, text)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn read<T: serde::de::DeserializeOwned>(path: &Utf8Path) -> Result<T, SError> {
        let s = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str::<T>(&s)?)
    }
}
