use crate::models::error::SError;
use camino::Utf8Path;
use regex::{Captures, Regex};
use std::fs;
use tracing::debug;

/// Sets `name` to enabled (`1`) or disabled (`0`) in the script loader's
/// `mods.txt`. An existing line is rewritten in place, otherwise one is
/// appended. A missing manifest is created.
pub fn set_entry(manifest: &Utf8Path, name: &str, enabled: bool) -> Result<(), SError> {
    let content = match fs::read_to_string(manifest) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e.into()),
    };

    let updated = apply_entry(&content, name, enabled)?;

    if let Some(parent) = manifest.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(manifest, updated)?;

    debug!("mods.txt: {name} : {}", u8::from(enabled));
    Ok(())
}

fn apply_entry(content: &str, name: &str, enabled: bool) -> Result<String, SError> {
    let line = format!("{name} : {}", u8::from(enabled));
    let pattern = Regex::new(&format!(r"(?m)^[ \t]*{}[ \t]*:[ \t]*\d+[ \t]*(\r?)$", regex::escape(name)))
        .map_err(|e| SError::ParseError(e.to_string()))?;

    if pattern.is_match(content) {
        // Closure replacer: names may contain `$`, and the line ending stays.
        let out = pattern.replace(content, |caps: &Captures| format!("{line}{}", &caps[1]));
        return Ok(out.into_owned());
    }

    let newline = if content.contains("\r\n") { "\r\n" } else { "\n" };
    let mut out = content.to_string();
    if !out.is_empty() && !out.ends_with('\n') {
        out.push_str(newline);
    }
    out.push_str(&line);
    out.push_str(newline);
    Ok(out)
}
