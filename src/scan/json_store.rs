//! JSON document files replaced atomically (write temp file, then rename).

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::Path;

use crate::error::ScanResult;

/// Load `path`, or `T::default()` if the file does not exist yet.
pub fn load_or_default<T: DeserializeOwned + Default>(path: &Path) -> ScanResult<T> {
    match fs::read_to_string(path) {
        Ok(json) if json.trim().is_empty() => Ok(T::default()),
        Ok(json) => Ok(serde_json::from_str(&json)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(e) => Err(e.into()),
    }
}

/// Serialize `value` to `path`. Readers see either the old or the new document.
pub fn store<T: Serialize>(path: &Path, value: &T) -> ScanResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
