use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Dot-prefixed sibling used as the staging file for `path`. Scanners skip
/// dot-files, so a half-written temp is never mistaken for a real entry.
pub fn temp_path_for(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4().simple()))
}

/// Replace `path` with `content` in one rename. Readers observe either the
/// old or the new content, never a partial write.
pub fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed creating parent: {}", parent.display()))?;
    }

    let temp_path = temp_path_for(path);
    fs::write(&temp_path, content)
        .with_context(|| format!("failed writing temp file: {}", temp_path.display()))?;

    if let Err(rename_error) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(rename_error)
            .with_context(|| format!("failed replacing file atomically: {}", path.display()));
    }

    Ok(())
}

/// Serialize `value` as pretty JSON and [`write_atomic`] it.
pub fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let data = serde_json::to_vec_pretty(value).context("failed to serialize state")?;
    write_atomic(path, &data)
}

/// Read a JSON state file, returning `None` when it does not exist yet.
pub fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read(path) {
        Ok(data) => serde_json::from_slice(&data)
            .map(Some)
            .with_context(|| format!("failed parsing {}", path.display())),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(error) => Err(error).with_context(|| format!("failed reading {}", path.display())),
    }
}

pub fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with('.'))
}
