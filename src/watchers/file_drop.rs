use super::traits::{Source, WatchItem};
use crate::utils::fs::is_hidden;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::future::Future;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::pin::Pin;

const PREVIEW_BYTES: u64 = 4_096;

/// Lists a drop directory. Each visible file is one item whose id is derived
/// from name, size and modification time, so a rewritten file is new again.
pub struct FileDropSource {
    name: String,
    dir: PathBuf,
}

impl FileDropSource {
    pub fn new(name: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            dir: dir.into(),
        }
    }

    fn scan(dir: &Path) -> Result<Vec<WatchItem>> {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => {
                return Err(error).with_context(|| format!("failed to list {}", dir.display()));
            }
        };

        let mut items = Vec::new();
        for entry in entries.filter_map(std::result::Result::ok) {
            let path = entry.path();
            if is_hidden(&path) {
                continue;
            }
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }
            let file_name = entry.file_name().to_string_lossy().into_owned();
            let modified: Option<DateTime<Utc>> = metadata.modified().ok().map(DateTime::from);

            let mut hasher = Sha256::new();
            hasher.update(file_name.as_bytes());
            hasher.update(metadata.len().to_le_bytes());
            hasher.update(
                modified
                    .map(|at| at.timestamp_nanos_opt().unwrap_or_default())
                    .unwrap_or_default()
                    .to_le_bytes(),
            );

            items.push(WatchItem {
                id: hex::encode(&hasher.finalize()[..12]),
                source: path.display().to_string(),
                subject: file_name,
                body: preview(&path, metadata.len()),
                received_at: modified,
                extra: [(
                    "size_bytes".to_string(),
                    serde_json::Value::from(metadata.len()),
                )]
                .into_iter()
                .collect(),
            });
        }
        items.sort_by(|a, b| a.received_at.cmp(&b.received_at).then(a.subject.cmp(&b.subject)));
        Ok(items)
    }
}

fn preview(path: &Path, len: u64) -> String {
    let mut buffer = Vec::new();
    let read = std::fs::File::open(path)
        .and_then(|file| file.take(PREVIEW_BYTES).read_to_end(&mut buffer));
    if let Err(error) = read {
        return format!("[unreadable: {error}]");
    }
    if buffer.contains(&0) {
        return format!("[binary file, {len} bytes]");
    }
    let mut text = String::from_utf8_lossy(&buffer).into_owned();
    if len > PREVIEW_BYTES {
        text.push_str("\n\n[preview truncated]");
    }
    text
}

impl Source for FileDropSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<Vec<WatchItem>>> + Send + 'a>> {
        Box::pin(async move {
            let dir = self.dir.clone();
            tokio::task::spawn_blocking(move || Self::scan(&dir))
                .await
                .context("file drop scan panicked")?
        })
    }
}
