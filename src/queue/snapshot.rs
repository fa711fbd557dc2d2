use crate::utils::fs::is_hidden;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStamp {
    pub len: u64,
    pub modified: Option<SystemTime>,
}

/// Visible files of one directory at one instant, keyed by file name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirSnapshot {
    files: BTreeMap<String, FileStamp>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub changed: Vec<String>,
}

impl SnapshotDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

impl DirSnapshot {
    /// A missing directory snapshots as empty.
    pub fn capture(dir: &Path) -> std::io::Result<Self> {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(error) => return Err(error),
        };

        let mut files = BTreeMap::new();
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if is_hidden(&path) {
                continue;
            }
            // Entries can vanish between listing and stat; skip them.
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                files.insert(
                    name.to_string(),
                    FileStamp {
                        len: metadata.len(),
                        modified: metadata.modified().ok(),
                    },
                );
            }
        }
        Ok(Self { files })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.files.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    /// What changed going from `self` (older) to `newer`.
    pub fn diff(&self, newer: &DirSnapshot) -> SnapshotDiff {
        let mut diff = SnapshotDiff::default();
        for (name, stamp) in &newer.files {
            match self.files.get(name) {
                None => diff.added.push(name.clone()),
                Some(previous) if previous != stamp => diff.changed.push(name.clone()),
                Some(_) => {}
            }
        }
        diff.removed = self
            .files
            .keys()
            .filter(|name| !newer.files.contains_key(*name))
            .cloned()
            .collect();
        diff
    }
}

/// Polled change detection for one directory. The first poll diffs against
/// an empty snapshot, so a backlog present at startup is reported as added.
#[derive(Debug)]
pub struct DirectoryPoller {
    dir: PathBuf,
    previous: DirSnapshot,
}

impl DirectoryPoller {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            previous: DirSnapshot::default(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn poll(&mut self) -> std::io::Result<SnapshotDiff> {
        let current = DirSnapshot::capture(&self.dir)?;
        let diff = self.previous.diff(&current);
        self.previous = current;
        Ok(diff)
    }

    /// Drop `name` from the remembered snapshot so it is reported as added
    /// again on the next poll if it is still present.
    pub fn forget(&mut self, name: &str) {
        self.previous.files.remove(name);
    }
}
