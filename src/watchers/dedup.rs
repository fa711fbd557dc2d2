use crate::utils::fs::{read_json, write_json_atomic};
use anyhow::Result;
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};

pub const DEFAULT_DEDUP_CAPACITY: usize = 10_000;

/// Persisted set of ids a watcher has already turned into tasks. Bounded to
/// the most recent `capacity` ids; oldest ids are evicted first.
#[derive(Debug)]
pub struct DedupStore {
    path: PathBuf,
    capacity: usize,
    order: VecDeque<String>,
    seen: HashSet<String>,
}

impl DedupStore {
    pub fn path_for(state_dir: &Path, watcher: &str) -> PathBuf {
        state_dir.join("dedup").join(format!("{watcher}.json"))
    }

    pub fn load(path: impl Into<PathBuf>, capacity: usize) -> Result<Self> {
        let path = path.into();
        let ids: Vec<String> = read_json(&path)?.unwrap_or_default();
        let mut store = Self {
            path,
            capacity: capacity.max(1),
            order: VecDeque::with_capacity(ids.len()),
            seen: HashSet::with_capacity(ids.len()),
        };
        for id in ids {
            store.remember(id);
        }
        Ok(store)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    fn remember(&mut self, id: String) -> bool {
        if !self.seen.insert(id.clone()) {
            return false;
        }
        self.order.push_back(id);
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.seen.remove(&evicted);
            }
        }
        true
    }

    /// Record `id` and persist the set before returning.
    pub fn insert(&mut self, id: &str) -> Result<()> {
        if self.remember(id.to_string()) {
            self.persist()?;
        }
        Ok(())
    }

    pub fn persist(&self) -> Result<()> {
        write_json_atomic(&self.path, &self.order)
    }
}
