//! In-memory registry of batches checked out for reading.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::batch::{BatchFile, BatchId};

/// Batches currently handed to a reader.
///
/// Membership is the only thing that keeps a batch file away from the writer,
/// from a second reader and from eviction, so every check-and-insert happens
/// under one mutex.
#[derive(Debug, Default)]
pub struct LockedBatches {
    locked: Mutex<HashMap<BatchId, PathBuf>>,
}

impl LockedBatches {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks `file`. Returns `false` if it was already locked.
    pub fn try_lock(&self, file: &BatchFile) -> bool {
        let mut locked = self.locked.lock();
        if locked.contains_key(&file.id) {
            return false;
        }
        locked.insert(file.id.clone(), file.path.clone());
        true
    }

    /// Picks a batch with `select` (given the currently locked paths) and locks it,
    /// atomically with respect to every other registry call.
    pub fn lock_next<F>(&self, select: F) -> Option<BatchFile>
    where
        F: FnOnce(&HashSet<PathBuf>) -> Option<BatchFile>,
    {
        let mut locked = self.locked.lock();
        let exclude: HashSet<PathBuf> = locked.values().cloned().collect();
        let file = select(&exclude)?;
        if locked.contains_key(&file.id) {
            return None;
        }
        locked.insert(file.id.clone(), file.path.clone());
        debug!(batch = %file.id, "batch locked for reading");
        Some(file)
    }

    /// Releases `id`, returning the path it was locked with.
    pub fn release(&self, id: &BatchId) -> Option<PathBuf> {
        let released = self.locked.lock().remove(id);
        if released.is_none() {
            warn!(batch = %id, "release requested for a batch that is not locked");
        }
        released
    }

    /// Whether `id` is locked.
    pub fn is_locked(&self, id: &BatchId) -> bool {
        self.locked.lock().contains_key(id)
    }

    /// Paths of every locked batch.
    pub fn locked_paths(&self) -> HashSet<PathBuf> {
        self.locked.lock().values().cloned().collect()
    }

    /// Releases everything, returning what was locked.
    pub fn release_all(&self) -> Vec<BatchFile> {
        self.locked
            .lock()
            .drain()
            .map(|(id, path)| BatchFile { id, path })
            .collect()
    }

    /// Number of locked batches.
    pub fn len(&self) -> usize {
        self.locked.lock().len()
    }

    /// Whether nothing is locked.
    pub fn is_empty(&self) -> bool {
        self.locked.lock().is_empty()
    }
}
