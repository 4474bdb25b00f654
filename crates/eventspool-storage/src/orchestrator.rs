//! Batch file orchestration for one (feature, consent) root directory.
//!
//! The orchestrator decides which file the next event goes to, which file the
//! uploader gets next, and which files must go because they are too old or
//! the root is over its disk quota.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::batch::{BatchFile, BatchId};
use crate::config::FilePersistenceConfig;
use crate::error::StorageError;
use crate::file_ops;
use crate::lock_registry::LockedBatches;
use crate::metrics::{BatchClosedMetadata, MetricsDispatcher, RemovalReason};
use crate::time::TimeProvider;

#[derive(Debug, Default)]
struct WriterState {
    previous_file: Option<BatchFile>,
    previous_item_count: u64,
    last_access_ms: u64,
    last_cleanup_ms: Option<u64>,
}

/// Selects, rolls and evicts batch files under one root.
pub struct BatchFileOrchestrator {
    root_dir: PathBuf,
    config: FilePersistenceConfig,
    clock: Arc<dyn TimeProvider>,
    metrics: Arc<dyn MetricsDispatcher>,
    locks: Arc<LockedBatches>,
    pending_files: AtomicI64,
    state: Mutex<WriterState>,
}

impl BatchFileOrchestrator {
    /// Orchestrator for `root_dir`. The directory is created lazily.
    pub fn new(
        root_dir: PathBuf,
        config: FilePersistenceConfig,
        clock: Arc<dyn TimeProvider>,
        metrics: Arc<dyn MetricsDispatcher>,
        locks: Arc<LockedBatches>,
    ) -> Self {
        debug!(root = %root_dir.display(), "creating batch file orchestrator");
        Self {
            root_dir,
            config,
            clock,
            metrics,
            locks,
            pending_files: AtomicI64::new(0),
            state: Mutex::new(WriterState::default()),
        }
    }

    /// Root directory, `None` if it is unusable.
    pub fn root_dir(&self) -> Option<&Path> {
        self.is_root_dir_valid().then_some(self.root_dir.as_path())
    }

    /// Limits this orchestrator enforces.
    pub fn config(&self) -> &FilePersistenceConfig {
        &self.config
    }

    /// File the next event should be appended to.
    ///
    /// Reuses the last file while it is recent and below the size and item
    /// limits, unless `force_new_batch` is set. Returns `None` when the root
    /// is unusable or stays over quota after eviction.
    pub fn writable_file(&self, force_new_batch: bool) -> Option<BatchFile> {
        if !self.is_root_dir_valid() {
            return None;
        }
        // Registry lock is taken before the writer state, never while holding it.
        let locked = self.locks.locked_paths();
        let now = self.clock.now_ms();

        let cleanup_due = {
            let mut state = self.state.lock();
            let due = self.can_do_cleanup(&state, now);
            if due {
                state.last_cleanup_ms = Some(now);
            }
            due
        };
        // Deletions update the writer state themselves, so cleanup runs unlocked.
        // Only the obsolete scan is throttled; the quota holds on every call.
        let mut files = self.list_sorted_batch_files();
        if cleanup_due {
            files = self.delete_obsolete_files(files, &locked);
        }
        let size_on_disk = self.free_space_if_needed(&files, &locked);
        if size_on_disk > self.config.max_disk_space {
            let err = StorageError::QuotaExceeded {
                used: size_on_disk,
                limit: self.config.max_disk_space,
            };
            error!(root = %self.root_dir.display(), error = %err, "refusing writable file");
            return None;
        }

        let mut state = self.state.lock();
        if !force_new_batch {
            if let Some(file) = self.reusable_writable_file(&mut state, &locked, now) {
                return Some(file);
            }
        }
        Some(self.create_new_file(&mut state, force_new_batch, now))
    }

    /// Oldest batch that is not excluded, not recent and not the active writable file.
    pub fn readable_file(&self, exclude: &HashSet<PathBuf>) -> Option<BatchFile> {
        if !self.is_root_dir_valid() {
            return None;
        }
        let files = self.delete_obsolete_files(self.list_sorted_batch_files(), exclude);
        let now = self.clock.now_ms();
        let mut state = self.state.lock();
        state.last_cleanup_ms = Some(now);
        self.pending_files.store(files.len() as i64, Ordering::SeqCst);

        let read_threshold = now.saturating_sub(self.config.recent_read_delay_ms());
        let active = self.active_writable(&state, now).map(|f| f.path.clone());
        files.into_iter().find(|file| {
            !exclude.contains(&file.path)
                && file.id.created_at_ms() < read_threshold
                && active.as_ref() != Some(&file.path)
        })
    }

    /// Metadata file of `batch_file`. Pure path derivation; existence is the caller's concern.
    pub fn metadata_file(&self, batch_file: &Path) -> Option<PathBuf> {
        if batch_file.parent() != Some(self.root_dir.as_path()) {
            debug!(
                file = %batch_file.display(),
                root = %self.root_dir.display(),
                "batch file does not belong to this root"
            );
        }
        match BatchFile::from_path(batch_file.to_path_buf()) {
            Some(file) => Some(file.metadata_path()),
            None => {
                error!(file = %batch_file.display(), "not a batch file");
                None
            }
        }
    }

    /// Every batch file under the root, oldest first.
    pub fn all_files(&self) -> Vec<BatchFile> {
        if !self.is_root_dir_valid() {
            return Vec::new();
        }
        self.list_sorted_batch_files()
    }

    /// Files eligible for a final flush.
    pub fn flushable_files(&self) -> Vec<BatchFile> {
        self.all_files()
    }

    /// Decrements the approximate pending-file counter.
    pub fn decrement_and_get_pending_files_count(&self) -> i64 {
        self.pending_files.fetch_sub(1, Ordering::SeqCst) - 1
    }

    /// Approximate number of batch files waiting under the root.
    pub fn pending_files_count(&self) -> i64 {
        self.pending_files.load(Ordering::SeqCst)
    }

    /// Bookkeeping after a batch of this root was deleted elsewhere.
    pub fn on_file_deleted(&self, file: &BatchFile) -> i64 {
        let mut state = self.state.lock();
        if state.previous_file.as_ref() == Some(file) {
            state.previous_file = None;
            state.previous_item_count = 0;
        }
        self.decrement_and_get_pending_files_count()
    }

    /// Deletes a batch file and its metadata, reporting `reason`.
    ///
    /// Returns whether the batch file itself was removed.
    pub fn delete_batch(&self, file: &BatchFile, reason: RemovalReason) -> bool {
        let deleted = file_ops::delete_safe(&file.path);
        if deleted {
            let pending = self.on_file_deleted(file);
            self.metrics.batch_deleted(&file.path, reason, pending);
        } else {
            warn!(path = %file.path.display(), "failed to delete batch file");
        }
        let metadata = file.metadata_path();
        if file_ops::exists_safe(&metadata) && !file_ops::delete_safe(&metadata) {
            warn!(path = %metadata.display(), "failed to delete batch metadata file");
        }
        deleted
    }

    /// Deletes every batch file (locked or not). Returns how many were removed.
    pub fn delete_all_files(&self, reason: RemovalReason) -> usize {
        self.all_files()
            .iter()
            .filter(|file| self.delete_batch(file, reason))
            .count()
    }

    /// Moves a batch (and its metadata) from another root into this one, keeping it intact.
    pub fn import_batch(&self, source: &BatchFile) -> Option<BatchFile> {
        if !self.is_root_dir_valid() {
            return None;
        }
        let mut ts = source.id.created_at_ms();
        let mut target = BatchFile::in_dir(&self.root_dir, source.id.clone());
        while file_ops::exists_safe(&target.path) {
            ts += 1;
            target = BatchFile::in_dir(&self.root_dir, BatchId::from_timestamp(ts));
        }
        if !file_ops::move_safe(&source.path, &target.path) {
            warn!(from = %source.path.display(), to = %target.path.display(), "failed to move batch");
            return None;
        }
        let source_meta = source.metadata_path();
        if file_ops::exists_safe(&source_meta)
            && !file_ops::move_safe(&source_meta, &target.metadata_path())
        {
            warn!(path = %source_meta.display(), "failed to move batch metadata");
        }
        self.pending_files.fetch_add(1, Ordering::SeqCst);
        Some(target)
    }

    /// Bytes used by batch and metadata files under the root.
    pub fn size_on_disk(&self) -> u64 {
        self.all_files().iter().map(|f| self.batch_size(f)).sum()
    }

    fn batch_size(&self, file: &BatchFile) -> u64 {
        file_ops::length_safe(&file.path) + file_ops::length_safe(&file.metadata_path())
    }

    fn is_root_dir_valid(&self) -> bool {
        if file_ops::exists_safe(&self.root_dir) {
            if !file_ops::is_dir_safe(&self.root_dir) {
                error!(root = %self.root_dir.display(), "root is not a directory");
                false
            } else if !file_ops::can_write_safe(&self.root_dir) {
                error!(root = %self.root_dir.display(), "root is not writable");
                false
            } else {
                true
            }
        } else {
            let created = file_ops::mkdirs_safe(&self.root_dir);
            if !created {
                error!(root = %self.root_dir.display(), "root can't be created");
            }
            created
        }
    }

    fn can_do_cleanup(&self, state: &WriterState, now: u64) -> bool {
        match state.last_cleanup_ms {
            None => true,
            Some(last) => now.saturating_sub(last) >= self.config.cleanup_frequency_threshold_ms,
        }
    }

    fn active_writable<'s>(&self, state: &'s WriterState, now: u64) -> Option<&'s BatchFile> {
        let file = state.previous_file.as_ref()?;
        let write_threshold = now.saturating_sub(self.config.recent_write_delay_ms());
        (file.id.created_at_ms() >= write_threshold).then_some(file)
    }

    fn reusable_writable_file(
        &self,
        state: &mut WriterState,
        locked: &HashSet<PathBuf>,
        now: u64,
    ) -> Option<BatchFile> {
        let previous = state.previous_file.clone()?;
        if !file_ops::exists_safe(&previous.path) || locked.contains(&previous.path) {
            return None;
        }
        // A newer file means another writer touched the root; its item count is unknown.
        let latest = self.list_sorted_batch_files().pop()?;
        if latest != previous {
            return None;
        }

        let age = now.saturating_sub(previous.id.created_at_ms());
        let is_recent_enough = self.active_writable(state, now).is_some()
            && age < self.config.old_file_threshold_ms;
        let has_room_for_more = file_ops::length_safe(&previous.path) < self.config.max_batch_size;
        let has_slot_for_more = state.previous_item_count < self.config.max_items_per_batch;

        if is_recent_enough && has_room_for_more && has_slot_for_more {
            state.previous_item_count += 1;
            state.last_access_ms = now;
            Some(previous)
        } else {
            None
        }
    }

    fn create_new_file(&self, state: &mut WriterState, forced_new: bool, now: u64) -> BatchFile {
        let mut ts = now;
        if let Some(previous) = &state.previous_file {
            ts = ts.max(previous.id.created_at_ms() + 1);
        }
        let mut file = BatchFile::in_dir(&self.root_dir, BatchId::from_timestamp(ts));
        while file_ops::exists_safe(&file.path) {
            ts += 1;
            file = BatchFile::in_dir(&self.root_dir, BatchId::from_timestamp(ts));
        }

        if let Some(closed) = state.previous_file.take() {
            self.metrics.batch_closed(
                &closed.path,
                BatchClosedMetadata {
                    last_time_used_ms: state.last_access_ms,
                    events_count: state.previous_item_count,
                    forced_new,
                },
            );
        }
        debug!(path = %file.path.display(), forced_new, "rolled to new batch file");
        state.previous_file = Some(file.clone());
        state.previous_item_count = 1;
        state.last_access_ms = now;
        self.pending_files.fetch_add(1, Ordering::SeqCst);
        file
    }

    fn delete_obsolete_files(
        &self,
        files: Vec<BatchFile>,
        locked: &HashSet<PathBuf>,
    ) -> Vec<BatchFile> {
        let threshold = self
            .clock
            .now_ms()
            .saturating_sub(self.config.old_file_threshold_ms);
        files
            .into_iter()
            .filter(|file| {
                let is_old = file.id.created_at_ms() < threshold;
                if is_old && !locked.contains(&file.path) {
                    self.delete_batch(file, RemovalReason::Obsolete);
                    false
                } else {
                    true
                }
            })
            .collect()
    }

    /// Evicts oldest unlocked batches until the root fits its quota; returns the resulting size.
    fn free_space_if_needed(&self, files: &[BatchFile], locked: &HashSet<PathBuf>) -> u64 {
        let mut size_on_disk: u64 = files.iter().map(|f| self.batch_size(f)).sum();
        let max_disk_space = self.config.max_disk_space;
        if size_on_disk <= max_disk_space {
            return size_on_disk;
        }
        error!(
            root = %self.root_dir.display(),
            size_on_disk,
            max_disk_space,
            size_to_free = size_on_disk - max_disk_space,
            "too much disk space used, cleaning up"
        );
        for file in files {
            if size_on_disk <= max_disk_space {
                break;
            }
            if locked.contains(&file.path) {
                continue;
            }
            let size = self.batch_size(file);
            if self.delete_batch(file, RemovalReason::Purged) {
                size_on_disk = size_on_disk.saturating_sub(size);
            }
        }
        size_on_disk
    }

    fn list_sorted_batch_files(&self) -> Vec<BatchFile> {
        let mut files: Vec<BatchFile> = file_ops::list_files_safe(&self.root_dir)
            .unwrap_or_default()
            .into_iter()
            .filter_map(BatchFile::from_path)
            .filter(|f| file_ops::is_file_safe(&f.path))
            .collect();
        files.sort_by(|a, b| a.id.cmp(&b.id));
        files
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::StorageMetrics;
    use crate::time::ManualClock;
    use std::fs;
    use tempfile::{tempdir, TempDir};

    const START_MS: u64 = 1_700_000_000_000;

    struct Fixture {
        _dir: TempDir,
        root: PathBuf,
        clock: Arc<ManualClock>,
        metrics: Arc<StorageMetrics>,
        locks: Arc<LockedBatches>,
        orchestrator: BatchFileOrchestrator,
    }

    fn fixture(config: FilePersistenceConfig) -> Fixture {
        let dir = tempdir().unwrap();
        let root = dir.path().join("granted");
        let clock = Arc::new(ManualClock::new(START_MS));
        let metrics = Arc::new(StorageMetrics::new());
        let locks = Arc::new(LockedBatches::new());
        let orchestrator = BatchFileOrchestrator::new(
            root.clone(),
            config,
            clock.clone(),
            metrics.clone(),
            locks.clone(),
        );
        Fixture {
            _dir: dir,
            root,
            clock,
            metrics,
            locks,
            orchestrator,
        }
    }

    fn default_fixture() -> Fixture {
        fixture(FilePersistenceConfig::default())
    }

    fn touch(file: &BatchFile, bytes: usize) {
        fs::write(&file.path, vec![b'x'; bytes]).unwrap();
    }

    #[test]
    fn test_creates_root_and_names_file_by_time() {
        let f = default_fixture();
        let file = f.orchestrator.writable_file(false).unwrap();
        assert!(f.root.is_dir());
        assert_eq!(file.path, f.root.join(START_MS.to_string()));
        assert_eq!(f.orchestrator.pending_files_count(), 1);
    }

    #[test]
    fn test_root_that_is_a_file_is_invalid() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("granted");
        fs::write(&root, b"").unwrap();
        let orchestrator = BatchFileOrchestrator::new(
            root,
            FilePersistenceConfig::default(),
            Arc::new(ManualClock::new(START_MS)),
            Arc::new(StorageMetrics::new()),
            Arc::new(LockedBatches::new()),
        );
        assert!(orchestrator.writable_file(false).is_none());
        assert!(orchestrator.readable_file(&HashSet::new()).is_none());
        assert!(orchestrator.all_files().is_empty());
        assert!(orchestrator.root_dir().is_none());
    }

    #[test]
    fn test_reuses_recent_file() {
        let f = default_fixture();
        let first = f.orchestrator.writable_file(false).unwrap();
        touch(&first, 10);
        f.clock.advance_ms(100);
        let second = f.orchestrator.writable_file(false).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_force_new_batch_rolls() {
        let f = default_fixture();
        let first = f.orchestrator.writable_file(false).unwrap();
        touch(&first, 10);
        let second = f.orchestrator.writable_file(true).unwrap();
        assert_ne!(first, second);
        assert!(second.id > first.id);
        assert_eq!(f.metrics.closed_count(), 1);
    }

    #[test]
    fn test_rolls_when_file_too_old_for_writes() {
        let f = default_fixture();
        let first = f.orchestrator.writable_file(false).unwrap();
        touch(&first, 10);
        f.clock.advance_ms(f.orchestrator.config().recent_write_delay_ms() + 1);
        let second = f.orchestrator.writable_file(false).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_rolls_when_batch_full_of_items() {
        let f = fixture(FilePersistenceConfig {
            max_items_per_batch: 3,
            ..Default::default()
        });
        let first = f.orchestrator.writable_file(false).unwrap();
        touch(&first, 1);
        assert_eq!(f.orchestrator.writable_file(false).unwrap(), first);
        assert_eq!(f.orchestrator.writable_file(false).unwrap(), first);
        assert_ne!(f.orchestrator.writable_file(false).unwrap(), first);
    }

    #[test]
    fn test_rolls_when_batch_too_large() {
        let f = fixture(FilePersistenceConfig {
            max_batch_size: 100,
            max_item_size: 50,
            max_disk_space: 10_000,
            ..Default::default()
        });
        let first = f.orchestrator.writable_file(false).unwrap();
        touch(&first, 100);
        assert_ne!(f.orchestrator.writable_file(false).unwrap(), first);
    }

    #[test]
    fn test_name_collision_picks_next_millisecond() {
        let f = default_fixture();
        fs::create_dir_all(&f.root).unwrap();
        fs::write(f.root.join(START_MS.to_string()), b"foreign").unwrap();
        let file = f.orchestrator.writable_file(false).unwrap();
        assert_eq!(file.id.created_at_ms(), START_MS + 1);
    }

    #[test]
    fn test_readable_skips_recent_and_active_files() {
        let f = default_fixture();
        let file = f.orchestrator.writable_file(false).unwrap();
        touch(&file, 10);
        assert!(f.orchestrator.readable_file(&HashSet::new()).is_none());

        f.clock.advance_ms(f.orchestrator.config().recent_read_delay_ms() + 1);
        assert_eq!(f.orchestrator.readable_file(&HashSet::new()), Some(file));
    }

    #[test]
    fn test_readable_is_oldest_first_and_honours_exclusions() {
        let f = default_fixture();
        fs::create_dir_all(&f.root).unwrap();
        let older = BatchFile::in_dir(&f.root, BatchId::from_timestamp(START_MS - 20_000));
        let newer = BatchFile::in_dir(&f.root, BatchId::from_timestamp(START_MS - 10_000));
        touch(&newer, 1);
        touch(&older, 1);

        assert_eq!(f.orchestrator.readable_file(&HashSet::new()), Some(older.clone()));
        let exclude: HashSet<PathBuf> = [older.path.clone()].into_iter().collect();
        assert_eq!(f.orchestrator.readable_file(&exclude), Some(newer));
        assert_eq!(f.orchestrator.pending_files_count(), 2);
    }

    #[test]
    fn test_obsolete_files_are_deleted_with_metadata() {
        let f = default_fixture();
        fs::create_dir_all(&f.root).unwrap();
        let old = BatchFile::in_dir(&f.root, BatchId::from_timestamp(START_MS - 19 * 3_600_000));
        touch(&old, 5);
        fs::write(old.metadata_path(), b"meta").unwrap();

        assert!(f.orchestrator.readable_file(&HashSet::new()).is_none());
        assert!(!old.path.exists());
        assert!(!old.metadata_path().exists());
        assert_eq!(f.metrics.deleted_count(RemovalReason::Obsolete), 1);
    }

    #[test]
    fn test_locked_obsolete_file_survives() {
        let f = default_fixture();
        fs::create_dir_all(&f.root).unwrap();
        let old = BatchFile::in_dir(&f.root, BatchId::from_timestamp(START_MS - 19 * 3_600_000));
        touch(&old, 5);
        f.locks.try_lock(&old);

        f.orchestrator.writable_file(false).unwrap();
        assert!(old.path.exists());
    }

    #[test]
    fn test_quota_evicts_oldest_unlocked_first() {
        let f = fixture(FilePersistenceConfig {
            max_batch_size: 100,
            max_item_size: 100,
            max_disk_space: 250,
            ..Default::default()
        });
        fs::create_dir_all(&f.root).unwrap();
        let files: Vec<BatchFile> = (1..=4)
            .map(|i| BatchFile::in_dir(&f.root, BatchId::from_timestamp(START_MS - 10_000 + i)))
            .collect();
        for file in &files {
            touch(file, 100);
        }
        f.locks.try_lock(&files[0]);

        assert!(f.orchestrator.writable_file(false).is_some());
        assert!(files[0].path.exists(), "locked batch must survive eviction");
        assert!(!files[1].path.exists());
        assert!(!files[2].path.exists());
        assert!(files[3].path.exists());
        assert!(f.orchestrator.size_on_disk() <= 250);
        assert_eq!(f.metrics.deleted_count(RemovalReason::Purged), 2);
    }

    #[test]
    fn test_quota_unsatisfiable_returns_none() {
        let f = fixture(FilePersistenceConfig {
            max_batch_size: 100,
            max_item_size: 100,
            max_disk_space: 100,
            ..Default::default()
        });
        fs::create_dir_all(&f.root).unwrap();
        let a = BatchFile::in_dir(&f.root, BatchId::from_timestamp(START_MS - 10_000));
        let b = BatchFile::in_dir(&f.root, BatchId::from_timestamp(START_MS - 9_000));
        touch(&a, 100);
        touch(&b, 100);
        f.locks.try_lock(&a);
        f.locks.try_lock(&b);

        assert!(f.orchestrator.writable_file(false).is_none());
        assert!(a.path.exists() && b.path.exists());
    }

    #[test]
    fn test_quota_enforced_while_reader_polls() {
        let f = fixture(FilePersistenceConfig {
            max_batch_size: 100,
            max_item_size: 100,
            max_disk_space: 250,
            ..Default::default()
        });
        // Prime the cleanup throttle so the obsolete scan is not due below.
        f.orchestrator.readable_file(&HashSet::new());
        fs::create_dir_all(&f.root).unwrap();
        for i in 1..=4 {
            touch(
                &BatchFile::in_dir(&f.root, BatchId::from_timestamp(START_MS - 10_000 + i)),
                100,
            );
        }

        for _ in 0..20 {
            f.orchestrator.readable_file(&HashSet::new());
            f.clock.advance_ms(500);
            f.orchestrator.writable_file(false);
            f.clock.advance_ms(500);
            assert!(f.orchestrator.size_on_disk() <= 250);
        }
        assert!(f.metrics.deleted_count(RemovalReason::Purged) >= 2);
    }

    #[test]
    fn test_quota_refusal_is_not_throttled() {
        let f = fixture(FilePersistenceConfig {
            max_batch_size: 100,
            max_item_size: 100,
            max_disk_space: 100,
            ..Default::default()
        });
        fs::create_dir_all(&f.root).unwrap();
        let a = BatchFile::in_dir(&f.root, BatchId::from_timestamp(START_MS - 10_000));
        let b = BatchFile::in_dir(&f.root, BatchId::from_timestamp(START_MS - 9_000));
        touch(&a, 100);
        touch(&b, 100);
        f.locks.try_lock(&a);
        f.locks.try_lock(&b);

        assert!(f.orchestrator.writable_file(false).is_none());
        f.clock.advance_ms(1);
        assert!(f.orchestrator.writable_file(false).is_none());
        assert!(f.orchestrator.writable_file(true).is_none());
    }

    #[test]
    fn test_metadata_file_derivation() {
        let f = default_fixture();
        let batch = f.root.join("12345");
        assert_eq!(
            f.orchestrator.metadata_file(&batch),
            Some(f.root.join("12345_metadata"))
        );
        assert!(f.orchestrator.metadata_file(&f.root.join("notabatch")).is_none());
    }

    #[test]
    fn test_metadata_files_are_not_listed() {
        let f = default_fixture();
        fs::create_dir_all(&f.root).unwrap();
        let batch = BatchFile::in_dir(&f.root, BatchId::from_timestamp(START_MS - 1));
        touch(&batch, 1);
        fs::write(batch.metadata_path(), b"m").unwrap();
        fs::write(f.root.join("garbage"), b"m").unwrap();
        assert_eq!(f.orchestrator.all_files(), vec![batch.clone()]);
        assert_eq!(f.orchestrator.flushable_files(), vec![batch]);
    }

    #[test]
    fn test_import_batch_moves_file_and_metadata() {
        let f = default_fixture();
        let other = tempdir().unwrap();
        let source = BatchFile::in_dir(other.path(), BatchId::from_timestamp(START_MS - 5));
        touch(&source, 3);
        fs::write(source.metadata_path(), b"m").unwrap();

        let imported = f.orchestrator.import_batch(&source).unwrap();
        assert_eq!(imported.path, f.root.join((START_MS - 5).to_string()));
        assert!(!source.path.exists());
        assert_eq!(fs::read(&imported.path).unwrap(), b"xxx");
        assert_eq!(fs::read(imported.metadata_path()).unwrap(), b"m");
    }

    #[test]
    fn test_import_batch_avoids_overwrite() {
        let f = default_fixture();
        fs::create_dir_all(&f.root).unwrap();
        let existing = BatchFile::in_dir(&f.root, BatchId::from_timestamp(START_MS - 5));
        touch(&existing, 1);
        let other = tempdir().unwrap();
        let source = BatchFile::in_dir(other.path(), BatchId::from_timestamp(START_MS - 5));
        touch(&source, 2);

        let imported = f.orchestrator.import_batch(&source).unwrap();
        assert_eq!(imported.id.created_at_ms(), START_MS - 4);
        assert_eq!(fs::read(&existing.path).unwrap(), b"x");
    }

    #[test]
    fn test_delete_all_files() {
        let f = default_fixture();
        fs::create_dir_all(&f.root).unwrap();
        for i in 0..3 {
            touch(&BatchFile::in_dir(&f.root, BatchId::from_timestamp(START_MS - i)), 1);
        }
        assert_eq!(f.orchestrator.delete_all_files(RemovalReason::Flushed), 3);
        assert!(f.orchestrator.all_files().is_empty());
    }

    #[test]
    fn test_pending_counter_decrements() {
        let f = default_fixture();
        let file = f.orchestrator.writable_file(false).unwrap();
        touch(&file, 1);
        assert_eq!(f.orchestrator.pending_files_count(), 1);
        assert!(f.orchestrator.delete_batch(&file, RemovalReason::IntakeCode(202)));
        assert_eq!(f.orchestrator.pending_files_count(), 0);
        assert_eq!(f.orchestrator.decrement_and_get_pending_files_count(), -1);
    }
}
