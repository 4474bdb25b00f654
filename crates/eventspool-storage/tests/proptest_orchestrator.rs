//! Property-based tests for batch file orchestration.

use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use eventspool_storage::{
    BatchFileOrchestrator, FilePersistenceConfig, LockedBatches, ManualClock,
    NoOpMetricsDispatcher,
};
use proptest::prelude::*;
use tempfile::tempdir;

const START_MS: u64 = 1_700_000_000_000;

#[derive(Debug, Clone)]
enum Step {
    Write { bytes: usize, force_new: bool },
    Advance(u64),
    Read,
}

fn any_step() -> impl Strategy<Value = Step> {
    prop_oneof![
        4 => (1usize..300, any::<bool>()).prop_map(|(bytes, force_new)| Step::Write { bytes, force_new }),
        2 => (0u64..8_000).prop_map(Step::Advance),
        1 => Just(Step::Read),
    ]
}

fn append(path: &PathBuf, bytes: usize) {
    let mut file = OpenOptions::new().create(true).append(true).open(path).unwrap();
    file.write_all(&vec![b'x'; bytes]).unwrap();
}

proptest! {
    /// The readable selector never hands out the file currently used for writes,
    /// nor a batch that is already locked.
    #[test]
    fn test_readable_never_returns_writable_or_locked(steps in proptest::collection::vec(any_step(), 1..60)) {
        let dir = tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(START_MS));
        let locks = Arc::new(LockedBatches::new());
        let orchestrator = BatchFileOrchestrator::new(
            dir.path().join("granted"),
            FilePersistenceConfig::default(),
            clock.clone(),
            Arc::new(NoOpMetricsDispatcher),
            locks.clone(),
        );

        let mut last_writable: Option<(PathBuf, u64)> = None;
        let write_window = orchestrator.config().recent_write_delay_ms();
        for step in steps {
            match step {
                Step::Write { bytes, force_new } => {
                    let file = orchestrator.writable_file(force_new).unwrap();
                    prop_assert!(!locks.is_locked(&file.id));
                    append(&file.path, bytes);
                    last_writable = Some((file.path, file.id.created_at_ms()));
                }
                Step::Advance(ms) => clock.advance_ms(ms),
                Step::Read => {
                    if let Some(file) = locks.lock_next(|exclude| orchestrator.readable_file(exclude)) {
                        if let Some((path, created)) = &last_writable {
                            if *path == file.path {
                                prop_assert!(created + write_window < clock_now(&clock));
                            }
                        }
                    }
                }
            }
        }
    }

    /// After a writable file is granted, the root fits its quota and locked
    /// batches are still on disk, even between throttled cleanup passes.
    #[test]
    fn test_quota_holds_and_spares_locked(
        sizes in proptest::collection::vec(50usize..200, 5..30),
        lock_every in 2usize..5,
    ) {
        let dir = tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(START_MS));
        let locks = Arc::new(LockedBatches::new());
        let config = FilePersistenceConfig {
            max_batch_size: 200,
            max_item_size: 200,
            max_disk_space: 2_000,
            ..Default::default()
        };
        let orchestrator = BatchFileOrchestrator::new(
            dir.path().join("granted"),
            config,
            clock.clone(),
            Arc::new(NoOpMetricsDispatcher),
            locks.clone(),
        );

        let mut locked = HashSet::new();
        for (i, size) in sizes.into_iter().enumerate() {
            if let Some(file) = orchestrator.writable_file(true) {
                prop_assert!(orchestrator.size_on_disk() <= 2_000);
                append(&file.path, size);
                if i % lock_every == 0 && locked.len() < 5 && locks.try_lock(&file) {
                    locked.insert(file.path.clone());
                }
            }
            clock.advance_ms(1);
        }
        for path in &locked {
            prop_assert!(path.exists());
        }
    }
}

fn clock_now(clock: &ManualClock) -> u64 {
    use eventspool_storage::TimeProvider;
    clock.now_ms()
}
