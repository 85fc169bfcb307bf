//! End-to-end buffer manager scenarios: pinning, eviction under memory
//! pressure, spill round-trips, and concurrent access.

use std::path::Path;
use std::sync::Arc;
use std::thread;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use strata_buffer::{BlockManager, BufferConfig, BufferError, BufferManager, MemoryBlockManager};
use strata_common::constants::{BLOCK_ALLOC_SIZE, BLOCK_HEADER_SIZE, BLOCK_SIZE};
use strata_common::types::BlockId;
use tempfile::TempDir;

fn make_manager(
    memory_limit: usize,
    temp_dir: Option<&Path>,
) -> (Arc<BufferManager>, Arc<MemoryBlockManager>) {
    let blocks = Arc::new(MemoryBlockManager::new());
    let mut config = BufferConfig::new(memory_limit);
    if let Some(dir) = temp_dir {
        config = config.with_temp_directory(dir);
    }
    let manager = BufferManager::new(config, Arc::clone(&blocks) as Arc<dyn BlockManager>).unwrap();
    (manager, blocks)
}

/// Payload stored for persistent test blocks: the id in the first bytes.
fn block_payload(id: u64) -> Vec<u8> {
    let mut payload = vec![0u8; 64];
    payload[..8].copy_from_slice(&id.to_le_bytes());
    payload
}

#[test]
fn test_pin_loads_and_eviction_makes_room() {
    let (manager, blocks) = make_manager(3 * BLOCK_ALLOC_SIZE, None);
    for id in 1..=4u64 {
        blocks.insert(BlockId::new(id), &block_payload(id));
    }

    let h1 = manager.register_block(BlockId::new(1));
    let h2 = manager.register_block(BlockId::new(2));
    let h3 = manager.register_block(BlockId::new(3));

    let p1 = manager.pin(&h1).unwrap().unwrap();
    let p2 = manager.pin(&h2).unwrap().unwrap();
    let p3 = manager.pin(&h3).unwrap().unwrap();
    assert_eq!(manager.memory_used(), 3 * BLOCK_ALLOC_SIZE);
    assert_eq!(&p1.data()[..8], &1u64.to_le_bytes());

    // Releasing block 1 makes room for block 4.
    drop(p1);
    let h4 = manager.register_block(BlockId::new(4));
    let p4 = manager.pin(&h4).unwrap().unwrap();

    assert!(!h1.is_loaded());
    assert!(h4.is_loaded());
    assert_eq!(manager.memory_used(), 3 * BLOCK_ALLOC_SIZE);
    assert_eq!(&p4.data()[..8], &4u64.to_le_bytes());

    drop(p2);
    drop(p3);
}

#[test]
fn test_pinned_blocks_are_not_evicted() {
    let (manager, blocks) = make_manager(2 * BLOCK_ALLOC_SIZE, None);
    blocks.insert(BlockId::new(1), &block_payload(1));
    blocks.insert(BlockId::new(2), &block_payload(2));

    let h1 = manager.register_block(BlockId::new(1));
    let h2 = manager.register_block(BlockId::new(2));
    let p1 = manager.pin(&h1).unwrap().unwrap();
    let p2 = manager.pin(&h2).unwrap().unwrap();

    let used_before = manager.memory_used();
    let err = manager.allocate(BLOCK_SIZE).unwrap_err();
    assert!(matches!(err, BufferError::OutOfMemory { .. }));

    // Both pins survived and the accounting is unchanged.
    assert_eq!(manager.memory_used(), used_before);
    assert_eq!(&p1.data()[..8], &1u64.to_le_bytes());
    assert_eq!(&p2.data()[..8], &2u64.to_le_bytes());
}

#[test]
fn test_spill_round_trip() {
    let tmp = TempDir::new().unwrap();
    let spill_dir = tmp.path().join("spill");
    let (manager, _) = make_manager(BLOCK_ALLOC_SIZE, Some(&spill_dir));

    let mut rng = StdRng::seed_from_u64(7);
    let pattern: Vec<u8> = (0..BLOCK_SIZE).map(|_| rng.gen()).collect();

    // Fill the first block and release it.
    let first = manager.register_memory(BLOCK_SIZE, false).unwrap();
    {
        let pin = manager.pin(&first).unwrap().unwrap();
        pin.data_mut().copy_from_slice(&pattern);
    }

    // A second allocation forces the first one out to disk.
    let second = manager.register_memory(BLOCK_SIZE, false).unwrap();
    assert!(!first.is_loaded());
    let first_spill = spill_dir.join(format!("{}.block", first.block_id()));
    assert!(first_spill.is_file());

    // Re-pinning the first block spills the second and reloads the
    // pattern byte-for-byte; its spill file is gone afterwards.
    drop(manager.pin(&second).unwrap().unwrap());
    let pin = manager.pin(&first).unwrap().unwrap();
    assert_eq!(&pin.data()[..], &pattern[..]);
    assert!(!first_spill.exists());
    assert!(!second.is_loaded());

    let stats = manager.stats();
    assert_eq!(stats.spill_writes, 2);
    assert_eq!(stats.spill_reads, 1);
    assert!(manager.memory_used() <= manager.memory_limit());
}

#[test]
fn test_destroyable_contents_are_discarded() {
    let (manager, _) = make_manager(BLOCK_ALLOC_SIZE, None);

    let pin = manager.allocate(BLOCK_SIZE).unwrap();
    pin.data_mut().fill(0xAB);
    let handle = Arc::clone(pin.handle());
    drop(pin);

    // Pressure evicts the destroyable block without spilling.
    let _other = manager.allocate(BLOCK_SIZE).unwrap();
    assert!(!handle.is_loaded());

    // The contents are legitimately lost.
    assert!(manager.pin(&handle).unwrap().is_none());
}

#[test]
fn test_missing_temp_directory_blocks_eviction() {
    let (manager, _) = make_manager(BLOCK_ALLOC_SIZE, None);

    let first = manager.register_memory(BLOCK_SIZE, false).unwrap();
    drop(manager.pin(&first).unwrap().unwrap());

    // The first block cannot be spilled, so the second allocation must
    // fail rather than lose data.
    let err = manager.register_memory(BLOCK_SIZE, false).unwrap_err();
    assert!(matches!(err, BufferError::OutOfMemory { .. }));
    assert!(first.is_loaded());
    assert!(!first.can_unload());
}

#[test]
fn test_concurrent_register_converges() {
    let (manager, _) = make_manager(4 * BLOCK_ALLOC_SIZE, None);

    let handles: Vec<_> = (0..64)
        .map(|_| {
            let manager = Arc::clone(&manager);
            thread::spawn(move || manager.register_block(BlockId::new(42)))
        })
        .collect();

    let registered: Vec<_> = handles.into_iter().map(|t| t.join().unwrap()).collect();
    for handle in &registered[1..] {
        assert!(Arc::ptr_eq(&registered[0], handle));
    }
    assert_eq!(manager.registered_blocks(), 1);
}

#[test]
fn test_reallocate_grows_and_shrinks() {
    let (manager, _) = make_manager(2 * BLOCK_ALLOC_SIZE, None);

    let pin = manager.allocate(1024).unwrap();
    pin.data_mut()[..4].copy_from_slice(&[1, 2, 3, 4]);
    assert_eq!(manager.memory_used(), 1024 + BLOCK_HEADER_SIZE);

    manager.reallocate(pin.handle(), 4096).unwrap();
    assert_eq!(pin.len(), 4096);
    assert_eq!(manager.memory_used(), 4096 + BLOCK_HEADER_SIZE);
    // Old contents survive the resize.
    assert_eq!(&pin.data()[..4], &[1, 2, 3, 4]);

    manager.reallocate(pin.handle(), 512).unwrap();
    assert_eq!(pin.len(), 512);
    assert_eq!(manager.memory_used(), 512 + BLOCK_HEADER_SIZE);
}

#[test]
fn test_reallocate_failure_leaves_buffer_untouched() {
    let (manager, _) = make_manager(BLOCK_ALLOC_SIZE, None);

    let pin = manager.allocate(BLOCK_SIZE - BLOCK_HEADER_SIZE).unwrap();
    pin.data_mut()[..4].copy_from_slice(&[9, 9, 9, 9]);
    let used_before = manager.memory_used();

    let err = manager.reallocate(pin.handle(), 2 * BLOCK_SIZE).unwrap_err();
    assert!(matches!(err, BufferError::OutOfMemory { .. }));
    assert_eq!(pin.len(), BLOCK_SIZE - BLOCK_HEADER_SIZE);
    assert_eq!(&pin.data()[..4], &[9, 9, 9, 9]);
    assert_eq!(manager.memory_used(), used_before);
}

#[test]
fn test_set_memory_limit_evicts_and_rolls_back() {
    let (manager, blocks) = make_manager(4 * BLOCK_ALLOC_SIZE, None);
    blocks.insert(BlockId::new(1), &block_payload(1));
    blocks.insert(BlockId::new(2), &block_payload(2));

    let h1 = manager.register_block(BlockId::new(1));
    let h2 = manager.register_block(BlockId::new(2));
    drop(manager.pin(&h1).unwrap().unwrap());
    drop(manager.pin(&h2).unwrap().unwrap());
    assert_eq!(manager.memory_used(), 2 * BLOCK_ALLOC_SIZE);

    // Shrinking the limit evicts the oldest unpinned block.
    manager.set_memory_limit(BLOCK_ALLOC_SIZE).unwrap();
    assert_eq!(manager.memory_limit(), BLOCK_ALLOC_SIZE);
    assert!(manager.memory_used() <= BLOCK_ALLOC_SIZE);
    assert!(!h1.is_loaded());

    // A limit below what the remaining pin requires fails and keeps the
    // previous limit.
    let _pin = manager.pin(&h2).unwrap().unwrap();
    let err = manager.set_memory_limit(BLOCK_SIZE / 2).unwrap_err();
    assert!(matches!(err, BufferError::OutOfMemory { .. }));
    assert_eq!(manager.memory_limit(), BLOCK_ALLOC_SIZE);
}

#[test]
fn test_dropping_handle_removes_spill_file() {
    let tmp = TempDir::new().unwrap();
    let spill_dir = tmp.path().join("spill");
    let (manager, _) = make_manager(BLOCK_ALLOC_SIZE, Some(&spill_dir));

    let kept = manager.register_memory(BLOCK_SIZE, false).unwrap();
    drop(manager.pin(&kept).unwrap().unwrap());

    // Force the block out to disk.
    let _pressure = manager.allocate(BLOCK_SIZE).unwrap();
    let spill_file = spill_dir.join(format!("{}.block", kept.block_id()));
    assert!(spill_file.is_file());

    drop(kept);
    assert!(!spill_file.exists());
}

#[test]
fn test_temp_directory_removed_on_shutdown() {
    let tmp = TempDir::new().unwrap();
    let spill_dir = tmp.path().join("spill");

    {
        let (manager, _) = make_manager(BLOCK_ALLOC_SIZE, Some(&spill_dir));
        let kept = manager.register_memory(BLOCK_SIZE, false).unwrap();
        drop(manager.pin(&kept).unwrap().unwrap());
        let _pressure = manager.allocate(BLOCK_SIZE).unwrap();
        assert!(spill_dir.is_dir());
    }

    // All handles and the manager are gone; the scratch space is too.
    assert!(!spill_dir.exists());
}

#[test]
fn test_dropped_persistent_handle_can_be_reregistered() {
    let (manager, blocks) = make_manager(2 * BLOCK_ALLOC_SIZE, None);
    blocks.insert(BlockId::new(1), &block_payload(1));

    let handle = manager.register_block(BlockId::new(1));
    drop(manager.pin(&handle).unwrap().unwrap());
    drop(handle);
    assert_eq!(manager.registered_blocks(), 0);
    assert_eq!(manager.memory_used(), 0);

    let handle = manager.register_block(BlockId::new(1));
    let pin = manager.pin(&handle).unwrap().unwrap();
    assert_eq!(&pin.data()[..8], &1u64.to_le_bytes());
}

#[test]
fn test_concurrent_pin_unpin_torture() {
    const BLOCKS: u64 = 8;
    const THREADS: usize = 8;
    const ITERATIONS: usize = 200;

    let (manager, blocks) = make_manager(4 * BLOCK_ALLOC_SIZE, None);
    for id in 0..BLOCKS {
        blocks.insert(BlockId::new(id), &block_payload(id));
    }

    let workers: Vec<_> = (0..THREADS)
        .map(|seed| {
            let manager = Arc::clone(&manager);
            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(seed as u64);
                for _ in 0..ITERATIONS {
                    let id = rng.gen_range(0..BLOCKS);
                    let handle = manager.register_block(BlockId::new(id));
                    match manager.pin(&handle) {
                        Ok(Some(pin)) => {
                            assert_eq!(&pin.data()[..8], &id.to_le_bytes());
                        }
                        Ok(None) => panic!("persistent block lost its contents"),
                        // Racing pins can transiently hold the whole
                        // budget; that is the documented failure mode.
                        Err(BufferError::OutOfMemory { .. }) => {}
                        Err(e) => panic!("unexpected error: {e}"),
                    }
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }

    // Quiescent: the budget invariant holds and blocks churned through
    // the pool.
    assert!(manager.memory_used() <= manager.memory_limit());
    assert!(manager.stats().evictions > 0);
}

#[test]
fn test_concurrent_allocation_pressure() {
    const THREADS: usize = 4;
    const ITERATIONS: usize = 50;

    let tmp = TempDir::new().unwrap();
    let (manager, _) = make_manager(2 * BLOCK_ALLOC_SIZE, Some(&tmp.path().join("spill")));

    let workers: Vec<_> = (0..THREADS)
        .map(|seed| {
            let manager = Arc::clone(&manager);
            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(100 + seed as u64);
                for _ in 0..ITERATIONS {
                    // Allocations race against each other for the
                    // budget; failures are expected, corruption is not.
                    let size = rng.gen_range(1024..BLOCK_SIZE / 2);
                    match manager.allocate(size) {
                        Ok(pin) => {
                            pin.data_mut().fill(seed as u8);
                            assert!(pin.data().iter().all(|&b| b == seed as u8));
                        }
                        Err(BufferError::OutOfMemory { .. }) => {}
                        Err(e) => panic!("unexpected error: {e}"),
                    }
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }

    assert!(manager.memory_used() <= manager.memory_limit());
}
