//! The buffer manager.
//!
//! Owns the registry of live block handles, enforces the memory budget,
//! and drives eviction. All client entry points live here: registering
//! persistent blocks, allocating anonymous memory, pinning, and
//! runtime reconfiguration.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use strata_common::constants::{BLOCK_HEADER_SIZE, MAX_PERSISTENT_BLOCK_ID};
use strata_common::types::BlockId;
use tracing::{debug, trace, warn};

use crate::block::BlockManager;
use crate::buffer::BlockBuffer;
use crate::config::BufferConfig;
use crate::error::{BufferError, BufferResult};
use crate::eviction::{EvictionNode, EvictionQueue};
use crate::handle::{BlockHandle, BufferPin, Residency};
use crate::spill::TempDirectory;
use crate::BufferStats;

/// Temporary-directory configuration and its lazily created handle.
struct TempState {
    /// Configured path; `None` disables spilling.
    path: Option<PathBuf>,
    /// Materialized directory, created on first spill.
    handle: Option<Arc<TempDirectory>>,
}

/// Operation counters, snapshotted by [`BufferManager::stats`].
#[derive(Default)]
struct Counters {
    pins: AtomicU64,
    evictions: AtomicU64,
    spill_writes: AtomicU64,
    spill_reads: AtomicU64,
}

/// Brokers access to fixed-size blocks under a bounded memory budget.
///
/// Persistent blocks are read through the [`BlockManager`] collaborator
/// and can always be dropped and re-read; anonymous blocks exist only
/// in memory and, when not destroyable, spill to the temporary
/// directory under pressure.
///
/// Construct with [`BufferManager::new`], which returns an `Arc`:
/// handles keep a reference back to their manager, so the manager is
/// always shared.
pub struct BufferManager {
    block_manager: Arc<dyn BlockManager>,
    /// Registry of live handles, weak so registration never extends a
    /// handle's lifetime.
    blocks: Mutex<HashMap<BlockId, Weak<BlockHandle>>>,
    queue: EvictionQueue,
    /// Resident bytes plus in-flight reservations.
    memory_used: AtomicUsize,
    memory_limit: AtomicUsize,
    /// Serializes limit changes. Separate from the registry lock: the
    /// eviction loop can drop the last reference to a handle, whose
    /// destructor takes the registry lock.
    limit_lock: Mutex<()>,
    next_anonymous_id: AtomicU64,
    temp: Mutex<TempState>,
    counters: Counters,
}

impl BufferManager {
    /// Creates a buffer manager with the given configuration and block
    /// source.
    pub fn new(
        config: BufferConfig,
        block_manager: Arc<dyn BlockManager>,
    ) -> BufferResult<Arc<Self>> {
        config.validate()?;
        Ok(Arc::new(Self {
            block_manager,
            blocks: Mutex::new(HashMap::new()),
            queue: EvictionQueue::new(),
            memory_used: AtomicUsize::new(0),
            memory_limit: AtomicUsize::new(config.memory_limit),
            limit_lock: Mutex::new(()),
            next_anonymous_id: AtomicU64::new(MAX_PERSISTENT_BLOCK_ID),
            temp: Mutex::new(TempState {
                path: config.temp_directory,
                handle: None,
            }),
            counters: Counters::default(),
        }))
    }

    /// Registers a persistent block, returning its shared handle.
    ///
    /// Idempotent: concurrent and repeated registrations of the same id
    /// converge on a single live handle. The block is not loaded until
    /// it is pinned.
    pub fn register_block(self: &Arc<Self>, block_id: BlockId) -> Arc<BlockHandle> {
        debug_assert!(block_id.is_persistent());
        let mut blocks = self.blocks.lock();
        if let Some(weak) = blocks.get(&block_id) {
            if let Some(existing) = weak.upgrade() {
                return existing;
            }
        }
        let handle = BlockHandle::new_unloaded(Arc::clone(self), block_id);
        blocks.insert(block_id, Arc::downgrade(&handle));
        handle
    }

    /// Allocates an anonymous block of `size` payload bytes, returning
    /// its loaded handle.
    ///
    /// With `can_destroy` the contents may be discarded on eviction;
    /// otherwise eviction spills them to the temporary directory.
    /// Anonymous handles are not entered in the registry.
    pub fn register_memory(
        self: &Arc<Self>,
        size: usize,
        can_destroy: bool,
    ) -> BufferResult<Arc<BlockHandle>> {
        let (handle, _buffer) = self.register_memory_inner(size, can_destroy)?;
        Ok(handle)
    }

    /// Allocates an anonymous destroyable block and pins it.
    ///
    /// Because the block is destroyable, only the returned pin keeps its
    /// contents alive; once the last pin is gone and the block is
    /// evicted, re-pinning yields `None`.
    pub fn allocate(self: &Arc<Self>, size: usize) -> BufferResult<BufferPin> {
        let (handle, buffer) = self.register_memory_inner(size, true)?;
        {
            let _state = handle.lock_state();
            handle.inc_readers();
        }
        self.counters.pins.fetch_add(1, Ordering::Relaxed);
        Ok(BufferPin::new(handle, buffer))
    }

    fn register_memory_inner(
        self: &Arc<Self>,
        size: usize,
        can_destroy: bool,
    ) -> BufferResult<(Arc<BlockHandle>, Arc<BlockBuffer>)> {
        let alloc_size = size + BLOCK_HEADER_SIZE;
        self.reserve_memory(alloc_size)?;

        let block_id = BlockId::new(self.next_anonymous_id.fetch_add(1, Ordering::Relaxed));
        let buffer = Arc::new(BlockBuffer::allocate(size));
        let handle = BlockHandle::new_loaded(
            Arc::clone(self),
            block_id,
            Arc::clone(&buffer),
            can_destroy,
            alloc_size,
        );
        Ok((handle, buffer))
    }

    /// Resizes a pinned anonymous block in place.
    ///
    /// The caller must hold exactly one pin. Growth reserves budget
    /// (evicting if needed); shrinkage returns the freed bytes. On
    /// failure the buffer is untouched.
    pub fn reallocate(&self, handle: &Arc<BlockHandle>, new_size: usize) -> BufferResult<()> {
        let mut state = handle.lock_state();
        debug_assert_eq!(handle.readers(), 1, "reallocate requires exactly one pin");

        let buffer = match &state.residency {
            Residency::Loaded { buffer } => Arc::clone(buffer),
            Residency::Unloaded => {
                return Err(BufferError::config(
                    "cannot resize a block that is not resident",
                ))
            }
        };

        let total_size = new_size + BLOCK_HEADER_SIZE;
        let current = state.memory_usage;
        if total_size > current {
            let delta = total_size - current;
            let limit = self.memory_limit.load(Ordering::Acquire);
            if !self.evict_blocks(delta, limit)? {
                warn!(delta, limit, "failed to grow block: out of memory");
                return Err(BufferError::out_of_memory(delta, limit));
            }
        }

        buffer.resize(new_size);
        if total_size < current {
            self.release_memory(current - total_size);
        }
        state.memory_usage = total_size;
        Ok(())
    }

    /// Pins a block, ensuring its bytes are resident, and returns an
    /// access token.
    ///
    /// Returns `Ok(None)` only for a destroyable anonymous block whose
    /// contents were discarded by eviction; that is the documented
    /// contract of destroyable blocks, not an error.
    pub fn pin(&self, handle: &Arc<BlockHandle>) -> BufferResult<Option<BufferPin>> {
        let required = {
            let state = handle.lock_state();
            match &state.residency {
                Residency::Loaded { buffer } => {
                    let buffer = Arc::clone(buffer);
                    handle.inc_readers();
                    self.counters.pins.fetch_add(1, Ordering::Relaxed);
                    return Ok(Some(BufferPin::new(Arc::clone(handle), buffer)));
                }
                Residency::Unloaded => {
                    if handle.block_id().is_anonymous() && handle.can_destroy() {
                        // Contents were legitimately discarded; nothing
                        // can bring them back.
                        return Ok(None);
                    }
                    state.memory_usage
                }
            }
        };

        // Make room before taking the handle lock again; eviction takes
        // other handles' locks and must not nest inside ours.
        let limit = self.memory_limit.load(Ordering::Acquire);
        if !self.evict_blocks(required, limit)? {
            warn!(block_id = %handle.block_id(), required, limit, "failed to pin block: out of memory");
            return Err(BufferError::out_of_memory(required, limit));
        }

        let mut state = handle.lock_state();
        if let Residency::Loaded { buffer } = &state.residency {
            // Another thread loaded the block in the meantime and its
            // reservation already covers it; return ours.
            let buffer = Arc::clone(buffer);
            self.release_memory(required);
            handle.inc_readers();
            self.counters.pins.fetch_add(1, Ordering::Relaxed);
            return Ok(Some(BufferPin::new(Arc::clone(handle), buffer)));
        }

        debug_assert_eq!(handle.readers(), 0);
        handle.inc_readers();
        match handle.load(&mut state) {
            Ok(buffer) => {
                self.counters.pins.fetch_add(1, Ordering::Relaxed);
                Ok(Some(BufferPin::new(Arc::clone(handle), buffer)))
            }
            Err(e) => {
                handle.dec_readers();
                self.release_memory(required);
                Err(e)
            }
        }
    }

    /// Releases one pin. At zero readers the block's eviction stamp
    /// advances and it is enqueued as an eviction candidate.
    pub(crate) fn unpin(&self, handle: &Arc<BlockHandle>) {
        let _state = handle.lock_state();
        if handle.dec_readers() == 0 {
            let stamp = handle.bump_eviction_timestamp();
            self.queue.enqueue(EvictionNode::new(handle, stamp));
        }
    }

    /// Reserves `extra` bytes, evicting candidates until `memory_used`
    /// fits under `limit`.
    ///
    /// Returns `Ok(false)`, with the reservation rolled back, when the
    /// candidate queue drains before the budget is met. `memory_used`
    /// may transiently exceed `limit` while the loop runs.
    pub(crate) fn evict_blocks(&self, extra: usize, limit: usize) -> BufferResult<bool> {
        self.memory_used.fetch_add(extra, Ordering::AcqRel);
        while self.memory_used.load(Ordering::Acquire) > limit {
            let Some(node) = self.queue.try_dequeue() else {
                self.memory_used.fetch_sub(extra, Ordering::AcqRel);
                return Ok(false);
            };
            let Some(handle) = node.upgrade() else {
                continue;
            };
            // Lock-free early out: stale or pinned candidates are
            // skipped without touching the handle lock.
            if !node.is_current(&handle) || handle.readers() > 0 {
                continue;
            }
            let mut state = handle.lock_state();
            if !node.is_current(&handle) || !handle.can_unload_locked(&state) {
                continue;
            }
            if let Err(e) = handle.unload(&mut state) {
                // The candidate survives the failure; put it back so it
                // stays evictable, then surface the error.
                drop(state);
                self.queue
                    .enqueue(EvictionNode::new(&handle, handle.eviction_timestamp()));
                self.memory_used.fetch_sub(extra, Ordering::AcqRel);
                return Err(e);
            }
            self.counters.evictions.fetch_add(1, Ordering::Relaxed);
            trace!(block_id = %handle.block_id(), "evicted block");
        }
        Ok(true)
    }

    /// Changes the memory limit, evicting as needed to fit under it.
    ///
    /// On failure the previous limit stays in effect.
    pub fn set_memory_limit(&self, new_limit: usize) -> BufferResult<()> {
        let _serialized = self.limit_lock.lock();
        if !self.evict_blocks(0, new_limit)? {
            return Err(self.limit_error(new_limit));
        }
        let old_limit = self.memory_limit.swap(new_limit, Ordering::AcqRel);
        // Second pass drains blocks that raced in between.
        match self.evict_blocks(0, new_limit) {
            Ok(true) => {
                debug!(old_limit, new_limit, "changed memory limit");
                Ok(())
            }
            Ok(false) => {
                self.memory_limit.store(old_limit, Ordering::Release);
                Err(self.limit_error(new_limit))
            }
            Err(e) => {
                self.memory_limit.store(old_limit, Ordering::Release);
                Err(e)
            }
        }
    }

    fn limit_error(&self, new_limit: usize) -> BufferError {
        let overage = self.memory_used().saturating_sub(new_limit);
        warn!(new_limit, overage, "failed to change memory limit");
        BufferError::out_of_memory(overage, new_limit)
    }

    /// Configures the spill directory.
    ///
    /// Fails once the directory has been materialized by a spill. The
    /// directory itself is created lazily on first need.
    pub fn set_temp_directory(&self, dir: impl Into<PathBuf>) -> BufferResult<()> {
        let mut temp = self.temp.lock();
        if temp.handle.is_some() {
            return Err(BufferError::TempDirectoryInUse);
        }
        temp.path = Some(dir.into());
        Ok(())
    }

    /// Returns true if a spill directory is configured.
    pub fn has_temp_directory(&self) -> bool {
        self.temp.lock().path.is_some()
    }

    /// Removes a dropped handle's traces: its registry entry for
    /// persistent blocks, its spill file for non-destroyable anonymous
    /// blocks.
    pub(crate) fn unregister_block(&self, block_id: BlockId, can_destroy: bool) {
        if block_id.is_anonymous() {
            if !can_destroy {
                self.delete_spill(block_id);
            }
        } else {
            let mut blocks = self.blocks.lock();
            // Only erase an expired entry: a racing re-registration may
            // already have stored a fresh handle under this id.
            if let Some(weak) = blocks.get(&block_id) {
                if weak.strong_count() == 0 {
                    blocks.remove(&block_id);
                }
            }
        }
    }

    pub(crate) fn block_manager(&self) -> &Arc<dyn BlockManager> {
        &self.block_manager
    }

    pub(crate) fn release_memory(&self, bytes: usize) {
        self.memory_used.fetch_sub(bytes, Ordering::AcqRel);
    }

    fn reserve_memory(&self, bytes: usize) -> BufferResult<()> {
        let limit = self.memory_limit.load(Ordering::Acquire);
        if self.evict_blocks(bytes, limit)? {
            Ok(())
        } else {
            warn!(bytes, limit, "allocation failed: out of memory");
            Err(BufferError::out_of_memory(bytes, limit))
        }
    }

    /// Writes a block's payload to its spill file, materializing the
    /// spill directory on first use.
    pub(crate) fn write_spill(&self, block_id: BlockId, payload: &[u8]) -> BufferResult<()> {
        let dir = self.require_temp_directory(block_id)?;
        dir.write_block(block_id, payload)?;
        self.counters.spill_writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Reads a block's payload back from its spill file and removes the
    /// file; the block is resident again after this.
    pub(crate) fn read_spilled(&self, block_id: BlockId) -> BufferResult<Vec<u8>> {
        let dir = {
            let temp = self.temp.lock();
            match &temp.handle {
                Some(handle) => Arc::clone(handle),
                None => return Err(BufferError::spill_unavailable(block_id)),
            }
        };
        let payload = dir.read_block(block_id)?;
        dir.delete_block(block_id);
        self.counters.spill_reads.fetch_add(1, Ordering::Relaxed);
        Ok(payload)
    }

    fn delete_spill(&self, block_id: BlockId) {
        let dir = {
            let temp = self.temp.lock();
            temp.handle.as_ref().map(Arc::clone)
        };
        if let Some(dir) = dir {
            dir.delete_block(block_id);
        }
    }

    fn require_temp_directory(&self, block_id: BlockId) -> BufferResult<Arc<TempDirectory>> {
        let mut temp = self.temp.lock();
        let Some(path) = temp.path.clone() else {
            return Err(BufferError::spill_unavailable(block_id));
        };
        if let Some(handle) = &temp.handle {
            return Ok(Arc::clone(handle));
        }
        let handle = Arc::new(TempDirectory::create(path)?);
        temp.handle = Some(Arc::clone(&handle));
        Ok(handle)
    }

    #[cfg(test)]
    pub(crate) fn eviction_queue(&self) -> &EvictionQueue {
        &self.queue
    }

    /// Returns resident bytes plus in-flight reservations.
    pub fn memory_used(&self) -> usize {
        self.memory_used.load(Ordering::Acquire)
    }

    /// Returns the memory limit currently in effect.
    pub fn memory_limit(&self) -> usize {
        self.memory_limit.load(Ordering::Acquire)
    }

    /// Returns the number of persistent blocks in the registry.
    pub fn registered_blocks(&self) -> usize {
        self.blocks.lock().len()
    }

    /// Returns a snapshot of operation statistics.
    pub fn stats(&self) -> BufferStats {
        BufferStats {
            pins: self.counters.pins.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            spill_writes: self.counters.spill_writes.load(Ordering::Relaxed),
            spill_reads: self.counters.spill_reads.load(Ordering::Relaxed),
            memory_used: self.memory_used(),
            memory_limit: self.memory_limit(),
            registered_blocks: self.registered_blocks(),
        }
    }
}

impl std::fmt::Debug for BufferManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferManager")
            .field("memory_used", &self.memory_used())
            .field("memory_limit", &self.memory_limit())
            .field("registered_blocks", &self.registered_blocks())
            .field("queued_candidates", &self.queue.len())
            .finish()
    }
}
