//! Block handles and pin tokens.
//!
//! A [`BlockHandle`] tracks one block's residency state machine:
//! unloaded ⇄ loaded. Clients hold handles through `Arc`; the manager's
//! registry and the eviction queue hold only weak references, so a
//! handle's lifetime is governed entirely by its clients. Dropping the
//! last reference releases any resident memory and unregisters the
//! block.
//!
//! A [`BufferPin`] is the RAII access token returned by pinning: it
//! shares ownership of the resident buffer (so the bytes cannot vanish
//! under a reader) and unpins the block when dropped.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use strata_common::constants::{BLOCK_ALLOC_SIZE, BLOCK_SIZE};
use strata_common::types::BlockId;

use crate::buffer::{BlockBuffer, BufferReadGuard, BufferWriteGuard};
use crate::error::BufferResult;
use crate::manager::BufferManager;

/// Residency of a block's bytes.
///
/// The buffer is part of the loaded variant, so a loaded handle without
/// a buffer cannot be represented.
pub(crate) enum Residency {
    /// No bytes resident.
    Unloaded,
    /// Bytes resident; pins share the buffer through this `Arc`.
    Loaded {
        /// The resident payload.
        buffer: Arc<BlockBuffer>,
    },
}

/// Handle state guarded by the per-handle lock.
pub(crate) struct HandleState {
    /// Whether the block's bytes are resident, and if so where.
    pub(crate) residency: Residency,
    /// Bytes charged against the memory budget while loaded.
    pub(crate) memory_usage: usize,
}

/// Per-block state machine and memory accounting anchor.
///
/// At most one handle exists per persistent block id at any instant;
/// anonymous handles are never shared by id. All residency transitions
/// are serialized by the handle's lock.
pub struct BlockHandle {
    block_id: BlockId,
    can_destroy: bool,
    manager: Arc<BufferManager>,
    /// Active pin count. Mutated only under the handle lock, read
    /// lock-free by the eviction pre-check.
    readers: AtomicU32,
    /// Version stamp bumped on every transition to zero readers.
    /// Monotonic, so lock-free reads are a safe conservative filter.
    eviction_timestamp: AtomicU64,
    state: Mutex<HandleState>,
}

impl BlockHandle {
    /// Creates an unloaded handle for a persistent block.
    pub(crate) fn new_unloaded(manager: Arc<BufferManager>, block_id: BlockId) -> Arc<Self> {
        debug_assert!(block_id.is_persistent());
        Arc::new(Self {
            block_id,
            can_destroy: false,
            manager,
            readers: AtomicU32::new(0),
            eviction_timestamp: AtomicU64::new(0),
            state: Mutex::new(HandleState {
                residency: Residency::Unloaded,
                memory_usage: BLOCK_ALLOC_SIZE,
            }),
        })
    }

    /// Creates a loaded handle for a freshly allocated anonymous block.
    pub(crate) fn new_loaded(
        manager: Arc<BufferManager>,
        block_id: BlockId,
        buffer: Arc<BlockBuffer>,
        can_destroy: bool,
        memory_usage: usize,
    ) -> Arc<Self> {
        debug_assert!(block_id.is_anonymous());
        Arc::new(Self {
            block_id,
            can_destroy,
            manager,
            readers: AtomicU32::new(0),
            eviction_timestamp: AtomicU64::new(0),
            state: Mutex::new(HandleState {
                residency: Residency::Loaded { buffer },
                memory_usage,
            }),
        })
    }

    /// Returns the block id.
    #[inline]
    pub fn block_id(&self) -> BlockId {
        self.block_id
    }

    /// Returns true if eviction may discard this block's contents
    /// instead of spilling them.
    #[inline]
    pub fn can_destroy(&self) -> bool {
        self.can_destroy
    }

    /// Returns true if the block's bytes are currently resident.
    pub fn is_loaded(&self) -> bool {
        matches!(self.state.lock().residency, Residency::Loaded { .. })
    }

    /// Returns the current pin count.
    #[inline]
    pub fn readers(&self) -> u32 {
        self.readers.load(Ordering::Acquire)
    }

    /// Returns the bytes this handle charges against the budget while
    /// loaded.
    pub fn memory_usage(&self) -> usize {
        self.state.lock().memory_usage
    }

    /// Returns true if the block could be evicted right now.
    ///
    /// A block can be unloaded unless it is already unloaded, is pinned,
    /// or is a non-destroyable anonymous block with no spill directory
    /// configured.
    pub fn can_unload(&self) -> bool {
        let state = self.state.lock();
        self.can_unload_locked(&state)
    }

    pub(crate) fn can_unload_locked(&self, state: &HandleState) -> bool {
        if matches!(state.residency, Residency::Unloaded) {
            return false;
        }
        if self.readers() > 0 {
            return false;
        }
        if self.block_id.is_anonymous()
            && !self.can_destroy
            && !self.manager.has_temp_directory()
        {
            return false;
        }
        true
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, HandleState> {
        self.state.lock()
    }

    pub(crate) fn manager(&self) -> &Arc<BufferManager> {
        &self.manager
    }

    #[inline]
    pub(crate) fn eviction_timestamp(&self) -> u64 {
        self.eviction_timestamp.load(Ordering::Acquire)
    }

    /// Advances the eviction stamp, invalidating queued candidates.
    /// Caller holds the handle lock.
    pub(crate) fn bump_eviction_timestamp(&self) -> u64 {
        self.eviction_timestamp.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Increments the pin count. Caller holds the handle lock.
    pub(crate) fn inc_readers(&self) -> u32 {
        self.readers.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Decrements the pin count and returns the new value. Caller holds
    /// the handle lock.
    pub(crate) fn dec_readers(&self) -> u32 {
        let old = self.readers.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(old > 0, "unpinned a block with zero readers");
        old - 1
    }

    /// Materializes the block's bytes, transitioning to loaded.
    ///
    /// Persistent blocks are read through the block manager; anonymous
    /// non-destroyable blocks are reloaded from their spill file. The
    /// destroyable-and-lost case never reaches here (the pin path
    /// resolves it to a `None` token first).
    pub(crate) fn load(&self, state: &mut HandleState) -> BufferResult<Arc<BlockBuffer>> {
        if let Residency::Loaded { buffer } = &state.residency {
            return Ok(Arc::clone(buffer));
        }

        let buffer = if self.block_id.is_persistent() {
            let buffer = Arc::new(BlockBuffer::allocate(BLOCK_SIZE));
            {
                let mut data = buffer.write();
                self.manager
                    .block_manager()
                    .read_block(self.block_id, &mut data)?;
            }
            buffer
        } else {
            debug_assert!(!self.can_destroy);
            let payload = self.manager.read_spilled(self.block_id)?;
            Arc::new(BlockBuffer::from_vec(payload))
        };

        state.residency = Residency::Loaded {
            buffer: Arc::clone(&buffer),
        };
        Ok(buffer)
    }

    /// Releases the block's bytes, transitioning to unloaded.
    ///
    /// Non-destroyable anonymous blocks are spilled first. The freed
    /// bytes are returned to the memory budget. Already-unloaded blocks
    /// are a no-op.
    pub(crate) fn unload(&self, state: &mut HandleState) -> BufferResult<()> {
        match &state.residency {
            Residency::Unloaded => return Ok(()),
            Residency::Loaded { buffer } => {
                debug_assert!(self.can_unload_locked(state));
                if self.block_id.is_anonymous() && !self.can_destroy {
                    let data = buffer.read();
                    self.manager.write_spill(self.block_id, &data)?;
                }
            }
        }
        state.residency = Residency::Unloaded;
        self.manager.release_memory(state.memory_usage);
        Ok(())
    }
}

impl Drop for BlockHandle {
    fn drop(&mut self) {
        // No references remain; release resident memory directly
        // without spilling (nobody could re-pin this block).
        let state = self.state.get_mut();
        if matches!(state.residency, Residency::Loaded { .. }) {
            state.residency = Residency::Unloaded;
            self.manager.release_memory(state.memory_usage);
        }
        self.manager.unregister_block(self.block_id, self.can_destroy);
    }
}

impl std::fmt::Debug for BlockHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockHandle")
            .field("block_id", &self.block_id)
            .field("can_destroy", &self.can_destroy)
            .field("loaded", &self.is_loaded())
            .field("readers", &self.readers())
            .finish()
    }
}

/// RAII pin token granting direct byte access to a resident block.
///
/// The token keeps the block pinned (and therefore resident) until it
/// is dropped; dropping unpins the block and makes it an eviction
/// candidate once its last pin is gone.
pub struct BufferPin {
    handle: Arc<BlockHandle>,
    buffer: Arc<BlockBuffer>,
}

impl BufferPin {
    pub(crate) fn new(handle: Arc<BlockHandle>, buffer: Arc<BlockBuffer>) -> Self {
        Self { handle, buffer }
    }

    /// Returns the pinned block's id.
    #[inline]
    pub fn block_id(&self) -> BlockId {
        self.handle.block_id()
    }

    /// Returns the pinned block's handle, e.g. to pin it again later.
    #[inline]
    pub fn handle(&self) -> &Arc<BlockHandle> {
        &self.handle
    }

    /// Returns the payload size in bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Returns true if the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Returns read access to the payload bytes.
    pub fn data(&self) -> BufferReadGuard<'_> {
        self.buffer.read()
    }

    /// Returns write access to the payload bytes.
    pub fn data_mut(&self) -> BufferWriteGuard<'_> {
        self.buffer.write()
    }
}

impl Drop for BufferPin {
    fn drop(&mut self) {
        self.handle.manager().unpin(&self.handle);
    }
}

impl std::fmt::Debug for BufferPin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPin")
            .field("block_id", &self.block_id())
            .field("len", &self.len())
            .finish()
    }
}
