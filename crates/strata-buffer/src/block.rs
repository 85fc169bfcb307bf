//! Persistent block I/O interface.
//!
//! The buffer manager does not perform raw block I/O itself; it reads
//! persistent blocks through the [`BlockManager`] trait. The database's
//! storage layer provides the production implementation; the in-memory
//! implementation here backs tests and examples.

use std::collections::HashMap;
use std::io;

use parking_lot::RwLock;
use strata_common::constants::BLOCK_SIZE;
use strata_common::types::BlockId;

/// Source of persistent block contents.
///
/// Implementations must be safe to call from multiple threads; the
/// buffer manager guarantees at most one concurrent read per block id.
pub trait BlockManager: Send + Sync {
    /// Reads the payload of a persistent block into `buf`.
    ///
    /// `buf` is exactly [`BLOCK_SIZE`] bytes. Errors propagate to the
    /// pinning caller unchanged.
    fn read_block(&self, block_id: BlockId, buf: &mut [u8]) -> io::Result<()>;
}

/// In-memory block source.
///
/// Stores block payloads in a map. Reads of unknown blocks fail with
/// [`io::ErrorKind::NotFound`].
#[derive(Default)]
pub struct MemoryBlockManager {
    blocks: RwLock<HashMap<BlockId, Vec<u8>>>,
}

impl MemoryBlockManager {
    /// Creates an empty in-memory block source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a block payload, padded or truncated to [`BLOCK_SIZE`].
    pub fn insert(&self, block_id: BlockId, payload: &[u8]) {
        let mut block = vec![0u8; BLOCK_SIZE];
        let n = payload.len().min(BLOCK_SIZE);
        block[..n].copy_from_slice(&payload[..n]);
        self.blocks.write().insert(block_id, block);
    }

    /// Returns true if a payload is stored for the given block.
    pub fn contains(&self, block_id: BlockId) -> bool {
        self.blocks.read().contains_key(&block_id)
    }
}

impl BlockManager for MemoryBlockManager {
    fn read_block(&self, block_id: BlockId, buf: &mut [u8]) -> io::Result<()> {
        let blocks = self.blocks.read();
        let block = blocks.get(&block_id).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("block {block_id} not found"),
            )
        })?;
        buf.copy_from_slice(&block[..buf.len()]);
        Ok(())
    }
}

impl std::fmt::Debug for MemoryBlockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBlockManager")
            .field("blocks", &self.blocks.read().len())
            .finish()
    }
}
