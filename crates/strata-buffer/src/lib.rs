//! Buffer pool manager for StrataDB.
//!
//! The buffer manager brokers access to fixed-size data blocks while
//! bounding resident memory at a configurable limit:
//!
//! - **Persistent blocks** live in the database file and are read
//!   through the [`BlockManager`] collaborator; evicting one just drops
//!   its bytes, since they can always be re-read.
//! - **Anonymous blocks** are minted at runtime for intermediate
//!   results. Destroyable ones are discarded on eviction; the rest
//!   spill to a temporary directory and reload transparently.
//!
//! Clients pin a block to get direct byte access; dropping the pin
//! makes the block an eviction candidate again.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       BufferManager                          │
//! │  ┌───────────────────────┐  ┌─────────────────────────────┐ │
//! │  │       Registry        │  │       EvictionQueue         │ │
//! │  │ BlockId → Weak handle │  │ (weak refs + stamp guards)  │ │
//! │  └───────────────────────┘  └─────────────────────────────┘ │
//! │              │                           │                  │
//! │              ▼                           ▼                  │
//! │  ┌─────────────────────────────────────────────────────────┐│
//! │  │                     BlockHandle                         ││
//! │  │   unloaded ⇄ loaded · readers · eviction stamp          ││
//! │  └─────────────────────────────────────────────────────────┘│
//! │              │                           │                  │
//! │              ▼                           ▼                  │
//! │      BlockManager (disk)        TempDirectory (spill)       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use strata_buffer::{BufferConfig, BufferManager, MemoryBlockManager};
//!
//! fn example() -> strata_buffer::BufferResult<()> {
//!     let config = BufferConfig::new(64 * 1024 * 1024)
//!         .with_temp_directory("/tmp/strata-spill");
//!     let manager = BufferManager::new(config, Arc::new(MemoryBlockManager::new()))?;
//!
//!     // Allocate a scratch block and write into it.
//!     let pin = manager.allocate(4096)?;
//!     pin.data_mut()[0] = 42;
//!
//!     // The block becomes an eviction candidate when the pin drops.
//!     drop(pin);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod block;
mod buffer;
mod config;
mod error;
mod eviction;
mod handle;
mod manager;
mod spill;

pub use block::{BlockManager, MemoryBlockManager};
pub use buffer::{BlockBuffer, BufferReadGuard, BufferWriteGuard};
pub use config::BufferConfig;
pub use error::{BufferError, BufferResult};
pub use handle::{BlockHandle, BufferPin};
pub use manager::BufferManager;

/// Statistics snapshot for buffer manager monitoring.
#[derive(Debug, Clone, Default)]
pub struct BufferStats {
    /// Pin tokens successfully issued.
    pub pins: u64,
    /// Number of blocks evicted.
    pub evictions: u64,
    /// Number of blocks spilled to the temporary directory.
    pub spill_writes: u64,
    /// Number of blocks reloaded from the temporary directory.
    pub spill_reads: u64,
    /// Resident bytes plus in-flight reservations.
    pub memory_used: usize,
    /// Memory limit currently in effect.
    pub memory_limit: usize,
    /// Persistent blocks currently registered.
    pub registered_blocks: usize,
}

impl BufferStats {
    /// Returns the fraction of evictions that had to spill (0.0 to 1.0).
    pub fn spill_ratio(&self) -> f64 {
        if self.evictions == 0 {
            0.0
        } else {
            self.spill_writes as f64 / self.evictions as f64
        }
    }
}
