//! Buffer manager error types.

use std::io;

use strata_common::types::BlockId;
use thiserror::Error;

/// Result type for buffer manager operations.
pub type BufferResult<T> = Result<T, BufferError>;

/// Errors that can occur during buffer manager operations.
#[derive(Debug, Error)]
pub enum BufferError {
    /// The memory budget could not be met by evicting unpinned blocks.
    #[error(
        "out of memory: could not free {requested} bytes under the {limit} byte memory limit"
    )]
    OutOfMemory {
        /// Bytes the failed operation tried to reserve.
        requested: usize,
        /// Memory limit in effect at the time of the failure.
        limit: usize,
    },

    /// A block had to be moved out of memory but no temporary directory
    /// is configured.
    #[error(
        "cannot move block {block_id} out of memory: no temporary directory is configured; \
         set one with `BufferConfig::with_temp_directory` before blocks must spill"
    )]
    SpillUnavailable {
        /// The block that could not be spilled or reloaded.
        block_id: BlockId,
    },

    /// The temporary directory cannot be changed once it has been used.
    #[error("cannot change the temporary directory after it has been used")]
    TempDirectoryInUse,

    /// I/O error during block or spill file access.
    #[error("I/O error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: io::Error,
    },

    /// Configuration error.
    #[error("configuration error: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },
}

impl BufferError {
    /// Creates an out-of-memory error.
    pub fn out_of_memory(requested: usize, limit: usize) -> Self {
        Self::OutOfMemory { requested, limit }
    }

    /// Creates a spill-unavailable error.
    pub fn spill_unavailable(block_id: BlockId) -> Self {
        Self::SpillUnavailable { block_id }
    }

    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Returns true if the operation may succeed later, once pins are
    /// released or the memory limit is raised.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::OutOfMemory { .. })
    }

    /// Returns true if this error is resolved by changing configuration
    /// rather than by retrying.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::SpillUnavailable { .. } | Self::TempDirectoryInUse | Self::Config { .. }
        )
    }
}
