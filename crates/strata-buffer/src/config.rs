//! Buffer manager configuration.

use std::path::PathBuf;

use strata_common::constants::{DEFAULT_MEMORY_LIMIT, MIN_MEMORY_LIMIT};

use crate::error::{BufferError, BufferResult};

/// Configuration for the buffer manager.
#[derive(Debug, Clone)]
pub struct BufferConfig {
    /// Maximum bytes of block memory kept resident.
    pub memory_limit: usize,

    /// Directory used to spill evicted in-memory blocks.
    ///
    /// `None` disables spilling, which also makes non-destroyable
    /// anonymous blocks unevictable.
    pub temp_directory: Option<PathBuf>,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            memory_limit: DEFAULT_MEMORY_LIMIT,
            temp_directory: None,
        }
    }
}

impl BufferConfig {
    /// Creates a configuration with the given memory limit and no
    /// temporary directory.
    pub fn new(memory_limit: usize) -> Self {
        Self {
            memory_limit,
            ..Default::default()
        }
    }

    /// Sets the memory limit.
    #[must_use]
    pub fn with_memory_limit(mut self, memory_limit: usize) -> Self {
        self.memory_limit = memory_limit;
        self
    }

    /// Sets the temporary directory used for spilling.
    #[must_use]
    pub fn with_temp_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_directory = Some(dir.into());
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> BufferResult<()> {
        if self.memory_limit < MIN_MEMORY_LIMIT {
            return Err(BufferError::config(
                "memory limit must hold at least one block",
            ));
        }
        if let Some(dir) = &self.temp_directory {
            if dir.as_os_str().is_empty() {
                return Err(BufferError::config("temporary directory path is empty"));
            }
        }
        Ok(())
    }
}
