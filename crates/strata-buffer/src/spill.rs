//! Spill file management.
//!
//! Evicted anonymous blocks that cannot be regenerated are written to a
//! temporary directory and reloaded on the next pin. Spill files are
//! ephemeral: one `{id}.block` file per evicted block, removed when the
//! block is reloaded or its handle is dropped, with the whole directory
//! removed on shutdown.
//!
//! File layout: an 8-byte little-endian payload size header followed by
//! the payload bytes. The payload is opaque at this layer.

use std::fs::{self, File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use strata_common::constants::{SPILL_FILE_EXTENSION, SPILL_HEADER_SIZE};
use strata_common::types::BlockId;
use tracing::{debug, warn};

use crate::error::BufferResult;

/// A materialized spill directory.
///
/// Created lazily on the first spill and removed (best-effort) on drop.
/// Files left behind by a crash are not recovered here.
pub(crate) struct TempDirectory {
    path: PathBuf,
}

impl TempDirectory {
    /// Creates the directory on disk.
    pub(crate) fn create(path: PathBuf) -> BufferResult<Self> {
        fs::create_dir_all(&path)?;
        debug!(path = %path.display(), "created temporary block directory");
        Ok(Self { path })
    }

    /// Returns the directory path.
    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the spill file path for a block.
    pub(crate) fn spill_path(&self, block_id: BlockId) -> PathBuf {
        self.path
            .join(format!("{}.{}", block_id, SPILL_FILE_EXTENSION))
    }

    /// Writes a block payload to its spill file, replacing any previous
    /// contents.
    pub(crate) fn write_block(&self, block_id: BlockId, payload: &[u8]) -> BufferResult<()> {
        let path = self.spill_path(block_id);
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;

        let size = payload.len() as u64;
        file.write_all_at(&size.to_le_bytes(), 0)?;
        file.write_all_at(payload, SPILL_HEADER_SIZE as u64)?;
        debug!(block_id = %block_id, bytes = payload.len(), "spilled block");
        Ok(())
    }

    /// Reads a block payload back from its spill file.
    pub(crate) fn read_block(&self, block_id: BlockId) -> BufferResult<Vec<u8>> {
        let path = self.spill_path(block_id);
        let file = File::open(&path)?;

        let mut header = [0u8; SPILL_HEADER_SIZE];
        file.read_exact_at(&mut header, 0)?;
        let size = u64::from_le_bytes(header) as usize;

        let mut payload = vec![0u8; size];
        file.read_exact_at(&mut payload, SPILL_HEADER_SIZE as u64)?;
        debug!(block_id = %block_id, bytes = size, "reloaded spilled block");
        Ok(payload)
    }

    /// Removes a block's spill file. Absence is not an error.
    pub(crate) fn delete_block(&self, block_id: BlockId) {
        let path = self.spill_path(block_id);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(block_id = %block_id, error = %e, "failed to remove spill file");
            }
        }
    }
}

impl Drop for TempDirectory {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_dir_all(&self.path) {
            warn!(
                path = %self.path.display(),
                error = %e,
                "failed to remove temporary block directory"
            );
        }
    }
}

impl std::fmt::Debug for TempDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TempDirectory")
            .field("path", &self.path)
            .finish()
    }
}
