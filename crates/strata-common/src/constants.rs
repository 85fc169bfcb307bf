//! System-wide constants for StrataDB.
//!
//! This module defines the block geometry and memory limits used across
//! the storage layer.

// =============================================================================
// Block Geometry
// =============================================================================

/// On-disk block payload size in bytes (256 KB).
///
/// Analytical workloads favor large blocks: fewer seeks, better scan
/// throughput, and columnar segments that amortize per-block overhead.
pub const BLOCK_SIZE: usize = 256 * 1024;

/// Bytes of internal bookkeeping accounted for every in-memory buffer.
pub const BLOCK_HEADER_SIZE: usize = 8;

/// Total bytes charged against the memory budget per persistent block slot.
pub const BLOCK_ALLOC_SIZE: usize = BLOCK_SIZE + BLOCK_HEADER_SIZE;

/// Threshold separating persistent from anonymous block identifiers.
///
/// Identifiers below this value belong to the on-disk block manager;
/// identifiers at or above it are minted at runtime for in-memory blocks.
pub const MAX_PERSISTENT_BLOCK_ID: u64 = 1 << 62;

// =============================================================================
// Memory Limits
// =============================================================================

/// Default buffer memory limit (1 GB).
pub const DEFAULT_MEMORY_LIMIT: usize = 1024 * 1024 * 1024;

/// Minimum memory limit: the budget must hold at least one block.
pub const MIN_MEMORY_LIMIT: usize = BLOCK_ALLOC_SIZE;

// =============================================================================
// Spill Files
// =============================================================================

/// File extension for spilled anonymous blocks in the temporary directory.
pub const SPILL_FILE_EXTENSION: &str = "block";

/// Size of the length header prepended to every spill file.
pub const SPILL_HEADER_SIZE: usize = std::mem::size_of::<u64>();
