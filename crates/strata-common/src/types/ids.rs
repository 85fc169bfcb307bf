//! Core identifier types for StrataDB.
//!
//! These types provide type-safe wrappers around numeric identifiers,
//! preventing accidental misuse of different ID types.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::MAX_PERSISTENT_BLOCK_ID;

/// Block identifier - uniquely identifies a data block.
///
/// Blocks are the fundamental unit of buffering in StrataDB. Identifiers
/// below [`MAX_PERSISTENT_BLOCK_ID`] denote persistent blocks backed by
/// the on-disk block manager; identifiers at or above it denote anonymous
/// in-memory blocks minted by the buffer manager.
///
/// # Example
///
/// ```rust
/// use strata_common::types::BlockId;
///
/// let block = BlockId::new(42);
/// assert_eq!(block.as_u64(), 42);
/// assert!(block.is_persistent());
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct BlockId(u64);

impl BlockId {
    /// Invalid block ID constant, used as a sentinel value.
    pub const INVALID: Self = Self(u64::MAX);

    /// First valid persistent block ID.
    pub const FIRST: Self = Self(0);

    /// Creates a new `BlockId` from a raw u64 value.
    #[inline]
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw u64 value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Checks if this is a valid block ID.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != Self::INVALID.0
    }

    /// Returns true if this block is backed by the on-disk block manager.
    #[inline]
    #[must_use]
    pub const fn is_persistent(self) -> bool {
        self.0 < MAX_PERSISTENT_BLOCK_ID
    }

    /// Returns true if this block was minted by the buffer manager and
    /// lives only in memory (or in a spill file).
    #[inline]
    #[must_use]
    pub const fn is_anonymous(self) -> bool {
        self.0 >= MAX_PERSISTENT_BLOCK_ID && self.is_valid()
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "BlockId(INVALID)")
        } else {
            write!(f, "BlockId({})", self.0)
        }
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for BlockId {
    #[inline]
    fn from(id: u64) -> Self {
        Self::new(id)
    }
}

impl From<BlockId> for u64 {
    #[inline]
    fn from(id: BlockId) -> Self {
        id.0
    }
}
