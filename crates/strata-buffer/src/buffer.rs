//! In-memory block buffers.
//!
//! A [`BlockBuffer`] is the owned byte region backing a loaded block.
//! The buffer manager shares it between a handle and its pins via `Arc`,
//! so the bytes stay valid for as long as any pin is alive.

use std::ops::{Deref, DerefMut};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Owned payload bytes of a loaded block.
///
/// The payload is guarded by a read/write lock so concurrent pins can
/// read while a writer resizes or mutates it.
pub struct BlockBuffer {
    data: RwLock<Vec<u8>>,
}

impl BlockBuffer {
    /// Allocates a zeroed buffer of the given payload size.
    pub(crate) fn allocate(size: usize) -> Self {
        Self {
            data: RwLock::new(vec![0u8; size]),
        }
    }

    /// Wraps existing payload bytes, e.g. reloaded from a spill file.
    pub(crate) fn from_vec(data: Vec<u8>) -> Self {
        Self {
            data: RwLock::new(data),
        }
    }

    /// Returns the current payload size in bytes.
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Returns true if the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resizes the payload in place, zero-filling any growth.
    pub(crate) fn resize(&self, new_size: usize) {
        self.data.write().resize(new_size, 0);
    }

    /// Returns a read guard over the payload.
    pub fn read(&self) -> BufferReadGuard<'_> {
        BufferReadGuard {
            guard: self.data.read(),
        }
    }

    /// Returns a write guard over the payload.
    pub fn write(&self) -> BufferWriteGuard<'_> {
        BufferWriteGuard {
            guard: self.data.write(),
        }
    }
}

impl std::fmt::Debug for BlockBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockBuffer").field("len", &self.len()).finish()
    }
}

/// Shared read access to a block's payload bytes.
pub struct BufferReadGuard<'a> {
    guard: RwLockReadGuard<'a, Vec<u8>>,
}

impl Deref for BufferReadGuard<'_> {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

/// Exclusive write access to a block's payload bytes.
pub struct BufferWriteGuard<'a> {
    guard: RwLockWriteGuard<'a, Vec<u8>>,
}

impl Deref for BufferWriteGuard<'_> {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl DerefMut for BufferWriteGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}
