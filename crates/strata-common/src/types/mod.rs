//! Type definitions for StrataDB.
//!
//! This module contains the core type definitions used across the
//! storage layer.

mod ids;

pub use ids::BlockId;
