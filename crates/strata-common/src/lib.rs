//! # strata-common
//!
//! Common types and constants for StrataDB.
//!
//! This crate provides the foundational types shared by the StrataDB
//! storage components:
//!
//! - **Types**: typed identifiers (`BlockId`)
//! - **Constants**: block geometry and memory limits
//!
//! ## Example
//!
//! ```rust
//! use strata_common::types::BlockId;
//! use strata_common::constants::BLOCK_SIZE;
//!
//! let block = BlockId::new(42);
//! assert!(block.is_persistent());
//! assert!(BLOCK_SIZE.is_power_of_two());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod constants;
pub mod types;

// Re-export commonly used items at the crate root
pub use constants::*;
pub use types::BlockId;
