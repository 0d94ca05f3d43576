//! Shared types for curfewd
//!
//! This crate defines the values that cross component boundaries:
//! - Verdicts produced by the blocking decision engine
//! - Grant changes delivered by the remote approver
//! - Feed messages from the platform (foreground changes, selection set)
//! - State snapshots for diagnostics
//! - Versioning

mod feed;
mod types;

pub use feed::*;
pub use types::*;

/// Current API version
pub const API_VERSION: u32 = 1;
