//! Shared utilities for curfewd
//!
//! This crate provides:
//! - ID types (PackageId, SessionId)
//! - Time utilities (monotonic time, calendar days, the `Clock` seam)
//! - Default paths for config, data, and log directories

mod ids;
mod paths;
mod time;

pub use ids::*;
pub use paths::*;
pub use time::*;
