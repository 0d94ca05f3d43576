//! Collaborator interfaces for curfewd
//!
//! This crate defines the boundary between the daemon core and the outside
//! world: the remote partner backend (limits, grants, notifications) and the
//! device-side corrective action. It contains no transport code itself.

mod grants;
mod mock;
mod traits;

pub use grants::*;
pub use mock::*;
pub use traits::*;
