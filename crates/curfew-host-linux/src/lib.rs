//! Linux collaborators for curfewd
//!
//! Provides:
//! - HTTP partner backend (limits, grants, wallet pushes, notifications)
//! - Corrective action through a configured external command

mod device;
mod remote;

pub use device::*;
pub use remote::*;
