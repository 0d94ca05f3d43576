//! Usage accounting and enforcement engine for curfewd
//!
//! This crate is the heart of curfewd, containing:
//! - Foreground session tracking and the per-day usage ledger
//! - Daily limit cache and the access wallet with its sync reconciler
//! - The pure blocking decision and the "blocked today" cache
//! - Enforcement loop state (Idle -> Enforcing -> Expired)
//! - Calendar-day reset detection

mod blocks;
mod decision;
mod enforcement;
mod engine;
mod events;
mod ledger;
mod limits;
mod reset;
mod session;
mod wallet;

pub use blocks::*;
pub use decision::*;
pub use enforcement::*;
pub use engine::*;
pub use events::*;
pub use ledger::*;
pub use limits::*;
pub use reset::*;
pub use session::*;
pub use wallet::*;
