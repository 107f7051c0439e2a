//! Kitchen engine for galleyd
//!
//! This crate is the heart of galleyd, containing:
//! - The order table and the order status state machine
//!   (queued -> active -> overdue -> completed, reset back to queued)
//! - Cooking timers, recomputed from wall-clock time on every tick
//! - Warning, overdue and reminder alerts
//! - Reconciliation against the order backend's view

mod engine;
mod error;
mod events;
mod timer;

pub use engine::*;
pub use error::*;
pub use events::*;
pub use timer::*;
