//! Shared utilities for galley
//!
//! This crate provides:
//! - ID types (OrderId, ItemId, WorkstationId, ClientId)
//! - Clock abstraction (system clock with debug mock time, manual clock)
//! - Duration helpers
//! - Rate limiting helpers
//! - Default paths for socket, data, and config

mod ids;
mod paths;
mod rate_limit;
mod time;

pub use ids::*;
pub use paths::*;
pub use rate_limit::*;
pub use time::*;
