//! Order model and protocol types for galley
//!
//! This crate defines the stable API between galleyd and its clients:
//! - The order record and its status enumerations
//! - Timer views
//! - Commands (requests from clients)
//! - Responses
//! - Events (service -> clients)
//! - Versioning

mod commands;
mod events;
mod order;
mod types;

pub use commands::*;
pub use events::*;
pub use order::*;
pub use types::*;

/// Current API version
pub const API_VERSION: u32 = 1;
