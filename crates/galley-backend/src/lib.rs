//! Order backend interfaces for galleyd
//!
//! The order backend is the system of record for orders. This crate defines
//! the trait the service talks to, the lenient/strict decoding of its JSON
//! payloads, and an in-memory mock. It contains no transport code itself.

mod mock;
mod payload;
mod traits;

pub use mock::*;
pub use payload::*;
pub use traits::*;
