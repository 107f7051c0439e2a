//! galleyd service internals
//!
//! The binary in `main.rs` wires these to the IPC server, signals, and the
//! tick and sync timers.

mod kitchen;
mod mapping;

pub use kitchen::*;
pub use mapping::*;
