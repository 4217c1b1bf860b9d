//! Core functionality for the DM table coin bridge
//! This module contains the core functionality for driving the coin dispenser

pub mod serial;

// Re-export commonly used types
pub use serial::{ConnectionManager, DispenseOutcome, DispenserHandle};
