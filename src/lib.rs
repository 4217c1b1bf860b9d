//! DM Table coin bridge library
//! This is the main library for the DM table coin dispenser bridge. It keeps
//! the serial link to the dispenser alive and queues dispense commands while
//! the device is unreachable.

// Module declarations
pub mod commands;
pub mod config;
pub mod core;
pub mod logging;
pub mod state;
pub mod utils;
