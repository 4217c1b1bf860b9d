//! Serial functionality for the DM table coin bridge
//! This module handles the connection to the coin dispenser: opening the
//! serial port, recovering it after disconnects, and queueing dispense
//! commands while the device is unreachable.

mod commands;
mod connection;
mod constants;
mod manager;
mod notification;
mod queue;
mod transport;
mod types;

// Re-export types that should be publicly accessible
pub use commands::{DispenseCommand, ValidationError};
pub use connection::{SerialConnector, SerialLink};
pub use constants::*; // Re-export all constants
pub use manager::{ConnectionManager, DispenserHandle, ManagerError};
pub use notification::DeviceOutputHandler;
pub use queue::{CommandQueue, QueueFull, QueuedCommand};
pub use transport::{
    DeviceConnector, DeviceLink, LinkEvent, LinkEventSender, PortSettings, TransportError,
};
pub use types::{ConnectionPhase, ConnectionState, ConnectionStatus, DispenseOutcome};
