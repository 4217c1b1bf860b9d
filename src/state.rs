//! Application state management
//! This module defines and manages the application state shared by the
//! caller-facing commands.

use std::sync::Arc;

use log::info;

use crate::config::AppConfig;
use crate::core::serial::{DeviceConnector, SerialConnector};
use crate::core::{ConnectionManager, DispenserHandle};

/// Application state
pub struct AppState {
    /// Handle to the dispenser connection manager
    pub dispenser: DispenserHandle,
    pub config: AppConfig,
}

impl AppState {
    /// Creates the state and starts connecting to the dispenser's serial port.
    /// Must be called from within a tokio runtime.
    pub fn new(config: AppConfig) -> Self {
        Self::with_connector(config, Arc::new(SerialConnector::new()))
    }

    /// Creates the state on top of any device transport
    pub fn with_connector(config: AppConfig, connector: Arc<dyn DeviceConnector>) -> Self {
        info!("Initializing dispenser connection manager...");
        let dispenser = ConnectionManager::spawn(&config.dispenser, connector);
        Self { dispenser, config }
    }

    /// Gets a clone of the dispenser handle
    pub fn dispenser_handle(&self) -> DispenserHandle {
        self.dispenser.clone()
    }
}
