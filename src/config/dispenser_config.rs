use std::time::Duration;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

use crate::core::serial::{
    DEFAULT_BAUD_RATE, DEFAULT_DEVICE_PATH, OPEN_TIMEOUT_MS, QUICK_CLOSE_THRESHOLD_MS,
    RECONNECT_DELAY_MS, SETTLE_DELAY_MS, WRITE_TIMEOUT_MS,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispenserConfig {
    /// Serial device of the dispenser, e.g. `/dev/ttyACM0` or `COM3`
    pub device_path: String,

    /// Baud rate the firmware listens on
    pub baud_rate: u32,

    /// Fixed delay between reconnect attempts. Reconnects never give up.
    pub reconnect_delay_ms: u64,

    /// Grace period after open before queued commands are replayed
    pub settle_delay_ms: u64,

    /// Closes sooner than this after open are logged as a likely board reset
    pub quick_close_threshold_ms: u64,

    pub open_timeout_ms: u64,

    /// Applies to each write and to each flush
    pub write_timeout_ms: u64,

    /// Upper bound on pending commands. `None` keeps the queue unbounded.
    pub queue_capacity: Option<usize>,
}

impl Default for DispenserConfig {
    fn default() -> Self {
        DispenserConfig {
            device_path: DEFAULT_DEVICE_PATH.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            reconnect_delay_ms: RECONNECT_DELAY_MS,
            settle_delay_ms: SETTLE_DELAY_MS,
            quick_close_threshold_ms: QUICK_CLOSE_THRESHOLD_MS,
            open_timeout_ms: OPEN_TIMEOUT_MS,
            write_timeout_ms: WRITE_TIMEOUT_MS,
            queue_capacity: None,
        }
    }
}

impl DispenserConfig {
    /// Rejects values the connection manager cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.device_path.trim().is_empty() {
            bail!("Dispenser device path must not be empty");
        }
        if self.baud_rate == 0 {
            bail!("Dispenser baud rate must be greater than zero");
        }
        if self.reconnect_delay_ms == 0 {
            bail!("Reconnect delay must be greater than zero");
        }
        if self.open_timeout_ms == 0 || self.write_timeout_ms == 0 {
            bail!("Open and write timeouts must be greater than zero");
        }
        if self.queue_capacity == Some(0) {
            bail!("Queue capacity must be greater than zero; omit it for an unbounded queue");
        }
        Ok(())
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn quick_close_threshold(&self) -> Duration {
        Duration::from_millis(self.quick_close_threshold_ms)
    }

    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.open_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}
