//! Constants used throughout the serial bridge
//! This module contains the default connection parameters, timings and
//! dispense limits for the coin dispenser.

/// Default serial device the dispenser enumerates as on Linux
pub const DEFAULT_DEVICE_PATH: &str = "/dev/ttyACM0";

/// Baud rate the dispenser firmware listens on
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Fixed delay before a reconnect attempt in milliseconds
pub const RECONNECT_DELAY_MS: u64 = 5000;

/// Grace period after open before replaying queued commands, in milliseconds.
/// The board may reset when the port opens.
pub const SETTLE_DELAY_MS: u64 = 200;

/// A close this soon after open is reported as a likely reset or brownout
pub const QUICK_CLOSE_THRESHOLD_MS: u64 = 1000;

/// Timeout for opening the serial port in milliseconds
pub const OPEN_TIMEOUT_MS: u64 = 10_000;

/// Timeout for a single write or flush in milliseconds
pub const WRITE_TIMEOUT_MS: u64 = 5000;

/// Smallest number of coins a single command may dispense
pub const MIN_DISPENSE_AMOUNT: i64 = 1;

/// Largest number of coins a single command may dispense
pub const MAX_DISPENSE_AMOUNT: i64 = 100;

/// Reason recorded when the caller gives none
pub const DEFAULT_DISPENSE_REASON: &str = "unspecified";

