//! Defines shared data structures for the serial module.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;

/// Lifecycle phase of the serial link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionPhase {
    Closed,
    Opening,
    Open,
    Closing,
}

/// State of the physical link to the dispenser.
/// Owned by the connection manager; reset on every reconnect cycle.
#[derive(Debug, Clone)]
pub struct ConnectionState {
    pub phase: ConnectionPhase,
    pub last_opened_at: Option<DateTime<Utc>>,
    pub last_closed_at: Option<DateTime<Utc>>,
    pub last_close_reason: Option<String>,
    pub reconnect_scheduled: bool,
    /// Monotonic open time, used for the open-duration diagnostics
    pub opened_instant: Option<Instant>,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self {
            phase: ConnectionPhase::Closed,
            last_opened_at: None,
            last_closed_at: None,
            last_close_reason: None,
            reconnect_scheduled: false,
            opened_instant: None,
        }
    }
}

impl ConnectionState {
    /// Writes are only attempted while this holds
    pub fn is_open(&self) -> bool {
        self.phase == ConnectionPhase::Open
    }

    pub fn mark_opening(&mut self) {
        self.phase = ConnectionPhase::Opening;
    }

    pub fn mark_open(&mut self) {
        self.phase = ConnectionPhase::Open;
        self.last_opened_at = Some(Utc::now());
        self.opened_instant = Some(Instant::now());
        self.last_close_reason = None;
    }

    /// An open attempt failed; the link never came up
    pub fn mark_open_failed(&mut self, reason: String) {
        self.phase = ConnectionPhase::Closed;
        self.last_close_reason = Some(reason);
    }

    /// Records the reason for the coming close unless one is already known
    pub fn note_close_reason(&mut self, reason: String) {
        if self.last_close_reason.is_none() {
            self.last_close_reason = Some(reason);
        }
    }

    /// Marks the link closed and returns how long it had been open
    pub fn mark_closed(&mut self) -> Option<std::time::Duration> {
        self.phase = ConnectionPhase::Closed;
        self.last_closed_at = Some(Utc::now());
        self.opened_instant.take().map(|opened| opened.elapsed())
    }
}

/// Read-only snapshot of the connection for health checks
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub status: &'static str,
    pub device_path: String,
    pub baud_rate: u32,
    pub queued: usize,
    pub reconnect_scheduled: bool,
    pub last_opened_at: Option<DateTime<Utc>>,
    pub last_closed_at: Option<DateTime<Utc>>,
    pub last_close_reason: Option<String>,
}

impl ConnectionStatus {
    pub fn new(device_path: String, baud_rate: u32, state: &ConnectionState, queued: usize) -> Self {
        let status = match state.phase {
            ConnectionPhase::Open => "ready",
            ConnectionPhase::Opening => "opening",
            ConnectionPhase::Closed | ConnectionPhase::Closing => "disconnected",
        };
        Self {
            connected: state.is_open(),
            status,
            device_path,
            baud_rate,
            queued,
            reconnect_scheduled: state.reconnect_scheduled,
            last_opened_at: state.last_opened_at,
            last_closed_at: state.last_closed_at,
            last_close_reason: state.last_close_reason.clone(),
        }
    }
}

/// The result handed back to the caller of a dispense request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispenseOutcome {
    /// Written and flushed to the device
    Dispatched { amount: u8 },
    /// Accepted, delivery deferred until the device is reachable
    Queued { amount: u8 },
    /// Refused before any side effect
    Rejected { reason: String },
}

impl DispenseOutcome {
    /// True when the request was accepted (dispatched or queued)
    pub fn is_accepted(&self) -> bool {
        !matches!(self, Self::Rejected { .. })
    }
}
