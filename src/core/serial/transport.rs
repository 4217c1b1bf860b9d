//! Device transport seam
//! The connection manager talks to the dispenser only through these traits,
//! so the real serial port and scripted test devices are interchangeable.

use std::io;

use tokio::sync::mpsc;

use crate::core::serial::manager::ManagerMessage;

/// Errors reported by a device transport
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Failed to open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("Serial I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("{operation} timed out after {millis} ms")]
    Timeout { operation: &'static str, millis: u64 },
    #[error("Link is closed")]
    Closed,
}

/// Where and how fast to open the port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSettings {
    pub device_path: String,
    pub baud_rate: u32,
}

/// Unsolicited events raised by an open link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// The device went away or the port reached end of stream
    Closed { reason: Option<String> },
    /// The transport reported an error
    Error(String),
}

/// Reports link events back to the connection manager.
/// Each sender is bound to the link it was created for, so events from a
/// replaced link are ignored.
#[derive(Debug, Clone)]
pub struct LinkEventSender {
    link_id: u64,
    tx: mpsc::UnboundedSender<ManagerMessage>,
}

impl LinkEventSender {
    pub(crate) fn new(link_id: u64, tx: mpsc::UnboundedSender<ManagerMessage>) -> Self {
        Self { link_id, tx }
    }

    pub fn send(&self, event: LinkEvent) {
        // The manager has shut down if this fails; nobody is listening.
        let _ = self.tx.send(ManagerMessage::Link {
            link_id: self.link_id,
            event,
        });
    }

    pub fn closed(&self, reason: Option<String>) {
        self.send(LinkEvent::Closed { reason });
    }

    pub fn error(&self, message: impl Into<String>) {
        self.send(LinkEvent::Error(message.into()));
    }
}

/// Opens links to the device
#[async_trait::async_trait]
pub trait DeviceConnector: Send + Sync {
    /// Open the port. Unsolicited close and error events are reported on `events`.
    async fn open(
        &self,
        settings: &PortSettings,
        events: LinkEventSender,
    ) -> Result<Box<dyn DeviceLink>, TransportError>;
}

/// An open connection to the device, exclusively owned by the connection manager
#[async_trait::async_trait]
pub trait DeviceLink: Send {
    /// Write the bytes to the transport
    async fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Wait until written bytes have been handed to the device
    async fn drain(&mut self) -> Result<(), TransportError>;

    /// Close the port. Must not raise further events.
    async fn close(&mut self);
}
