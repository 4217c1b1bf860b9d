//! Connection manager for the coin dispenser
//! This module owns the single serial link to the dispenser. A manager task
//! holds the port handle, the connection state and the pending command queue;
//! everything else talks to it through a [`DispenserHandle`].
//!
//! Lifecycle: `Closed → Opening → Open → Closing → Closed`. Every failure is
//! treated as transient: the link is closed, a single fixed-delay reconnect is
//! armed, and queued commands are replayed in order once the port reopens.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{debug, error, info, warn};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use crate::config::dispenser_config::DispenserConfig;
use crate::core::serial::commands::DispenseCommand;
use crate::core::serial::constants::DEFAULT_DISPENSE_REASON;
use crate::core::serial::queue::{CommandQueue, QueueFull, QueuedCommand};
use crate::core::serial::transport::{
    DeviceConnector, DeviceLink, LinkEvent, LinkEventSender, PortSettings, TransportError,
};
use crate::core::serial::types::{
    ConnectionPhase, ConnectionState, ConnectionStatus, DispenseOutcome,
};

/// Error returned by a [`DispenserHandle`] when the manager task is gone
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ManagerError {
    #[error("Connection manager is no longer running")]
    Stopped,
}

/// Messages processed by the manager task, from handles and from its own
/// timers and links
pub(crate) enum ManagerMessage {
    Dispense {
        command: DispenseCommand,
        reason: String,
        reply: oneshot::Sender<DispenseOutcome>,
    },
    Initialize,
    ScheduleReconnect,
    PendingCommands {
        reply: oneshot::Sender<Vec<QueuedCommand>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
    OpenCompleted {
        link_id: u64,
        result: Result<Box<dyn DeviceLink>, TransportError>,
    },
    Link {
        link_id: u64,
        event: LinkEvent,
    },
    ReconnectDue {
        ticket: u64,
    },
    SettleElapsed {
        link_id: u64,
    },
}

/// Timer values taken from the configuration
#[derive(Debug, Clone, Copy)]
struct Timings {
    reconnect_delay: Duration,
    settle_delay: Duration,
    quick_close_threshold: Duration,
    open_timeout: Duration,
    write_timeout: Duration,
}

/// The armed reconnect timer. There is never more than one.
struct PendingReconnect {
    ticket: u64,
    cancel: CancellationToken,
}

/// Owns the serial link and recovers it automatically
pub struct ConnectionManager {
    settings: PortSettings,
    timings: Timings,
    connector: Arc<dyn DeviceConnector>,
    state: ConnectionState,
    queue: CommandQueue,
    link: Option<Box<dyn DeviceLink>>,
    /// Id of the most recent open attempt. Events tagged with another id
    /// come from a detached link.
    link_id: u64,
    /// First event raised by the link being opened, before its open completed
    early_event: Option<LinkEvent>,
    reconnect: Option<PendingReconnect>,
    next_ticket: u64,
    tx: mpsc::UnboundedSender<ManagerMessage>,
    status_tx: watch::Sender<ConnectionStatus>,
}

impl ConnectionManager {
    /// Starts the manager task and the first connection attempt.
    /// Must be called from within a tokio runtime.
    pub fn spawn(config: &DispenserConfig, connector: Arc<dyn DeviceConnector>) -> DispenserHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let settings = PortSettings {
            device_path: config.device_path.clone(),
            baud_rate: config.baud_rate,
        };
        let state = ConnectionState::default();
        let queue = CommandQueue::new(config.queue_capacity);
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::new(
            settings.device_path.clone(),
            settings.baud_rate,
            &state,
            queue.len(),
        ));

        let manager = Self {
            settings,
            timings: Timings {
                reconnect_delay: config.reconnect_delay(),
                settle_delay: config.settle_delay(),
                quick_close_threshold: config.quick_close_threshold(),
                open_timeout: config.open_timeout(),
                write_timeout: config.write_timeout(),
            },
            connector,
            state,
            queue,
            link: None,
            link_id: 0,
            early_event: None,
            reconnect: None,
            next_ticket: 0,
            tx: tx.clone(),
            status_tx,
        };
        tokio::spawn(manager.run(rx));

        DispenserHandle { tx, status_rx }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<ManagerMessage>) {
        info!(
            "Connection manager started for {} at {} baud",
            self.settings.device_path, self.settings.baud_rate
        );
        self.initialize().await;
        self.publish_status();

        while let Some(message) = rx.recv().await {
            match message {
                ManagerMessage::Dispense {
                    command,
                    reason,
                    reply,
                } => {
                    let outcome = self.handle_dispense(command, reason).await;
                    // The caller may have given up waiting; the outcome stands either way.
                    let _ = reply.send(outcome);
                }
                ManagerMessage::Initialize => self.initialize().await,
                ManagerMessage::ScheduleReconnect => self.schedule_reconnect(),
                ManagerMessage::PendingCommands { reply } => {
                    let _ = reply.send(self.queue.snapshot());
                }
                ManagerMessage::Shutdown { reply } => {
                    self.shutdown().await;
                    self.publish_status();
                    let _ = reply.send(());
                    break;
                }
                ManagerMessage::OpenCompleted { link_id, result } => {
                    self.handle_open_completed(link_id, result).await;
                }
                ManagerMessage::Link { link_id, event } => {
                    self.handle_link_event(link_id, event).await;
                }
                ManagerMessage::ReconnectDue { ticket } => {
                    self.handle_reconnect_due(ticket).await;
                }
                ManagerMessage::SettleElapsed { link_id } => {
                    if link_id == self.link_id && self.state.is_open() {
                        self.drain_queue().await;
                    }
                }
            }
            self.publish_status();
        }

        info!("Connection manager stopped");
    }

    /// Opens a fresh connection unless one is open or already being opened
    async fn initialize(&mut self) {
        match self.state.phase {
            ConnectionPhase::Open => {
                debug!("Dispenser already connected, nothing to initialize");
                return;
            }
            ConnectionPhase::Opening => {
                debug!("Dispenser connection already in progress");
                return;
            }
            ConnectionPhase::Closed | ConnectionPhase::Closing => {}
        }

        if let Some(mut stale) = self.link.take() {
            debug!("Releasing stale dispenser link");
            stale.close().await;
        }

        self.link_id += 1;
        let link_id = self.link_id;
        self.early_event = None;
        self.state.mark_opening();
        info!(
            "Attempting to connect to dispenser on {}...",
            self.settings.device_path
        );

        let connector = self.connector.clone();
        let settings = self.settings.clone();
        let events = LinkEventSender::new(link_id, self.tx.clone());
        let tx = self.tx.clone();
        let open_timeout = self.timings.open_timeout;
        tokio::spawn(async move {
            let result = match tokio::time::timeout(open_timeout, connector.open(&settings, events)).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout {
                    operation: "open",
                    millis: whole_millis(open_timeout),
                }),
            };
            let _ = tx.send(ManagerMessage::OpenCompleted { link_id, result });
        });
    }

    async fn handle_open_completed(
        &mut self,
        link_id: u64,
        result: Result<Box<dyn DeviceLink>, TransportError>,
    ) {
        if link_id != self.link_id || self.state.phase != ConnectionPhase::Opening {
            debug!("Ignoring result of superseded open attempt {}", link_id);
            if let Ok(mut link) = result {
                link.close().await;
            }
            return;
        }

        match result {
            Ok(link) => {
                self.link = Some(link);
                self.state.mark_open();
                self.clear_reconnect();
                info!(
                    "Dispenser serial port opened successfully at {}",
                    Utc::now().to_rfc3339()
                );

                // The port may already have failed while the open was completing
                if let Some(event) = self.early_event.take() {
                    debug!("Applying {:?} raised while the port was opening", event);
                    self.apply_link_event(event).await;
                    return;
                }

                // The board may reset on open; give it a moment before replaying
                let tx = self.tx.clone();
                let settle_delay = self.timings.settle_delay;
                tokio::spawn(async move {
                    tokio::time::sleep(settle_delay).await;
                    let _ = tx.send(ManagerMessage::SettleElapsed { link_id });
                });
            }
            Err(e) => {
                self.early_event = None;
                error!("Failed to open dispenser: {}", e);
                self.state.mark_open_failed(format!("open-failed: {}", e));
                self.schedule_reconnect();
            }
        }
    }

    async fn handle_link_event(&mut self, link_id: u64, event: LinkEvent) {
        if link_id != self.link_id {
            debug!("Ignoring {:?} from detached link {}", event, link_id);
            return;
        }

        match self.state.phase {
            ConnectionPhase::Open => self.apply_link_event(event).await,
            ConnectionPhase::Opening => {
                // The reader starts inside open(); hold the event until the link is ours
                if self.early_event.is_none() {
                    self.early_event = Some(event);
                }
            }
            ConnectionPhase::Closed | ConnectionPhase::Closing => {
                debug!("Ignoring {:?} from closed link {}", event, link_id);
            }
        }
    }

    async fn apply_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Error(message) => {
                error!("Dispenser serial port error: {}", message);
                self.state.last_close_reason = Some(format!("serial-error: {}", message));
                self.close_link(None).await;
            }
            LinkEvent::Closed { reason } => {
                let reason = match reason {
                    Some(reason) => format!("device-closed: {}", reason),
                    None => "device-closed".to_string(),
                };
                self.close_link(Some(reason)).await;
            }
        }
    }

    /// Closes the current link, records why, and arms a reconnect
    async fn close_link(&mut self, reason: Option<String>) {
        if let Some(reason) = reason {
            self.state.note_close_reason(reason);
        }
        self.state.phase = ConnectionPhase::Closing;
        if let Some(mut link) = self.link.take() {
            link.close().await;
        }

        let open_for = self.state.mark_closed();
        let open_duration = match open_for {
            Some(duration) => format!("{}ms", duration.as_millis()),
            None => "unknown".to_string(),
        };
        warn!(
            "Dispenser serial port closed at {} (open-duration: {})",
            Utc::now().to_rfc3339(),
            open_duration
        );

        if let Some(duration) = open_for {
            if duration < self.timings.quick_close_threshold {
                info!(
                    "Diagnostic: port closed within {}ms of opening; possible auto-reset, USB brownout, or bootloader activity.",
                    self.timings.quick_close_threshold.as_millis()
                );
            }
        }
        if let Some(reason) = &self.state.last_close_reason {
            info!("Close reason (if known): {}", reason);
        }
        info!("Pending queued commands at close: {}", self.queue.len());

        self.schedule_reconnect();
    }

    /// Arms the reconnect timer unless one is already pending
    fn schedule_reconnect(&mut self) {
        if self.reconnect.is_some() {
            debug!("Reconnect already scheduled");
            return;
        }

        self.next_ticket += 1;
        let ticket = self.next_ticket;
        let cancel = CancellationToken::new();
        let delay = self.timings.reconnect_delay;
        info!("Will attempt to reconnect in {} ms...", delay.as_millis());

        let tx = self.tx.clone();
        let cancel_for_task = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel_for_task.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = tx.send(ManagerMessage::ReconnectDue { ticket });
                }
            }
        });

        self.reconnect = Some(PendingReconnect { ticket, cancel });
        self.state.reconnect_scheduled = true;
    }

    fn clear_reconnect(&mut self) {
        if let Some(pending) = self.reconnect.take() {
            debug!("Cancelling scheduled reconnect {}", pending.ticket);
            pending.cancel.cancel();
        }
        self.state.reconnect_scheduled = false;
    }

    async fn handle_reconnect_due(&mut self, ticket: u64) {
        match &self.reconnect {
            Some(pending) if pending.ticket == ticket => {
                self.reconnect = None;
                self.state.reconnect_scheduled = false;
                self.initialize().await;
            }
            _ => debug!("Ignoring cancelled reconnect {}", ticket),
        }
    }

    async fn handle_dispense(&mut self, command: DispenseCommand, reason: String) -> DispenseOutcome {
        let amount = command.amount();

        if self.state.is_open() && self.queue.is_empty() {
            return match self.write_command(&command).await {
                Ok(()) => {
                    info!("Sent command to dispense {} coins ({})", amount, reason);
                    DispenseOutcome::Dispatched { amount }
                }
                Err(e) => {
                    error!("Failed to send command to dispenser: {}", e);
                    self.state.last_close_reason = Some(format!("write-failed: {}", e));
                    // Already accepted, so it bypasses any queue bound. The
                    // queue is empty here; head and tail are the same slot.
                    self.queue.requeue_front(QueuedCommand::new(command, reason));
                    self.close_link(None).await;
                    DispenseOutcome::Queued { amount }
                }
            };
        }

        match self.queue.enqueue(QueuedCommand::new(command, reason)) {
            Ok(queue_size) => {
                if self.state.is_open() {
                    // Settling after a reopen; the pending replay sends it in order
                    info!(
                        "Queued dispense command {} behind earlier commands (queue size: {})",
                        amount, queue_size
                    );
                } else {
                    info!(
                        "Dispenser not ready, queued dispense command: {} (queue size: {})",
                        amount, queue_size
                    );
                    self.schedule_reconnect();
                }
                DispenseOutcome::Queued { amount }
            }
            Err(QueueFull(entry)) => {
                warn!(
                    "Dispense queue is full, rejecting {} coins ({})",
                    entry.amount(),
                    entry.reason
                );
                DispenseOutcome::Rejected {
                    reason: format!("dispense queue is full ({} pending)", self.queue.len()),
                }
            }
        }
    }

    /// Writes one command and waits for the transport to flush it.
    /// Only a failed write is an error; a failed flush is logged.
    async fn write_command(&mut self, command: &DispenseCommand) -> Result<(), TransportError> {
        let write_timeout = self.timings.write_timeout;
        let millis = whole_millis(write_timeout);
        let link = self.link.as_mut().ok_or(TransportError::Closed)?;

        let bytes = command.to_bytes();
        tokio::time::timeout(write_timeout, link.write(&bytes))
            .await
            .map_err(|_| TransportError::Timeout {
                operation: "write",
                millis,
            })??;

        match tokio::time::timeout(write_timeout, link.drain()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Drain error after writing {}: {}", command, e),
            Err(_) => warn!("Drain after writing {} timed out after {} ms", command, millis),
        }
        Ok(())
    }

    /// Replays queued commands head first, one at a time. Stops at the first
    /// failed write, leaving that entry at the head.
    async fn drain_queue(&mut self) {
        if !self.state.is_open() {
            debug!("Queue replay requested but port is not open");
            return;
        }
        if self.queue.is_empty() {
            return;
        }

        info!("Replaying {} queued command(s) to dispenser...", self.queue.len());
        while let Some(entry) = self.queue.pop_front() {
            match self.write_command(&entry.command).await {
                Ok(()) => {
                    info!(
                        "Sent queued command to dispense {} coins (reason: {}, queued {}s ago)",
                        entry.amount(),
                        entry.reason,
                        entry.age(Utc::now()).num_seconds()
                    );
                }
                Err(e) => {
                    error!("Failed to write queued command to dispenser: {}", e);
                    self.queue.requeue_front(entry);
                    self.state.last_close_reason = Some(format!("queued-write-failed: {}", e));
                    self.close_link(None).await;
                    return;
                }
            }
        }
        info!("Queue replay complete");
    }

    async fn shutdown(&mut self) {
        info!("Shutting down connection manager...");
        self.clear_reconnect();
        if let Some(mut link) = self.link.take() {
            link.close().await;
        }
        if self.state.phase != ConnectionPhase::Closed {
            self.state.mark_closed();
        }
        if !self.queue.is_empty() {
            warn!(
                "Shutting down with {} undelivered dispense command(s)",
                self.queue.len()
            );
        }
    }

    fn publish_status(&self) {
        self.status_tx.send_replace(ConnectionStatus::new(
            self.settings.device_path.clone(),
            self.settings.baud_rate,
            &self.state,
            self.queue.len(),
        ));
    }
}

fn whole_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// A clonable handle to the connection manager task
#[derive(Clone)]
pub struct DispenserHandle {
    tx: mpsc::UnboundedSender<ManagerMessage>,
    status_rx: watch::Receiver<ConnectionStatus>,
}

impl DispenserHandle {
    /// Requests that `amount` coins be dispensed.
    ///
    /// Invalid amounts are rejected here without touching the queue. Valid
    /// requests resolve as dispatched or queued; connectivity problems never
    /// surface as errors.
    pub async fn dispense(
        &self,
        amount: i64,
        reason: Option<&str>,
    ) -> Result<DispenseOutcome, ManagerError> {
        match DispenseCommand::new(amount) {
            Ok(command) => self.submit(command, reason).await,
            Err(e) => {
                warn!("Rejected dispense request: {}", e);
                Ok(DispenseOutcome::Rejected {
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Submits an already validated command
    pub async fn submit(
        &self,
        command: DispenseCommand,
        reason: Option<&str>,
    ) -> Result<DispenseOutcome, ManagerError> {
        let reason = reason
            .map(str::trim)
            .filter(|reason| !reason.is_empty())
            .unwrap_or(DEFAULT_DISPENSE_REASON)
            .to_string();
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(ManagerMessage::Dispense {
                command,
                reason,
                reply,
            })
            .map_err(|_| ManagerError::Stopped)?;
        rx.await.map_err(|_| ManagerError::Stopped)
    }

    /// Current connection snapshot. Never waits on device I/O.
    pub fn status(&self) -> ConnectionStatus {
        self.status_rx.borrow().clone()
    }

    /// Receiver that observes every published status change
    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_rx.clone()
    }

    /// Asks the manager to open the port now. A no-op while open.
    pub fn initialize(&self) -> Result<(), ManagerError> {
        self.tx
            .send(ManagerMessage::Initialize)
            .map_err(|_| ManagerError::Stopped)
    }

    /// Arms a reconnect unless one is already pending
    pub fn schedule_reconnect(&self) -> Result<(), ManagerError> {
        self.tx
            .send(ManagerMessage::ScheduleReconnect)
            .map_err(|_| ManagerError::Stopped)
    }

    /// The queued commands, head first
    pub async fn pending_commands(&self) -> Result<Vec<QueuedCommand>, ManagerError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(ManagerMessage::PendingCommands { reply })
            .map_err(|_| ManagerError::Stopped)?;
        rx.await.map_err(|_| ManagerError::Stopped)
    }

    /// Closes the port and stops the manager task
    pub async fn shutdown(&self) -> Result<(), ManagerError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(ManagerMessage::Shutdown { reply })
            .map_err(|_| ManagerError::Stopped)?;
        rx.await.map_err(|_| ManagerError::Stopped)
    }
}
