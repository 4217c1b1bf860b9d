//! Scripted in-memory dispenser shared by the integration tests

#![allow(dead_code)]

use std::collections::HashSet;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dmtable_coin_bridge_lib::config::dispenser_config::DispenserConfig;
use dmtable_coin_bridge_lib::core::serial::{
    ConnectionStatus, DeviceConnector, DeviceLink, LinkEventSender, PortSettings, TransportError,
};
use dmtable_coin_bridge_lib::core::{ConnectionManager, DispenserHandle};

#[derive(Default)]
struct Script {
    available: bool,
    open_attempts: usize,
    closes: usize,
    /// Payloads (without newline) whose next write fails once
    fail_writes: HashSet<String>,
    fail_drain: bool,
    /// Open never completes while set
    hang_opens: bool,
    /// Payloads whose next write never completes
    hang_writes: HashSet<String>,
    /// Event to raise from inside the next successful open
    close_during_open: Option<String>,
    /// Everything the device saw, in order: "open", "write 3", "drain", "close", ...
    ops: Vec<String>,
    events: Option<LinkEventSender>,
}

/// A fake dispenser. Clones share the same script.
#[derive(Clone, Default)]
pub struct MockDevice {
    script: Arc<Mutex<Script>>,
}

impl MockDevice {
    pub fn new(available: bool) -> Self {
        let device = Self::default();
        device.set_available(available);
        device
    }

    pub fn set_available(&self, available: bool) {
        self.script.lock().unwrap().available = available;
    }

    pub fn fail_next_write_of(&self, amount: u8) {
        self.script
            .lock()
            .unwrap()
            .fail_writes
            .insert(amount.to_string());
    }

    pub fn hang_opens(&self, hang: bool) {
        self.script.lock().unwrap().hang_opens = hang;
    }

    pub fn hang_next_write_of(&self, amount: u8) {
        self.script
            .lock()
            .unwrap()
            .hang_writes
            .insert(amount.to_string());
    }

    /// The next successful open reports the port closed before it returns
    pub fn close_during_next_open(&self, reason: &str) {
        self.script.lock().unwrap().close_during_open = Some(reason.to_string());
    }

    /// Event sender handed to the most recent successful open
    pub fn link_events(&self) -> LinkEventSender {
        self.script
            .lock()
            .unwrap()
            .events
            .clone()
            .expect("device was never opened")
    }

    pub fn fail_drains(&self) {
        self.script.lock().unwrap().fail_drain = true;
    }

    pub fn open_attempts(&self) -> usize {
        self.script.lock().unwrap().open_attempts
    }

    pub fn closes(&self) -> usize {
        self.script.lock().unwrap().closes
    }

    pub fn ops(&self) -> Vec<String> {
        self.script.lock().unwrap().ops.clone()
    }

    /// Amounts the device actually received
    pub fn delivered(&self) -> Vec<u8> {
        self.ops()
            .iter()
            .filter_map(|op| op.strip_prefix("write "))
            .map(|amount| amount.parse().unwrap())
            .collect()
    }

    /// Simulates the cable being pulled
    pub fn unplug(&self, reason: &str) {
        let events = {
            let mut script = self.script.lock().unwrap();
            script.available = false;
            script.events.clone()
        };
        events
            .expect("device was never opened")
            .closed(Some(reason.to_string()));
    }

    pub fn raise_error(&self, message: &str) {
        let events = self.script.lock().unwrap().events.clone();
        events.expect("device was never opened").error(message);
    }
}

#[async_trait::async_trait]
impl DeviceConnector for MockDevice {
    async fn open(
        &self,
        settings: &PortSettings,
        events: LinkEventSender,
    ) -> Result<Box<dyn DeviceLink>, TransportError> {
        let hang = {
            let mut script = self.script.lock().unwrap();
            script.open_attempts += 1;
            script.hang_opens
        };
        if hang {
            std::future::pending::<()>().await;
        }

        let mut script = self.script.lock().unwrap();
        if !script.available {
            return Err(TransportError::Open {
                path: settings.device_path.clone(),
                source: io::Error::new(io::ErrorKind::NotFound, "No such file or directory"),
            });
        }
        script.ops.push("open".to_string());
        if let Some(reason) = script.close_during_open.take() {
            events.closed(Some(reason));
        }
        script.events = Some(events);
        Ok(Box::new(MockLink {
            device: self.clone(),
        }))
    }
}

struct MockLink {
    device: MockDevice,
}

#[async_trait::async_trait]
impl DeviceLink for MockLink {
    async fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let payload = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(payload.ends_with('\n'), "commands are newline terminated");
        let amount = payload.trim_end().to_string();

        let hang = {
            let mut script = self.device.script.lock().unwrap();
            let hang = script.hang_writes.remove(&amount);
            if hang {
                script.ops.push(format!("write-hung {}", amount));
            }
            hang
        };
        if hang {
            std::future::pending::<()>().await;
        }

        let mut script = self.device.script.lock().unwrap();
        if script.fail_writes.remove(&amount) {
            script.ops.push(format!("write-failed {}", amount));
            return Err(TransportError::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "Broken pipe",
            )));
        }
        script.ops.push(format!("write {}", amount));
        Ok(())
    }

    async fn drain(&mut self) -> Result<(), TransportError> {
        let mut script = self.device.script.lock().unwrap();
        script.ops.push("drain".to_string());
        if script.fail_drain {
            return Err(TransportError::Io(io::Error::new(
                io::ErrorKind::Other,
                "tcdrain failed",
            )));
        }
        Ok(())
    }

    async fn close(&mut self) {
        let mut script = self.device.script.lock().unwrap();
        script.closes += 1;
        script.ops.push("close".to_string());
    }
}

pub fn test_config() -> DispenserConfig {
    DispenserConfig {
        device_path: "/dev/ttyTEST0".to_string(),
        ..DispenserConfig::default()
    }
}

pub fn spawn_manager(device: &MockDevice) -> DispenserHandle {
    spawn_manager_with(test_config(), device)
}

pub fn spawn_manager_with(config: DispenserConfig, device: &MockDevice) -> DispenserHandle {
    ConnectionManager::spawn(&config, Arc::new(device.clone()))
}

/// Waits (in virtual time) until the published status satisfies `predicate`
pub async fn wait_for_status<F>(handle: &DispenserHandle, predicate: F) -> ConnectionStatus
where
    F: FnMut(&ConnectionStatus) -> bool,
{
    let mut status_rx = handle.subscribe();
    let status = tokio::time::timeout(Duration::from_secs(60), status_rx.wait_for(predicate))
        .await
        .expect("timed out waiting for status")
        .expect("connection manager stopped");
    status.clone()
}

pub async fn wait_until_connected(handle: &DispenserHandle) -> ConnectionStatus {
    wait_for_status(handle, |status| status.connected).await
}

/// Waits until the boot-time open attempt has failed
pub async fn wait_until_open_failed(handle: &DispenserHandle) -> ConnectionStatus {
    wait_for_status(handle, |status| {
        status
            .last_close_reason
            .as_deref()
            .is_some_and(|reason| reason.starts_with("open-failed"))
    })
    .await
}

pub async fn queued_amounts(handle: &DispenserHandle) -> Vec<u8> {
    handle
        .pending_commands()
        .await
        .unwrap()
        .iter()
        .map(|entry| entry.amount())
        .collect()
}
