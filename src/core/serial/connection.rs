//! Serial connection handling for the coin dispenser
//! This module opens the dispenser's serial port and implements the device
//! transport on top of it.

use log::{debug, info, warn};
use tokio::io::{AsyncWriteExt, WriteHalf};
use tokio::task::JoinHandle;
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, SerialStream, StopBits};
use tokio_util::sync::CancellationToken;

use crate::core::serial::notification::DeviceOutputHandler;
use crate::core::serial::transport::{
    DeviceConnector, DeviceLink, LinkEventSender, PortSettings, TransportError,
};

/// Opens the dispenser's serial port
#[derive(Debug, Clone, Default)]
pub struct SerialConnector;

impl SerialConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl DeviceConnector for SerialConnector {
    async fn open(
        &self,
        settings: &PortSettings,
        events: LinkEventSender,
    ) -> Result<Box<dyn DeviceLink>, TransportError> {
        info!(
            "Opening serial port {} at {} baud...",
            settings.device_path, settings.baud_rate
        );

        // Keep DTR low on open so the board is not reset by the connection itself
        let stream = tokio_serial::new(settings.device_path.as_str(), settings.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .dtr_on_open(false)
            .open_native_async()
            .map_err(|e| TransportError::Open {
                path: settings.device_path.clone(),
                source: e.into(),
            })?;

        let (reader, writer) = tokio::io::split(stream);
        let cancel = CancellationToken::new();
        let reader_task = DeviceOutputHandler::spawn(reader, events, cancel.clone());

        info!("Serial port {} opened", settings.device_path);
        Ok(Box::new(SerialLink {
            device_path: settings.device_path.clone(),
            writer: Some(writer),
            cancel,
            reader_task: Some(reader_task),
        }))
    }
}

/// An open serial port. Dropping both halves closes the file descriptor.
pub struct SerialLink {
    device_path: String,
    writer: Option<WriteHalf<SerialStream>>,
    cancel: CancellationToken,
    reader_task: Option<JoinHandle<()>>,
}

#[async_trait::async_trait]
impl DeviceLink for SerialLink {
    async fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let writer = self.writer.as_mut().ok_or(TransportError::Closed)?;
        writer.write_all(bytes).await?;
        Ok(())
    }

    async fn drain(&mut self) -> Result<(), TransportError> {
        let writer = self.writer.as_mut().ok_or(TransportError::Closed)?;
        writer.flush().await?;
        Ok(())
    }

    async fn close(&mut self) {
        self.cancel.cancel();
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.shutdown().await {
                debug!("Shutdown of {} reported: {}", self.device_path, e);
            }
        }
        // The reader owns the other half of the port
        if let Some(reader_task) = self.reader_task.take() {
            if let Err(e) = reader_task.await {
                warn!("Device output reader for {} ended abnormally: {}", self.device_path, e);
            }
        }
        info!("Serial port {} closed", self.device_path);
    }
}

impl Drop for SerialLink {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
