//! Device output handling for the coin dispenser
//! This module reads the line-delimited output of the dispenser. Lines are
//! only logged; the end of the stream or a read error is reported to the
//! connection manager as a link event.

use futures_util::StreamExt;
use log::{debug, error, info, warn};
use tokio::io::AsyncRead;
use tokio::task::JoinHandle;
use tokio_util::bytes::{Bytes, BytesMut};
use tokio_util::codec::{AnyDelimiterCodec, AnyDelimiterCodecError, Decoder, FramedRead};
use tokio_util::sync::CancellationToken;

use crate::core::serial::transport::LinkEventSender;

/// Longest line accepted from the device
const MAX_LINE_LENGTH: usize = 1024;

/// Newline framing for device output. A line over [`MAX_LINE_LENGTH`] is
/// dropped with a warning and reading carries on with the next line.
struct DeviceLineCodec {
    inner: AnyDelimiterCodec,
}

impl DeviceLineCodec {
    fn new() -> Self {
        Self {
            inner: AnyDelimiterCodec::new_with_max_length(b"\n".to_vec(), Vec::new(), MAX_LINE_LENGTH),
        }
    }

    fn warn_overlong() {
        warn!(
            "Discarding device output line longer than {} bytes",
            MAX_LINE_LENGTH
        );
    }
}

impl Decoder for DeviceLineCodec {
    type Item = Bytes;
    type Error = AnyDelimiterCodecError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Bytes>, Self::Error> {
        loop {
            // After the error the inner codec skips to the next delimiter
            match self.inner.decode(buf) {
                Err(AnyDelimiterCodecError::MaxChunkLengthExceeded) => Self::warn_overlong(),
                other => return other,
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Bytes>, Self::Error> {
        loop {
            match self.inner.decode_eof(buf) {
                Err(AnyDelimiterCodecError::MaxChunkLengthExceeded) => Self::warn_overlong(),
                other => return other,
            }
        }
    }
}

/// Reads device output for one open link
pub struct DeviceOutputHandler;

impl DeviceOutputHandler {
    /// Spawn a task that logs device output until the link ends or `cancel` fires.
    /// Cancellation is silent; the owner is closing the link itself.
    pub fn spawn<R>(reader: R, events: LinkEventSender, cancel: CancellationToken) -> JoinHandle<()>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        tokio::spawn(async move {
            Self::process_output(reader, events, cancel).await;
        })
    }

    async fn process_output<R>(reader: R, events: LinkEventSender, cancel: CancellationToken)
    where
        R: AsyncRead + Send + Unpin,
    {
        debug!("Listening for device output...");
        let mut lines = FramedRead::new(reader, DeviceLineCodec::new());

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Device output reader cancelled");
                    return;
                }
                next = lines.next() => match next {
                    Some(Ok(line)) => {
                        let line = String::from_utf8_lossy(&line);
                        let line = line.trim();
                        if !line.is_empty() {
                            info!("device: {}", line);
                        }
                    }
                    Some(Err(e)) => {
                        error!("Error reading device output: {}", e);
                        events.error(e.to_string());
                        return;
                    }
                    None => {
                        info!("Device output stream ended");
                        events.closed(Some("end of stream".to_string()));
                        return;
                    }
                }
            }
        }
    }
}
