//! Serial transport: frame-level I/O over the FC's USB CDC link.
//!
//! The port is owned exclusively here. A reader task drains the port through
//! a single [`FrameDecoder`] and hands validated frames to the client over a
//! bounded channel; writes go out whole, with bounded retries on transient
//! errors. Nothing in this module interprets opcodes.

use std::{future::Future, io, time::Duration};

use fieldsync_proto::{Frame, FrameDecoder, encode_frame};
use thiserror::Error;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt, WriteHalf},
    sync::mpsc,
};
use tokio_serial::{SerialPortBuilderExt, SerialStream};

/// Transient write/read attempts before giving up.
const IO_RETRIES: u32 = 3;

/// Backoff between transient I/O retries.
const IO_RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// Consecutive checksum failures that stop counting as line noise.
const CRC_MISMATCH_QUOTA: u32 = 3;

/// Transport errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Port missing, busy, or refusing our settings.
    #[error("opening serial port {path}: {reason}")]
    Open {
        /// Device path.
        path: String,
        /// Underlying error rendered.
        reason: String,
    },

    /// Mid-session read or write failure.
    #[error("serial I/O: {0}")]
    Io(String),

    /// The byte stream stopped looking like MSP.
    #[error("protocol violation: {0}")]
    Protocol(String),
}

/// Frame-level link to the flight controller.
///
/// Implementations must deliver frames in port order. `recv` returning
/// `Ok(None)` means the link closed cleanly (device unplugged).
pub trait Transport: Send {
    /// Write one frame, whole.
    fn send(&mut self, frame: Frame)
    -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Next decoded frame, in port order.
    fn recv(&mut self)
    -> impl Future<Output = Result<Option<Frame>, TransportError>> + Send;
}

/// Production transport over a `tokio-serial` stream.
pub struct SerialTransport {
    writer: WriteHalf<SerialStream>,
    frames: mpsc::Receiver<Result<Frame, TransportError>>,
    _reader: tokio::task::JoinHandle<()>,
}

impl SerialTransport {
    /// Open `path` at `baud`, 8N1, exclusive, and start the reader task.
    pub fn open(path: &str, baud: u32) -> Result<Self, TransportError> {
        let open_err = |e: tokio_serial::Error| TransportError::Open {
            path: path.to_string(),
            reason: e.to_string(),
        };

        let mut port = tokio_serial::new(path, baud)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(open_err)?;
        #[cfg(unix)]
        port.set_exclusive(true).map_err(open_err)?;

        let (reader, writer) = tokio::io::split(port);
        let (tx, frames) = mpsc::channel(32);
        let handle = tokio::spawn(read_loop(reader, tx));

        tracing::info!(path, baud, "serial port opened");
        Ok(Self { writer, frames, _reader: handle })
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self._reader.abort();
    }
}

impl Transport for SerialTransport {
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        let wire = encode_frame(&frame).map_err(|e| TransportError::Protocol(e.to_string()))?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = async {
                self.writer.write_all(&wire).await?;
                self.writer.flush().await
            }
            .await;

            match result {
                Ok(()) => return Ok(()),
                Err(e) if attempt < IO_RETRIES && is_transient(&e) => {
                    tracing::warn!(attempt, error = %e, "transient serial write failure, retrying");
                    tokio::time::sleep(IO_RETRY_BACKOFF).await;
                },
                Err(e) => return Err(TransportError::Io(format!("write failed: {e}"))),
            }
        }
    }

    async fn recv(&mut self) -> Result<Option<Frame>, TransportError> {
        match self.frames.recv().await {
            Some(Ok(frame)) => Ok(Some(frame)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }
}

/// Whether an I/O error is worth a bounded retry.
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

/// Reader task: port bytes through the decoder into the frame channel.
async fn read_loop(
    mut reader: tokio::io::ReadHalf<SerialStream>,
    tx: mpsc::Sender<Result<Frame, TransportError>>,
) {
    let mut decoder = FrameDecoder::new();
    let mut buf = [0u8; 4096];
    let mut read_failures: u32 = 0;
    let mut reported_mismatches: u32 = 0;

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => {
                tracing::info!("serial link closed");
                return;
            },
            Ok(n) => {
                read_failures = 0;
                n
            },
            Err(e) if is_transient(&e) && read_failures < IO_RETRIES => {
                read_failures += 1;
                tokio::time::sleep(IO_RETRY_BACKOFF).await;
                continue;
            },
            Err(e) => {
                let _ = tx.send(Err(TransportError::Io(format!("read failed: {e}")))).await;
                return;
            },
        };

        for &byte in &buf[..n] {
            if let Some(frame) = decoder.push(byte) {
                tracing::trace!(code = frame.code, len = frame.payload.len(), "frame decoded");
                reported_mismatches = 0;
                if tx.send(Ok(frame)).await.is_err() {
                    return;
                }
                continue;
            }
            let mismatches = decoder.consecutive_crc_mismatches();
            if mismatches >= CRC_MISMATCH_QUOTA && mismatches != reported_mismatches {
                // Silent resync stops being plausible noise here.
                reported_mismatches = mismatches;
                let sent = tx
                    .send(Err(TransportError::Protocol(format!(
                        "{mismatches} consecutive checksum failures"
                    ))))
                    .await;
                if sent.is_err() {
                    return;
                }
            }
        }
    }
}
