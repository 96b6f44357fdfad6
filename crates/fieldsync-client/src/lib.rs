//! MSP client for the field syncer.
//!
//! Three layers, bottom up:
//!
//! - [`transport`]: owns the serial port, decodes bytes into frames on a
//!   reader task, writes whole frames with bounded retries.
//! - [`client`]: request/response correlation with timeouts, plus the
//!   pipelined dataflash read that keeps the FC's flash latency hidden.
//! - [`handshake`]: the ordered identify sequence that gates every sync.
//!
//! The [`Transport`] trait is the seam the deterministic test harness plugs
//! into; production uses [`SerialTransport`].

pub mod client;
pub mod handshake;
pub mod transport;

pub use client::{ClientError, FlashReadPlan, MspClient};
pub use handshake::{HandshakeError, blackbox_device, flash_summary, identify};
pub use transport::{SerialTransport, Transport, TransportError};
