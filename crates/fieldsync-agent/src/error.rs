//! Sync-level error taxonomy.
//!
//! Every failure a sync can hit collapses into one [`SyncError`] kind with
//! enough context to log, a stable process exit code, and (always) the
//! `Error` signal pattern. Lower layers keep their own richer error enums;
//! the conversions here are the single place that flattening happens.

use fieldsync_client::{ClientError, HandshakeError, TransportError};
use fieldsync_core::{PreflightError, SessionError};
use thiserror::Error;

/// Which wait gave up, for [`SyncError::Timeout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutStage {
    /// A single request/response exchange.
    Request,
    /// The pipelined flash stream.
    Stream,
    /// The whole-sync watchdog.
    FullSync,
}

/// Everything that can end a sync early.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Serial port missing, busy, or misconfigured.
    #[error("serial port unavailable: {0}")]
    SerialOpen(String),

    /// Read or write failure mid-session.
    #[error("serial I/O failed: {0}")]
    SerialIo(String),

    /// A response did not arrive inside its window.
    #[error("timed out during {stage:?}")]
    Timeout {
        /// Which wait expired.
        stage: TimeoutStage,
    },

    /// The byte stream or a payload stopped making sense.
    #[error("protocol error: {reason}")]
    Protocol {
        /// What went wrong.
        reason: String,
    },

    /// Firmware family or API version this agent does not speak.
    #[error("unsupported flight controller: {detail}")]
    UnsupportedFc {
        /// Variant or version information from the handshake.
        detail: String,
    },

    /// Blackbox logs to SD card; MSP cannot read it.
    #[error("flight controller logs to SD card, not SPI flash")]
    SdCardBackedFc,

    /// Flash reported absent or not ready.
    #[error("dataflash unavailable: {reason}")]
    FlashUnavailable {
        /// What the summary reported.
        reason: String,
    },

    /// Storage preflight found too little free space.
    #[error("insufficient disk space: {have} bytes free, {need} required")]
    InsufficientSpace {
        /// Bytes available.
        have: u64,
        /// Bytes required, headroom included.
        need: u64,
    },

    /// On-disk copy does not hash to the streamed digest.
    #[error("verification mismatch: streamed {expected}, on disk {actual}")]
    VerifyMismatch {
        /// Streamed SHA-256, hex.
        expected: String,
        /// Re-read SHA-256, hex.
        actual: String,
    },

    /// The FC still reported data after the erase-poll deadline.
    #[error("erase did not complete within the poll window")]
    EraseTimeout,

    /// The sync was cancelled from outside.
    #[error("sync cancelled")]
    Cancelled,

    /// Session storage failed outside of verification.
    #[error("storage: {0}")]
    Storage(String),
}

impl SyncError {
    /// Stable process exit code for this error kind.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::SerialOpen(_) => 10,
            Self::SerialIo(_) => 11,
            Self::Timeout { .. } => 12,
            Self::Protocol { .. } => 13,
            Self::UnsupportedFc { .. } => 14,
            Self::SdCardBackedFc => 15,
            Self::InsufficientSpace { .. } => 16,
            Self::VerifyMismatch { .. } => 17,
            Self::EraseTimeout => 18,
            Self::Cancelled => 19,
            Self::Storage(_) => 20,
            Self::FlashUnavailable { .. } => 21,
        }
    }
}

impl From<TransportError> for SyncError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Open { .. } => Self::SerialOpen(err.to_string()),
            TransportError::Io(msg) => Self::SerialIo(msg),
            TransportError::Protocol(reason) => Self::Protocol { reason },
        }
    }
}

impl From<ClientError> for SyncError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Transport(e) => e.into(),
            ClientError::Protocol(e) => Self::Protocol { reason: e.to_string() },
            ClientError::RequestTimeout { .. } => Self::Timeout { stage: TimeoutStage::Request },
            ClientError::ChunkTimeout { .. } => Self::Timeout { stage: TimeoutStage::Stream },
            ClientError::Rejected { .. } | ClientError::EmptyChunk { .. } => {
                Self::Protocol { reason: err.to_string() }
            },
            ClientError::LinkClosed => Self::SerialIo(err.to_string()),
            ClientError::Sink(e) => Self::Storage(e.to_string()),
        }
    }
}

impl From<HandshakeError> for SyncError {
    fn from(err: HandshakeError) -> Self {
        match err {
            HandshakeError::Client(e) => e.into(),
            HandshakeError::Malformed(e) => Self::Protocol { reason: e.to_string() },
            HandshakeError::ApiTooOld { .. } | HandshakeError::UnsupportedVariant { .. } => {
                Self::UnsupportedFc { detail: err.to_string() }
            },
            HandshakeError::NoFlash | HandshakeError::FlashNotReady => {
                Self::FlashUnavailable { reason: err.to_string() }
            },
            HandshakeError::SdCardBacked => Self::SdCardBackedFc,
        }
    }
}

impl From<SessionError> for SyncError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::VerifyMismatch { expected, actual } => {
                Self::VerifyMismatch { expected, actual }
            },
            other => Self::Storage(other.to_string()),
        }
    }
}

impl From<PreflightError> for SyncError {
    fn from(err: PreflightError) -> Self {
        match err {
            PreflightError::InsufficientSpace { have, need } => {
                Self::InsufficientSpace { have, need }
            },
            PreflightError::Io { .. } => Self::Storage(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_distinct() {
        let errors = [
            SyncError::SerialOpen(String::new()),
            SyncError::SerialIo(String::new()),
            SyncError::Timeout { stage: TimeoutStage::Stream },
            SyncError::Protocol { reason: String::new() },
            SyncError::UnsupportedFc { detail: String::new() },
            SyncError::SdCardBackedFc,
            SyncError::InsufficientSpace { have: 0, need: 1 },
            SyncError::VerifyMismatch { expected: String::new(), actual: String::new() },
            SyncError::EraseTimeout,
            SyncError::Cancelled,
            SyncError::Storage(String::new()),
            SyncError::FlashUnavailable { reason: String::new() },
        ];
        let mut codes: Vec<u8> = errors.iter().map(SyncError::exit_code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn handshake_variants_map_to_distinct_kinds() {
        assert!(matches!(
            SyncError::from(HandshakeError::UnsupportedVariant { variant: "INAV".into() }),
            SyncError::UnsupportedFc { .. }
        ));
        assert!(matches!(SyncError::from(HandshakeError::SdCardBacked), SyncError::SdCardBackedFc));
        assert!(matches!(
            SyncError::from(HandshakeError::NoFlash),
            SyncError::FlashUnavailable { .. }
        ));
    }

    #[test]
    fn chunk_timeout_is_a_stream_timeout() {
        let err = SyncError::from(ClientError::ChunkTimeout { offset: 4096 });
        assert!(matches!(err, SyncError::Timeout { stage: TimeoutStage::Stream }));
    }
}
