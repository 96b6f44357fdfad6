//! Ordered identify sequence run before any flash is touched.
//!
//! Every step has its own failure variant so the operator signal and the
//! audit log can tell a wrong firmware from a missing flash chip from an
//! SD-card build.

use bytes::Bytes;
use fieldsync_core::{FcIdentity, FlashSummary};
use fieldsync_proto::{
    Opcode, ProtocolError,
    payloads::{
        ApiVersionReply, BLACKBOX_DEVICE_SDCARD, BlackboxConfigReply, DataflashSummaryReply,
        FcVariantReply, UidReply,
    },
};
use thiserror::Error;

use crate::{
    client::{ClientError, MspClient},
    transport::Transport,
};

/// Oldest API version with the dataflash semantics we rely on.
pub const MIN_API_VERSION: (u8, u8) = (1, 40);

/// The one firmware family this agent syncs.
pub const SUPPORTED_VARIANT: &[u8; 4] = b"BTFL";

/// Handshake failures.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// Request plumbing failed underneath the handshake.
    #[error(transparent)]
    Client(#[from] ClientError),

    /// A reply did not match its documented layout.
    #[error("malformed reply: {0}")]
    Malformed(#[from] ProtocolError),

    /// Firmware predates the dataflash API we need.
    #[error("unsupported API version {major}.{minor} (need at least 1.40)")]
    ApiTooOld {
        /// Reported major version.
        major: u8,
        /// Reported minor version.
        minor: u8,
    },

    /// Not a firmware family this agent speaks.
    #[error("unsupported firmware variant {variant:?}")]
    UnsupportedVariant {
        /// The reported four-character identifier.
        variant: String,
    },

    /// The board has no dataflash fitted.
    #[error("no dataflash fitted (total size is zero)")]
    NoFlash,

    /// The dataflash did not report ready.
    #[error("dataflash not ready")]
    FlashNotReady,

    /// Blackbox logs to an SD card; MSP cannot read it.
    #[error("blackbox is SD-card backed; nothing to sync over MSP")]
    SdCardBacked,
}

/// Identify the attached FC: API version, variant, UID.
///
/// Rejects anything older than 1.40 or not identifying as `BTFL` before a
/// single flash-related request is sent.
pub async fn identify<T: Transport>(
    client: &mut MspClient<T>,
) -> Result<FcIdentity, HandshakeError> {
    let api =
        ApiVersionReply::parse(&client.request(Opcode::ApiVersion, Bytes::new()).await?)?;
    if (api.major, api.minor) < MIN_API_VERSION {
        return Err(HandshakeError::ApiTooOld { major: api.major, minor: api.minor });
    }

    let variant =
        FcVariantReply::parse(&client.request(Opcode::FcVariant, Bytes::new()).await?)?;
    if &variant.variant != SUPPORTED_VARIANT {
        return Err(HandshakeError::UnsupportedVariant { variant: variant.as_str() });
    }

    let uid = UidReply::parse(&client.request(Opcode::Uid, Bytes::new()).await?)?;

    let identity = FcIdentity {
        variant: variant.variant,
        uid: uid.uid,
        api_version: (api.major, api.minor),
    };
    tracing::info!(
        variant = %identity.variant_str(),
        uid = %identity.uid_hex(),
        api = %identity.api_version_str(),
        "flight controller identified"
    );
    Ok(identity)
}

/// Read the dataflash summary, requiring a fitted and ready flash.
pub async fn flash_summary<T: Transport>(
    client: &mut MspClient<T>,
) -> Result<FlashSummary, HandshakeError> {
    let reply = DataflashSummaryReply::parse(
        &client.request(Opcode::DataflashSummary, Bytes::new()).await?,
    )?;
    let summary = FlashSummary::from(reply);

    if summary.total_size == 0 {
        return Err(HandshakeError::NoFlash);
    }
    if !summary.is_ready() {
        return Err(HandshakeError::FlashNotReady);
    }

    tracing::debug!(
        used = summary.used_size,
        total = summary.total_size,
        compression = summary.supports_compression(),
        "dataflash summary"
    );
    Ok(summary)
}

/// Read the blackbox device byte, rejecting SD-card-backed logging.
///
/// The rest of the config reply varies by API version and stays opaque; the
/// device byte is all the syncer needs.
pub async fn blackbox_device<T: Transport>(
    client: &mut MspClient<T>,
) -> Result<u8, HandshakeError> {
    let config = BlackboxConfigReply::parse(
        &client.request(Opcode::BlackboxConfig, Bytes::new()).await?,
    )?;
    if config.device == BLACKBOX_DEVICE_SDCARD {
        return Err(HandshakeError::SdCardBacked);
    }
    Ok(config.device)
}

#[cfg(test)]
mod tests {
    use std::{collections::VecDeque, time::Duration};

    use fieldsync_proto::Frame;

    use super::*;
    use crate::transport::TransportError;

    struct Scripted {
        replies: VecDeque<Frame>,
    }

    impl Transport for Scripted {
        async fn send(&mut self, _frame: Frame) -> Result<(), TransportError> {
            Ok(())
        }

        async fn recv(&mut self) -> Result<Option<Frame>, TransportError> {
            Ok(self.replies.pop_front())
        }
    }

    fn client_with(replies: Vec<Frame>) -> MspClient<Scripted> {
        MspClient::new(Scripted { replies: replies.into() }, Duration::from_secs(1))
    }

    #[tokio::test]
    async fn identify_accepts_modern_btfl() {
        let mut client = client_with(vec![
            Frame::response(1, vec![0, 1, 45]),
            Frame::response(2, Bytes::from_static(b"BTFL")),
            Frame::response(160, vec![9u8; 12]),
        ]);
        let identity = identify(&mut client).await.unwrap();
        assert_eq!(identity.variant_str(), "BTFL");
        assert_eq!(identity.api_version, (1, 45));
    }

    #[tokio::test]
    async fn identify_rejects_old_api() {
        let mut client = client_with(vec![Frame::response(1, vec![0, 1, 39])]);
        let err = identify(&mut client).await.unwrap_err();
        assert!(matches!(err, HandshakeError::ApiTooOld { major: 1, minor: 39 }));
    }

    #[tokio::test]
    async fn identify_rejects_other_firmware() {
        let mut client = client_with(vec![
            Frame::response(1, vec![0, 1, 45]),
            Frame::response(2, Bytes::from_static(b"INAV")),
        ]);
        let err = identify(&mut client).await.unwrap_err();
        match err {
            HandshakeError::UnsupportedVariant { variant } => assert_eq!(variant, "INAV"),
            other => panic!("expected variant rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn summary_rejects_missing_flash() {
        let reply = DataflashSummaryReply {
            flags: 0x01,
            sectors: 0,
            total_size: 0,
            used_size: 0,
        };
        let mut client = client_with(vec![Frame::response(70, reply.to_bytes())]);
        let err = flash_summary(&mut client).await.unwrap_err();
        assert!(matches!(err, HandshakeError::NoFlash));
    }

    #[tokio::test]
    async fn summary_rejects_not_ready() {
        let reply = DataflashSummaryReply {
            flags: 0x00,
            sectors: 64,
            total_size: 2 * 1024 * 1024,
            used_size: 0,
        };
        let mut client = client_with(vec![Frame::response(70, reply.to_bytes())]);
        let err = flash_summary(&mut client).await.unwrap_err();
        assert!(matches!(err, HandshakeError::FlashNotReady));
    }

    #[tokio::test]
    async fn sd_card_device_is_rejected() {
        let mut client =
            client_with(vec![Frame::response(80, vec![1, BLACKBOX_DEVICE_SDCARD, 1, 1])]);
        let err = blackbox_device(&mut client).await.unwrap_err();
        assert!(matches!(err, HandshakeError::SdCardBacked));
    }

    #[tokio::test]
    async fn spi_flash_device_is_accepted() {
        let mut client = client_with(vec![Frame::response(80, vec![1, 1, 1, 1])]);
        assert_eq!(blackbox_device(&mut client).await.unwrap(), 1);
    }
}
