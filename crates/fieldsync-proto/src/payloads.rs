//! Typed payload layouts for the opcodes the syncer speaks.
//!
//! All multi-byte fields are little-endian on the wire. Each reply struct
//! parses from raw payload bytes and each request struct builds them; the
//! frame codec neither knows nor cares about any of these layouts.

use bytes::{BufMut, Bytes};

use crate::errors::{ProtocolError, Result};

/// Dataflash is initialized and readable.
pub const DATAFLASH_FLAG_READY: u8 = 1 << 0;

/// Firmware supports Huffman-compressed dataflash reads.
pub const DATAFLASH_FLAG_READ_COMPRESSED_SUPPORT: u8 = 1 << 1;

/// Blackbox logs to onboard SPI flash.
pub const BLACKBOX_DEVICE_FLASH: u8 = 1;

/// Blackbox logs to an SD card; there is nothing to read over MSP.
pub const BLACKBOX_DEVICE_SDCARD: u8 = 2;

fn require(what: &'static str, payload: &[u8], expected: usize) -> Result<()> {
    if payload.len() < expected {
        return Err(ProtocolError::ReplyTruncated { what, expected, actual: payload.len() });
    }
    Ok(())
}

fn u16_at(payload: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([payload[offset], payload[offset + 1]])
}

fn u32_at(payload: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        payload[offset],
        payload[offset + 1],
        payload[offset + 2],
        payload[offset + 3],
    ])
}

/// Reply to `ApiVersion`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApiVersionReply {
    /// MSP protocol version.
    pub protocol: u8,
    /// API major version.
    pub major: u8,
    /// API minor version.
    pub minor: u8,
}

impl ApiVersionReply {
    /// Parse from reply payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        require("API_VERSION", payload, 3)?;
        Ok(Self { protocol: payload[0], major: payload[1], minor: payload[2] })
    }
}

/// Reply to `FcVariant`: a four-character firmware identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FcVariantReply {
    /// Raw identifier bytes, e.g. `b"BTFL"`.
    pub variant: [u8; 4],
}

impl FcVariantReply {
    /// Parse from reply payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        require("FC_VARIANT", payload, 4)?;
        let mut variant = [0u8; 4];
        variant.copy_from_slice(&payload[..4]);
        Ok(Self { variant })
    }

    /// The identifier as a string, with non-ASCII bytes replaced.
    #[must_use]
    pub fn as_str(&self) -> String {
        String::from_utf8_lossy(&self.variant).into_owned()
    }
}

/// Reply to `Uid`: the MCU's 96-bit unique identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UidReply {
    /// Raw identifier bytes.
    pub uid: [u8; 12],
}

impl UidReply {
    /// Parse from reply payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        require("UID", payload, 12)?;
        let mut uid = [0u8; 12];
        uid.copy_from_slice(&payload[..12]);
        Ok(Self { uid })
    }
}

/// Reply to `DataflashSummary`.
///
/// Wire layout: `flags:u8, sectors:u32, total_size:u32, used_size:u32`.
/// The sector count is reported by the firmware but nothing here needs it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataflashSummaryReply {
    /// Readiness and capability bits (`DATAFLASH_FLAG_*`).
    pub flags: u8,
    /// Erase-sector count.
    pub sectors: u32,
    /// Total flash capacity in bytes.
    pub total_size: u32,
    /// Bytes currently holding log data.
    pub used_size: u32,
}

impl DataflashSummaryReply {
    /// Parse from reply payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        require("DATAFLASH_SUMMARY", payload, 13)?;
        Ok(Self {
            flags: payload[0],
            sectors: u32_at(payload, 1),
            total_size: u32_at(payload, 5),
            used_size: u32_at(payload, 9),
        })
    }

    /// Build the wire payload, as the firmware would.
    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = Vec::with_capacity(13);
        buf.put_u8(self.flags);
        buf.put_u32_le(self.sectors);
        buf.put_u32_le(self.total_size);
        buf.put_u32_le(self.used_size);
        buf.into()
    }
}

/// Request payload for `DataflashRead`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataflashReadRequest {
    /// First flash byte to read.
    pub offset: u32,
    /// Requested byte count; the firmware may return fewer.
    pub length: u16,
    /// Ask for a Huffman-compressed reply.
    pub allow_compression: bool,
}

impl DataflashReadRequest {
    /// Build the wire payload: `offset:u32, length:u16, allow_compression:u8`.
    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = Vec::with_capacity(7);
        buf.put_u32_le(self.offset);
        buf.put_u16_le(self.length);
        buf.put_u8(u8::from(self.allow_compression));
        buf.into()
    }

    /// Parse from request payload bytes (used by the simulated FC).
    pub fn parse(payload: &[u8]) -> Result<Self> {
        require("DATAFLASH_READ request", payload, 7)?;
        Ok(Self {
            offset: u32_at(payload, 0),
            length: u16_at(payload, 4),
            allow_compression: payload[6] != 0,
        })
    }
}

/// Reply to `DataflashRead`.
///
/// The reply leads with the offset actually read. When compression was
/// requested *and* the firmware compressed this chunk, a `u16` decompressed
/// byte count follows; the rest of the payload is the Huffman stream, which
/// the frame length delimits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataflashReadReply {
    /// Plain chunk bytes.
    Raw {
        /// Flash offset of the first byte.
        offset: u32,
        /// Chunk contents.
        data: Bytes,
    },
    /// Huffman-compressed chunk.
    Compressed {
        /// Flash offset of the first byte.
        offset: u32,
        /// Byte count after decompression.
        decompressed_len: u16,
        /// The compressed stream.
        data: Bytes,
    },
}

impl DataflashReadReply {
    /// Parse a reply payload. `compressed` states whether the request asked
    /// for compression, which changes the layout.
    pub fn parse(payload: &Bytes, compressed: bool) -> Result<Self> {
        if compressed {
            require("DATAFLASH_READ reply", payload, 6)?;
            Ok(Self::Compressed {
                offset: u32_at(payload, 0),
                decompressed_len: u16_at(payload, 4),
                data: payload.slice(6..),
            })
        } else {
            require("DATAFLASH_READ reply", payload, 4)?;
            Ok(Self::Raw { offset: u32_at(payload, 0), data: payload.slice(4..) })
        }
    }

    /// Flash offset this reply covers.
    #[must_use]
    pub fn offset(&self) -> u32 {
        match self {
            Self::Raw { offset, .. } | Self::Compressed { offset, .. } => *offset,
        }
    }
}

/// Reply to `BlackboxConfig`.
///
/// Only the leading two bytes are interpreted; rate and ratio fields vary
/// with the API version and stay opaque here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlackboxConfigReply {
    /// Non-zero when blackbox logging is compiled in.
    pub supported: u8,
    /// Logging device kind (`BLACKBOX_DEVICE_*`).
    pub device: u8,
}

impl BlackboxConfigReply {
    /// Parse from reply payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        require("BLACKBOX_CONFIG", payload, 2)?;
        Ok(Self { supported: payload[0], device: payload[1] })
    }
}
