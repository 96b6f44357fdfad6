//! Flight controller identity and flash state.

use fieldsync_proto::payloads::{
    DATAFLASH_FLAG_READ_COMPRESSED_SUPPORT, DATAFLASH_FLAG_READY, DataflashSummaryReply,
};

/// Identity of the attached flight controller.
///
/// Built once by the handshake and immutable for the rest of the session;
/// the UID keys the per-FC directory under the storage root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FcIdentity {
    /// Firmware variant, four ASCII bytes (`b"BTFL"` for supported boards).
    pub variant: [u8; 4],
    /// 96-bit MCU unique identifier.
    pub uid: [u8; 12],
    /// API version as (major, minor).
    pub api_version: (u8, u8),
}

impl FcIdentity {
    /// Variant as a printable string.
    #[must_use]
    pub fn variant_str(&self) -> String {
        String::from_utf8_lossy(&self.variant).into_owned()
    }

    /// Full UID rendered as lowercase hex.
    #[must_use]
    pub fn uid_hex(&self) -> String {
        hex::encode(self.uid)
    }

    /// Hex of the first eight UID bytes, used in directory names.
    #[must_use]
    pub fn uid_prefix_hex(&self) -> String {
        hex::encode(&self.uid[..8])
    }

    /// API version as `"major.minor"`.
    #[must_use]
    pub fn api_version_str(&self) -> String {
        format!("{}.{}", self.api_version.0, self.api_version.1)
    }
}

/// Snapshot of the dataflash state.
///
/// Refreshed by the handshake and again on every cycle of the erase poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashSummary {
    /// Readiness and capability bits.
    pub flags: u8,
    /// Total flash capacity in bytes.
    pub total_size: u32,
    /// Bytes currently holding log data.
    pub used_size: u32,
}

impl FlashSummary {
    /// Flash is initialized and readable.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.flags & DATAFLASH_FLAG_READY != 0
    }

    /// Firmware can serve Huffman-compressed reads.
    #[must_use]
    pub fn supports_compression(&self) -> bool {
        self.flags & DATAFLASH_FLAG_READ_COMPRESSED_SUPPORT != 0
    }

    /// No log data on the flash.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.used_size == 0
    }
}

impl From<DataflashSummaryReply> for FlashSummary {
    fn from(reply: DataflashSummaryReply) -> Self {
        Self { flags: reply.flags, total_size: reply.total_size, used_size: reply.used_size }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> FcIdentity {
        FcIdentity {
            variant: *b"BTFL",
            uid: [0x01, 0x23, 0x45, 0x67, 0x89, 0xAB, 0xCD, 0xEF, 0x00, 0x11, 0x22, 0x33],
            api_version: (1, 45),
        }
    }

    #[test]
    fn uid_prefix_is_first_eight_bytes() {
        assert_eq!(identity().uid_prefix_hex(), "0123456789abcdef");
        assert_eq!(identity().uid_hex(), "0123456789abcdef00112233");
    }

    #[test]
    fn api_version_renders() {
        assert_eq!(identity().api_version_str(), "1.45");
    }

    #[test]
    fn summary_flags() {
        let summary = FlashSummary { flags: 0b11, total_size: 1024, used_size: 0 };
        assert!(summary.is_ready());
        assert!(summary.supports_compression());
        assert!(summary.is_empty());

        let busy = FlashSummary { flags: 0b01, total_size: 1024, used_size: 512 };
        assert!(!busy.supports_compression());
        assert!(!busy.is_empty());
    }
}
