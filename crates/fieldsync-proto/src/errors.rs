//! Error types for wire-level encoding, decoding, and payload parsing.

use thiserror::Error;

/// Convenience alias for protocol-level results.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors produced while encoding frames or parsing payloads.
///
/// Checksum mismatches during streaming decode are deliberately *not* errors:
/// the decoder discards the in-progress frame and resynchronizes, because the
/// bus may carry noise or a late retransmission. The transport escalates only
/// when mismatches repeat (see `fieldsync-client`).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Payload does not fit the frame version's length field.
    #[error("payload of {size} bytes exceeds the {max}-byte limit of MSP {version}")]
    PayloadTooLarge {
        /// Attempted payload size.
        size: usize,
        /// Maximum the frame version can carry.
        max: usize,
        /// Frame version label ("v1" or "v2").
        version: &'static str,
    },

    /// A v1 frame was requested for a code above 8 bits.
    #[error("code {code:#06x} does not fit an MSP v1 frame")]
    CodeOutOfRange {
        /// The offending operation code.
        code: u16,
    },

    /// A reply payload was shorter than its fixed layout requires.
    #[error("{what} reply truncated: expected at least {expected} bytes, got {actual}")]
    ReplyTruncated {
        /// Human label of the reply being parsed.
        what: &'static str,
        /// Minimum byte count the layout requires.
        expected: usize,
        /// Bytes actually present.
        actual: usize,
    },

    /// Compressed stream contained a bit pattern outside the code table.
    #[error("no prefix code matches bit pattern {bits:#014b}")]
    UnknownHuffmanCode {
        /// The accumulated (right-aligned) bits that failed to match.
        bits: u16,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_names_the_reply() {
        let err = ProtocolError::ReplyTruncated { what: "UID", expected: 12, actual: 3 };
        assert!(err.to_string().contains("UID"));
        assert!(err.to_string().contains("12"));
    }
}
