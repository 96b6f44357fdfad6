//! Frame model shared by the encoder and the streaming decoder.

use bytes::Bytes;

/// Which MSP framing carried (or should carry) a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameVersion {
    /// `$M` framing: 8-bit code and length, XOR checksum.
    V1,
    /// `$X` framing: 16-bit code and length, DVB-S2 checksum.
    V2,
}

impl FrameVersion {
    /// Maximum payload the version's length field can express.
    #[must_use]
    pub fn max_payload(self) -> usize {
        match self {
            Self::V1 => u8::MAX as usize,
            Self::V2 => u16::MAX as usize,
        }
    }
}

/// Direction marker carried in the third header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameDirection {
    /// Request travelling to the flight controller (`'<'`).
    ToFc,
    /// Reply travelling from the flight controller (`'>'`).
    FromFc,
    /// Error reply from the flight controller (`'!'`).
    ErrorFromFc,
}

impl FrameDirection {
    /// Parse the wire byte. `None` resets the decoder.
    #[must_use]
    pub fn from_wire(byte: u8) -> Option<Self> {
        match byte {
            b'<' => Some(Self::ToFc),
            b'>' => Some(Self::FromFc),
            b'!' => Some(Self::ErrorFromFc),
            _ => None,
        }
    }

    /// Wire byte for this direction.
    #[must_use]
    pub fn to_wire(self) -> u8 {
        match self {
            Self::ToFc => b'<',
            Self::FromFc => b'>',
            Self::ErrorFromFc => b'!',
        }
    }
}

/// One validated MSP frame.
///
/// # Invariants
///
/// A `Frame` is only ever emitted by [`crate::FrameDecoder`] after its
/// checksum validated, and [`crate::encode_frame`] always writes a correct
/// checksum. Code fits in 8 bits when `version` is [`FrameVersion::V1`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Framing that carried the message.
    pub version: FrameVersion,
    /// Direction marker.
    pub direction: FrameDirection,
    /// Operation code (8-bit range for v1).
    pub code: u16,
    /// Raw payload bytes.
    pub payload: Bytes,
}

impl Frame {
    /// Build a v2 request frame addressed to the flight controller.
    #[must_use]
    pub fn request(code: u16, payload: impl Into<Bytes>) -> Self {
        Self {
            version: FrameVersion::V2,
            direction: FrameDirection::ToFc,
            code,
            payload: payload.into(),
        }
    }

    /// Build a v2 reply frame, as a flight controller would.
    #[must_use]
    pub fn response(code: u16, payload: impl Into<Bytes>) -> Self {
        Self {
            version: FrameVersion::V2,
            direction: FrameDirection::FromFc,
            code,
            payload: payload.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_wire_round_trip() {
        for dir in [FrameDirection::ToFc, FrameDirection::FromFc, FrameDirection::ErrorFromFc] {
            assert_eq!(FrameDirection::from_wire(dir.to_wire()), Some(dir));
        }
        assert_eq!(FrameDirection::from_wire(b'?'), None);
    }

    #[test]
    fn version_payload_limits() {
        assert_eq!(FrameVersion::V1.max_payload(), 255);
        assert_eq!(FrameVersion::V2.max_payload(), 65_535);
    }
}
