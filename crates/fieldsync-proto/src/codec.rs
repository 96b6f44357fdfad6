//! Streaming frame decoder and request encoder.
//!
//! The decoder is byte-driven on purpose: v1 and v2 frames interleave freely
//! on the wire, the version is only known after the second header byte, and
//! line noise must never desynchronize subsequent valid frames. Feeding one
//! byte at a time lets the machine resynchronize on the next `'$'` after any
//! violation.
//!
//! ```text
//! Idle -> VersionSelect -> Direction ->
//!   V1Len -> V1Code -> V1Payload -> V1Checksum -> Idle
//!   V2Header(flag, code, len) -> V2Payload -> V2Checksum -> Idle
//! ```
//!
//! Checksum mismatches discard the frame silently and bump a consecutive
//! counter the transport inspects; a valid frame resets it.

use bytes::Bytes;

use crate::{
    Frame, FrameDirection, FrameVersion,
    crc::{crc8_dvb_s2, crc8_dvb_s2_update, crc8_xor},
    errors::{ProtocolError, Result},
};

/// v2 header bytes covered by the checksum: flag, code, length.
const V2_HEADER_LEN: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Hunting for `'$'`.
    Idle,
    /// Got `'$'`; expecting `'M'` or `'X'`.
    VersionSelect,
    /// Expecting a direction byte.
    Direction,
    /// v1: expecting the length byte.
    V1Len,
    /// v1: expecting the code byte.
    V1Code,
    /// v1: filling the payload buffer.
    V1Payload,
    /// v1: expecting the XOR checksum.
    V1Checksum,
    /// v2: accumulating flag, code, and length.
    V2Header,
    /// v2: filling the payload buffer.
    V2Payload,
    /// v2: expecting the DVB-S2 checksum.
    V2Checksum,
}

/// Byte-driven MSP frame decoder.
///
/// One instance per transport. The payload buffer is reused across frames;
/// the machine resets itself after every completed frame and after every
/// protocol violation.
#[derive(Debug)]
pub struct FrameDecoder {
    state: State,
    version: FrameVersion,
    direction: FrameDirection,
    code: u16,
    len: usize,
    checksum: u8,
    payload: Vec<u8>,
    header: [u8; V2_HEADER_LEN],
    header_fill: usize,
    consecutive_crc_mismatches: u32,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    /// Create a decoder in the idle state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: State::Idle,
            version: FrameVersion::V1,
            direction: FrameDirection::ToFc,
            code: 0,
            len: 0,
            checksum: 0,
            payload: Vec::new(),
            header: [0; V2_HEADER_LEN],
            header_fill: 0,
            consecutive_crc_mismatches: 0,
        }
    }

    /// Checksum mismatches since the last validated frame.
    ///
    /// The transport escalates to a protocol error once this crosses its
    /// quota; a single mismatch is expected noise.
    #[must_use]
    pub fn consecutive_crc_mismatches(&self) -> u32 {
        self.consecutive_crc_mismatches
    }

    /// Feed one byte; returns a frame when this byte completes one.
    pub fn push(&mut self, byte: u8) -> Option<Frame> {
        match self.state {
            State::Idle => {
                if byte == b'$' {
                    self.state = State::VersionSelect;
                }
                None
            },
            State::VersionSelect => {
                match byte {
                    b'M' => {
                        self.version = FrameVersion::V1;
                        self.state = State::Direction;
                    },
                    b'X' => {
                        self.version = FrameVersion::V2;
                        self.state = State::Direction;
                    },
                    other => self.reset_reexamining(other),
                }
                None
            },
            State::Direction => {
                match FrameDirection::from_wire(byte) {
                    Some(direction) => {
                        self.direction = direction;
                        self.state = match self.version {
                            FrameVersion::V1 => State::V1Len,
                            FrameVersion::V2 => {
                                self.header_fill = 0;
                                State::V2Header
                            },
                        };
                    },
                    None => self.reset_reexamining(byte),
                }
                None
            },
            State::V1Len => {
                self.len = byte as usize;
                self.checksum = byte;
                self.state = State::V1Code;
                None
            },
            State::V1Code => {
                self.code = u16::from(byte);
                self.checksum ^= byte;
                self.payload.clear();
                self.state =
                    if self.len == 0 { State::V1Checksum } else { State::V1Payload };
                None
            },
            State::V1Payload => {
                self.payload.push(byte);
                self.checksum ^= byte;
                if self.payload.len() == self.len {
                    self.state = State::V1Checksum;
                }
                None
            },
            State::V1Checksum => self.finish(byte),
            State::V2Header => {
                self.header[self.header_fill] = byte;
                self.header_fill += 1;
                if self.header_fill == V2_HEADER_LEN {
                    self.code = u16::from_le_bytes([self.header[1], self.header[2]]);
                    self.len = u16::from_le_bytes([self.header[3], self.header[4]]) as usize;
                    self.checksum = crc8_dvb_s2(&self.header, 0);
                    self.payload.clear();
                    self.state =
                        if self.len == 0 { State::V2Checksum } else { State::V2Payload };
                }
                None
            },
            State::V2Payload => {
                self.payload.push(byte);
                self.checksum = crc8_dvb_s2_update(self.checksum, byte);
                if self.payload.len() == self.len {
                    self.state = State::V2Checksum;
                }
                None
            },
            State::V2Checksum => self.finish(byte),
        }
    }

    /// Feed a buffer, appending completed frames to `out`.
    pub fn push_all(&mut self, bytes: &[u8], out: &mut Vec<Frame>) {
        for &byte in bytes {
            if let Some(frame) = self.push(byte) {
                out.push(frame);
            }
        }
    }

    /// Validate the trailing checksum byte and emit or discard the frame.
    fn finish(&mut self, received: u8) -> Option<Frame> {
        let frame = if self.checksum == received {
            self.consecutive_crc_mismatches = 0;
            Some(Frame {
                version: self.version,
                direction: self.direction,
                code: self.code,
                payload: Bytes::copy_from_slice(&self.payload),
            })
        } else {
            self.consecutive_crc_mismatches += 1;
            None
        };
        self.state = State::Idle;
        frame
    }

    /// Reset after a violation, re-examining the offending byte so a `'$'`
    /// that interrupted a frame still starts the next one.
    fn reset_reexamining(&mut self, byte: u8) {
        self.state = if byte == b'$' { State::VersionSelect } else { State::Idle };
    }
}

/// Encode a frame into its wire bytes, checksum included.
///
/// # Errors
///
/// - [`ProtocolError::CodeOutOfRange`] for a v1 frame with a 16-bit code
/// - [`ProtocolError::PayloadTooLarge`] when the payload exceeds the
///   version's length field
pub fn encode_frame(frame: &Frame) -> Result<Vec<u8>> {
    let max = frame.version.max_payload();
    if frame.payload.len() > max {
        return Err(ProtocolError::PayloadTooLarge {
            size: frame.payload.len(),
            max,
            version: match frame.version {
                FrameVersion::V1 => "v1",
                FrameVersion::V2 => "v2",
            },
        });
    }

    let mut wire = Vec::with_capacity(frame.payload.len() + 9);
    match frame.version {
        FrameVersion::V1 => {
            let code =
                u8::try_from(frame.code).map_err(|_| ProtocolError::CodeOutOfRange {
                    code: frame.code,
                })?;
            wire.extend_from_slice(&[b'$', b'M', frame.direction.to_wire()]);
            wire.push(frame.payload.len() as u8);
            wire.push(code);
            wire.extend_from_slice(&frame.payload);
            wire.push(crc8_xor(&wire[3..]));
        },
        FrameVersion::V2 => {
            wire.extend_from_slice(&[b'$', b'X', frame.direction.to_wire(), 0]);
            wire.extend_from_slice(&frame.code.to_le_bytes());
            wire.extend_from_slice(&(frame.payload.len() as u16).to_le_bytes());
            wire.extend_from_slice(&frame.payload);
            wire.push(crc8_dvb_s2(&wire[3..], 0));
        },
    }
    Ok(wire)
}
