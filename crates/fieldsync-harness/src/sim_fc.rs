//! Scripted flight controller.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use bytes::{BufMut, Bytes};
use fieldsync_client::{Transport, TransportError};
use fieldsync_proto::{
    Frame, Opcode, huffman,
    payloads::{
        DATAFLASH_FLAG_READ_COMPRESSED_SUPPORT, DATAFLASH_FLAG_READY, DataflashReadRequest,
        DataflashSummaryReply,
    },
};

/// Shared record of every request opcode the agent put on the wire.
///
/// Clone it out of the [`SimFc`] before handing the transport to the
/// orchestrator; assertions like "no erase was ever transmitted" read it
/// afterwards.
#[derive(Debug, Clone, Default)]
pub struct WireLog(Arc<Mutex<Vec<u16>>>);

impl WireLog {
    fn record(&self, code: u16) {
        if let Ok(mut log) = self.0.lock() {
            log.push(code);
        }
    }

    /// All request opcodes, in send order.
    #[must_use]
    pub fn sent(&self) -> Vec<u16> {
        self.0.lock().map(|log| log.clone()).unwrap_or_default()
    }

    /// Whether `opcode` was ever sent.
    #[must_use]
    pub fn contains(&self, opcode: Opcode) -> bool {
        self.sent().contains(&opcode.to_u16())
    }
}

/// A scripted FC behind the `Transport` seam.
///
/// Replies are queued synchronously as requests arrive; `recv` never yields
/// spontaneously, so a dropped reply parks the client until its timeout
/// fires (instantly, under tokio's paused clock).
pub struct SimFc {
    variant: [u8; 4],
    api_version: (u8, u8),
    uid: [u8; 12],
    blackbox_device: u8,
    flash: Vec<u8>,
    total_size: u32,
    compression: bool,

    /// Scripted `(used, ready)` summary replies after the erase ack.
    erase_sequence: VecDeque<(u32, bool)>,
    /// Keep reporting a non-empty flash after the sequence runs dry.
    erase_stalls: bool,
    erase_received: bool,

    /// Drop the read reply for this offset entirely.
    drop_read_at: Option<u32>,
    /// Serve at most this many bytes for the read at this offset.
    short_read_at: Option<(u32, u16)>,
    /// Buffer this many read replies and release them reversed.
    permute_depth: usize,

    outbox: VecDeque<Frame>,
    reorder: Vec<Frame>,
    log: WireLog,
}

impl SimFc {
    /// A healthy BTFL board holding `flash` in its dataflash.
    #[must_use]
    pub fn new(flash: Vec<u8>) -> Self {
        Self {
            variant: *b"BTFL",
            api_version: (1, 45),
            uid: [0xA0, 0xA1, 0xA2, 0xA3, 0xA4, 0xA5, 0xA6, 0xA7, 0xA8, 0xA9, 0xAA, 0xAB],
            blackbox_device: 1,
            total_size: 8 * 1024 * 1024,
            compression: false,
            erase_sequence: VecDeque::from([(524_288, false), (0, true)]),
            erase_stalls: false,
            erase_received: false,
            drop_read_at: None,
            short_read_at: None,
            permute_depth: 0,
            outbox: VecDeque::new(),
            reorder: Vec::new(),
            log: WireLog::default(),
            flash,
        }
    }

    /// Report a different firmware variant.
    #[must_use]
    pub fn with_variant(mut self, variant: &[u8; 4]) -> Self {
        self.variant = *variant;
        self
    }

    /// Report a different API version.
    #[must_use]
    pub fn with_api_version(mut self, major: u8, minor: u8) -> Self {
        self.api_version = (major, minor);
        self
    }

    /// Report a different blackbox device byte.
    #[must_use]
    pub fn with_blackbox_device(mut self, device: u8) -> Self {
        self.blackbox_device = device;
        self
    }

    /// Advertise and serve Huffman-compressed reads.
    #[must_use]
    pub fn with_compression(mut self) -> Self {
        self.compression = true;
        self
    }

    /// Script the `(used, ready)` summaries reported while erasing.
    #[must_use]
    pub fn with_erase_sequence(mut self, sequence: Vec<(u32, bool)>) -> Self {
        self.erase_sequence = sequence.into();
        self
    }

    /// Never finish the erase: keep reporting a busy, non-empty flash.
    #[must_use]
    pub fn with_stalled_erase(mut self) -> Self {
        self.erase_stalls = true;
        self
    }

    /// Drop the read reply covering `offset`.
    #[must_use]
    pub fn with_dropped_read_at(mut self, offset: u32) -> Self {
        self.drop_read_at = Some(offset);
        self
    }

    /// Truncate the read reply at `offset` to `length` bytes.
    #[must_use]
    pub fn with_short_read_at(mut self, offset: u32, length: u16) -> Self {
        self.short_read_at = Some((offset, length));
        self
    }

    /// Hold `depth` read replies back and release them in reverse order.
    #[must_use]
    pub fn with_permuted_window(mut self, depth: usize) -> Self {
        self.permute_depth = depth;
        self
    }

    /// Probe handle onto the request log.
    #[must_use]
    pub fn wire_log(&self) -> WireLog {
        self.log.clone()
    }

    fn used_size(&self) -> u32 {
        self.flash.len() as u32
    }

    fn summary_reply(&mut self) -> DataflashSummaryReply {
        let (used, ready) = if self.erase_received {
            match self.erase_sequence.pop_front() {
                Some(step) => step,
                None if self.erase_stalls => (self.used_size(), false),
                None => (0, true),
            }
        } else {
            (self.used_size(), true)
        };

        let mut flags = 0;
        if ready {
            flags |= DATAFLASH_FLAG_READY;
        }
        if self.compression {
            flags |= DATAFLASH_FLAG_READ_COMPRESSED_SUPPORT;
        }
        DataflashSummaryReply {
            flags,
            sectors: self.total_size / (64 * 1024),
            total_size: self.total_size,
            used_size: used,
        }
    }

    fn handle_read(&mut self, payload: &Bytes) {
        let Ok(request) = DataflashReadRequest::parse(payload) else {
            tracing::warn!("simulated FC got a malformed read request");
            return;
        };

        if self.drop_read_at == Some(request.offset) {
            tracing::debug!(offset = request.offset, "simulated FC dropping read reply");
            return;
        }

        let start = (request.offset as usize).min(self.flash.len());
        let mut end = start.saturating_add(usize::from(request.length)).min(self.flash.len());
        if let Some((short_offset, short_len)) = self.short_read_at
            && short_offset == request.offset
        {
            end = end.min(start + usize::from(short_len));
        }
        let chunk = &self.flash[start..end];

        let mut reply = Vec::with_capacity(chunk.len() + 6);
        reply.put_u32_le(request.offset);
        if request.allow_compression {
            reply.put_u16_le(chunk.len() as u16);
            reply.extend_from_slice(&huffman::encode(chunk));
        } else {
            reply.extend_from_slice(chunk);
        }
        let frame = Frame::response(Opcode::DataflashRead.to_u16(), reply);

        let last_chunk = end >= self.flash.len();
        if self.permute_depth > 1 {
            self.reorder.push(frame);
            if self.reorder.len() == self.permute_depth || last_chunk {
                // Worst-case arrival order for an in-order consumer.
                while let Some(held) = self.reorder.pop() {
                    self.outbox.push_back(held);
                }
            }
        } else {
            self.outbox.push_back(frame);
        }
    }

    fn handle_request(&mut self, frame: &Frame) {
        let reply = |payload: Bytes| Frame::response(frame.code, payload);
        match Opcode::from_u16(frame.code) {
            Some(Opcode::ApiVersion) => {
                let (major, minor) = self.api_version;
                self.outbox.push_back(reply(Bytes::from(vec![0, major, minor])));
            },
            Some(Opcode::FcVariant) => {
                self.outbox.push_back(reply(Bytes::copy_from_slice(&self.variant)));
            },
            Some(Opcode::Uid) => {
                self.outbox.push_back(reply(Bytes::copy_from_slice(&self.uid)));
            },
            Some(Opcode::BlackboxConfig) => {
                self.outbox
                    .push_back(reply(Bytes::from(vec![1, self.blackbox_device, 1, 1, 0, 16])));
            },
            Some(Opcode::DataflashSummary) => {
                let summary = self.summary_reply();
                self.outbox.push_back(reply(summary.to_bytes()));
            },
            Some(Opcode::DataflashRead) => {
                let payload = frame.payload.clone();
                self.handle_read(&payload);
            },
            Some(Opcode::DataflashErase) => {
                self.erase_received = true;
                self.outbox.push_back(reply(Bytes::new()));
            },
            None => {
                tracing::warn!(code = frame.code, "simulated FC ignoring unknown opcode");
            },
        }
    }
}

impl Transport for SimFc {
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        self.log.record(frame.code);
        self.handle_request(&frame);
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<Frame>, TransportError> {
        match self.outbox.pop_front() {
            Some(frame) => Ok(Some(frame)),
            None => std::future::pending().await,
        }
    }
}
