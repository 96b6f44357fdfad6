//! Request/response client and the pipelined dataflash read.
//!
//! MSP carries no sequence numbers, so responses are matched to requests by
//! opcode alone and only one request per opcode may be outstanding. The one
//! exception is `DataflashRead`, where the reply itself carries the offset it
//! covers: that lets [`MspClient::read_flash`] keep a window of requests in
//! flight and match replies by offset, hiding the FC's flash read latency
//! behind the wire time of the next chunk.

use std::{
    collections::{BTreeMap, VecDeque},
    io,
    time::Duration,
};

use bytes::Bytes;
use fieldsync_proto::{
    Frame, FrameDirection, Opcode, ProtocolError, huffman,
    payloads::{DataflashReadReply, DataflashReadRequest},
};
use thiserror::Error;
use tokio::time::timeout;

use crate::transport::{Transport, TransportError};

/// How long to wait for each straggler while abandoning a read window.
const DRAIN_TIMEOUT: Duration = Duration::from_millis(250);

/// Client-level errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport failed underneath the request.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A reply arrived but could not be parsed.
    #[error("protocol: {0}")]
    Protocol(#[from] ProtocolError),

    /// No reply within the request timeout.
    #[error("request {opcode:?} timed out")]
    RequestTimeout {
        /// The opcode that went unanswered.
        opcode: Opcode,
    },

    /// No usable chunk within the chunk timeout.
    #[error("flash read stalled at offset {offset}")]
    ChunkTimeout {
        /// Next offset the stream was waiting for.
        offset: u32,
    },

    /// The FC answered with an error frame.
    #[error("FC rejected {opcode:?}")]
    Rejected {
        /// The rejected opcode.
        opcode: Opcode,
    },

    /// A read reply carried no bytes while the stream still had ground to
    /// cover.
    #[error("empty flash read reply at offset {offset}")]
    EmptyChunk {
        /// Offset of the empty reply.
        offset: u32,
    },

    /// The serial link closed mid-conversation.
    #[error("serial link closed")]
    LinkClosed,

    /// The chunk consumer failed (session write).
    #[error("writing chunk: {0}")]
    Sink(#[source] io::Error),
}

/// Parameters of one pipelined flash read.
#[derive(Debug, Clone, Copy)]
pub struct FlashReadPlan {
    /// Bytes to read, `[0, used_size)`.
    pub used_size: u32,
    /// Bytes requested per read; the FC may return fewer.
    pub chunk_size: u16,
    /// In-flight request window, `1..=8`.
    pub depth: usize,
    /// Request Huffman-compressed replies.
    pub compression: bool,
    /// Timeout waiting for any usable chunk.
    pub chunk_timeout: Duration,
}

/// MSP request/response client over a [`Transport`].
pub struct MspClient<T: Transport> {
    transport: T,
    request_timeout: Duration,
}

impl<T: Transport> MspClient<T> {
    /// Wrap a transport with the given per-request timeout.
    pub fn new(transport: T, request_timeout: Duration) -> Self {
        Self { transport, request_timeout }
    }

    /// Issue one request and wait for its reply payload.
    ///
    /// Frames for other opcodes arriving in between (late stragglers from an
    /// abandoned window, unsolicited telemetry) are logged and dropped.
    pub async fn request(
        &mut self,
        opcode: Opcode,
        payload: Bytes,
    ) -> Result<Bytes, ClientError> {
        self.transport.send(Frame::request(opcode.to_u16(), payload)).await?;

        match timeout(self.request_timeout, await_reply(&mut self.transport, opcode)).await {
            Ok(result) => result,
            Err(_elapsed) => {
                tracing::warn!(?opcode, "request timed out");
                Err(ClientError::RequestTimeout { opcode })
            },
        }
    }

    /// Stream `[0, used_size)` of the dataflash through `sink`, in order.
    ///
    /// Up to `depth` read requests ride the wire at once; replies are matched
    /// by the offset they carry and consumed strictly in offset order, so the
    /// sink sees the flash exactly as laid out regardless of arrival order.
    /// A reply shorter than requested re-bases the window: outstanding
    /// requests no longer line up with the file position, so they are drained
    /// and reissued from the new offset.
    ///
    /// On failure the window is drained (or the port read until idle) before
    /// the error is returned, so a later request does not collide with
    /// stragglers.
    pub async fn read_flash(
        &mut self,
        plan: &FlashReadPlan,
        mut sink: impl FnMut(&[u8]) -> io::Result<()> + Send,
    ) -> Result<(), ClientError> {
        let mut next_write: u32 = 0;
        let mut next_request: u32 = 0;
        // Requested (offset, length) pairs currently on the wire.
        let mut inflight: VecDeque<(u32, u16)> = VecDeque::new();
        // Replies waiting for their turn, keyed by offset.
        let mut pending: BTreeMap<u32, (Bytes, u16)> = BTreeMap::new();

        'stream: while next_write < plan.used_size {
            while inflight.len() < plan.depth.max(1) && next_request < plan.used_size {
                let remaining = plan.used_size - next_request;
                let length = u32::from(plan.chunk_size).min(remaining) as u16;
                let request = DataflashReadRequest {
                    offset: next_request,
                    length,
                    allow_compression: plan.compression,
                };
                self.transport
                    .send(Frame::request(Opcode::DataflashRead.to_u16(), request.to_bytes()))
                    .await?;
                inflight.push_back((next_request, length));
                next_request += u32::from(length);
            }

            let frame =
                match timeout(plan.chunk_timeout, await_read_reply(&mut self.transport)).await {
                    Ok(Ok(frame)) => frame,
                    Ok(Err(e)) => {
                        drain_window(&mut self.transport, inflight.len()).await;
                        return Err(e);
                    },
                    Err(_elapsed) => {
                        drain_window(&mut self.transport, inflight.len()).await;
                        return Err(ClientError::ChunkTimeout { offset: next_write });
                    },
                };

            let reply = DataflashReadReply::parse(&frame.payload, plan.compression)?;
            let offset = reply.offset();
            let Some(slot) = inflight.iter().position(|(o, _)| *o == offset) else {
                tracing::debug!(offset, "ignoring reply for an offset not in the window");
                continue;
            };
            let (_, requested) = inflight.remove(slot).unwrap_or((offset, 0));

            let data: Bytes = match reply {
                DataflashReadReply::Raw { data, .. } => data,
                DataflashReadReply::Compressed { decompressed_len, data, .. } => {
                    huffman::decode(&data, usize::from(decompressed_len))?.into()
                },
            };
            if data.is_empty() {
                drain_window(&mut self.transport, inflight.len()).await;
                return Err(ClientError::EmptyChunk { offset });
            }
            pending.insert(offset, (data, requested));

            while let Some((data, requested)) = pending.remove(&next_write) {
                let take = data.len().min(usize::from(requested));
                sink(&data[..take]).map_err(ClientError::Sink)?;
                next_write += take as u32;

                if take < usize::from(requested) && next_write < plan.used_size {
                    // Short reply: everything on the wire is misaligned now.
                    tracing::debug!(
                        offset = next_write,
                        "short flash read, re-basing the request window"
                    );
                    drain_window(&mut self.transport, inflight.len()).await;
                    inflight.clear();
                    pending.clear();
                    next_request = next_write;
                    continue 'stream;
                }
            }
        }
        Ok(())
    }
}

/// Wait for the reply to `opcode`, skipping unrelated traffic.
async fn await_reply<T: Transport>(
    transport: &mut T,
    opcode: Opcode,
) -> Result<Bytes, ClientError> {
    loop {
        match transport.recv().await? {
            None => return Err(ClientError::LinkClosed),
            Some(frame) if frame.code == opcode.to_u16() => match frame.direction {
                FrameDirection::FromFc => return Ok(frame.payload),
                FrameDirection::ErrorFromFc => return Err(ClientError::Rejected { opcode }),
                FrameDirection::ToFc => {
                    tracing::debug!(code = frame.code, "ignoring echoed request frame");
                },
            },
            Some(frame) => {
                tracing::debug!(code = frame.code, "ignoring unrelated frame");
            },
        }
    }
}

/// Wait for any `DataflashRead` reply frame.
async fn await_read_reply<T: Transport>(transport: &mut T) -> Result<Frame, ClientError> {
    let code = Opcode::DataflashRead.to_u16();
    loop {
        match transport.recv().await? {
            None => return Err(ClientError::LinkClosed),
            Some(frame) if frame.code == code => match frame.direction {
                FrameDirection::FromFc => return Ok(frame),
                FrameDirection::ErrorFromFc => {
                    return Err(ClientError::Rejected { opcode: Opcode::DataflashRead });
                },
                FrameDirection::ToFc => {},
            },
            Some(frame) => {
                tracing::debug!(code = frame.code, "ignoring unrelated frame");
            },
        }
    }
}

/// Best-effort read of stragglers from an abandoned window.
///
/// Reads until `outstanding` frames arrived or the port goes idle; errors are
/// ignored because the operation already failed.
async fn drain_window<T: Transport>(transport: &mut T, outstanding: usize) {
    for _ in 0..outstanding {
        match timeout(DRAIN_TIMEOUT, transport.recv()).await {
            Ok(Ok(Some(_))) => {},
            _ => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use fieldsync_proto::FrameVersion;

    use super::*;

    /// Scripted transport: pops pre-loaded results, records sent frames.
    struct Scripted {
        replies: VecDeque<Result<Option<Frame>, TransportError>>,
        sent: Vec<Frame>,
    }

    impl Scripted {
        fn new(replies: Vec<Result<Option<Frame>, TransportError>>) -> Self {
            Self { replies: replies.into(), sent: Vec::new() }
        }
    }

    impl Transport for Scripted {
        async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
            self.sent.push(frame);
            Ok(())
        }

        async fn recv(&mut self) -> Result<Option<Frame>, TransportError> {
            match self.replies.pop_front() {
                Some(result) => result,
                None => std::future::pending().await,
            }
        }
    }

    #[tokio::test]
    async fn request_returns_matching_reply() {
        let transport = Scripted::new(vec![
            Ok(Some(Frame::response(160, vec![7u8; 12]))),
        ]);
        let mut client = MspClient::new(transport, Duration::from_secs(1));
        let payload = client.request(Opcode::Uid, Bytes::new()).await.unwrap();
        assert_eq!(payload, Bytes::from(vec![7u8; 12]));
    }

    #[tokio::test]
    async fn request_skips_unrelated_frames() {
        let transport = Scripted::new(vec![
            Ok(Some(Frame::response(2, Bytes::from_static(b"BTFL")))),
            Ok(Some(Frame::response(1, vec![0, 1, 45]))),
        ]);
        let mut client = MspClient::new(transport, Duration::from_secs(1));
        let payload = client.request(Opcode::ApiVersion, Bytes::new()).await.unwrap();
        assert_eq!(payload, Bytes::from(vec![0, 1, 45]));
    }

    #[tokio::test]
    async fn error_direction_fails_the_request() {
        let error_frame = Frame {
            version: FrameVersion::V2,
            direction: FrameDirection::ErrorFromFc,
            code: 70,
            payload: Bytes::new(),
        };
        let transport = Scripted::new(vec![Ok(Some(error_frame))]);
        let mut client = MspClient::new(transport, Duration::from_secs(1));
        let err = client.request(Opcode::DataflashSummary, Bytes::new()).await.unwrap_err();
        assert!(matches!(err, ClientError::Rejected { opcode: Opcode::DataflashSummary }));
    }

    #[tokio::test(start_paused = true)]
    async fn silence_times_the_request_out() {
        let transport = Scripted::new(vec![]);
        let mut client = MspClient::new(transport, Duration::from_secs(2));
        let err = client.request(Opcode::ApiVersion, Bytes::new()).await.unwrap_err();
        assert!(matches!(err, ClientError::RequestTimeout { opcode: Opcode::ApiVersion }));
    }

    #[tokio::test]
    async fn closed_link_fails_the_request() {
        let transport = Scripted::new(vec![Ok(None)]);
        let mut client = MspClient::new(transport, Duration::from_secs(1));
        let err = client.request(Opcode::ApiVersion, Bytes::new()).await.unwrap_err();
        assert!(matches!(err, ClientError::LinkClosed));
    }
}
