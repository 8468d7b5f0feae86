//! # Frame Codec
//!
//! Tokio codec that finds frames in an arbitrarily chunked byte stream.
//!
//! The decoder scans for the start sentinel, discards anything in front of it,
//! waits until the header and the declared payload have arrived, and checks the
//! trailing sentinel. The read buffer is bounded: a declared payload larger than
//! the configured limit fails immediately with `FrameTooLarge` instead of
//! growing the buffer.

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, trace};

use crate::config::{DEFAULT_MAX_FRAME_PAYLOAD, FRAME_TAG};
use crate::core::frame::{Frame, HEADER_SIZE, TRAILER_SIZE};
use crate::error::{ProtocolError, Result};

#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_payload: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_PAYLOAD)
    }
}

impl FrameCodec {
    pub fn new(max_payload: usize) -> Self {
        Self { max_payload }
    }

    pub fn max_payload(&self) -> usize {
        self.max_payload
    }
}

fn find_tag(buf: &[u8]) -> Option<usize> {
    buf.windows(FRAME_TAG.len()).position(|w| w == FRAME_TAG)
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        match find_tag(src) {
            Some(0) => {}
            Some(offset) => {
                debug!(skipped = offset, "Discarding bytes before start sentinel");
                src.advance(offset);
            }
            None => {
                // A sentinel may be split across reads; keep its possible prefix.
                let keep = FRAME_TAG.len() - 1;
                if src.len() > keep {
                    let drop = src.len() - keep;
                    trace!(dropped = drop, "No start sentinel in buffer");
                    src.advance(drop);
                }
                return Ok(None);
            }
        }

        if src.len() < HEADER_SIZE {
            src.reserve(HEADER_SIZE - src.len());
            return Ok(None);
        }

        let declared = u32::from_le_bytes([src[14], src[15], src[16], src[17]]) as usize;
        if declared > self.max_payload {
            return Err(ProtocolError::FrameTooLarge {
                declared,
                limit: self.max_payload,
            });
        }

        let total = HEADER_SIZE + declared + TRAILER_SIZE;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        let raw = src.split_to(total);
        let (frame, _) = Frame::parse(&raw, self.max_payload)?;
        trace!(
            call_type = frame.call_type,
            rr_id = frame.rr_id,
            size = declared,
            "Frame decoded"
        );
        Ok(Some(frame))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<()> {
        if item.payload.len() > self.max_payload {
            return Err(ProtocolError::FrameTooLarge {
                declared: item.payload.len(),
                limit: self.max_payload,
            });
        }
        item.write_to(dst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PROTO_VERSION;

    fn frame(call_type: u32, payload: Vec<u8>) -> Frame {
        Frame::new(PROTO_VERSION, 1, call_type, payload)
    }

    #[test]
    fn byte_at_a_time_delivery() {
        let mut codec = FrameCodec::default();
        let bytes = frame(40, vec![9; 16]).to_bytes();
        let mut buf = BytesMut::new();
        let mut out = None;
        for b in bytes {
            buf.extend_from_slice(&[b]);
            if let Some(f) = codec.decode(&mut buf).unwrap() {
                out = Some(f);
            }
        }
        assert_eq!(out.unwrap().payload, vec![9; 16]);
        assert!(buf.is_empty());
    }

    #[test]
    fn leading_garbage_is_skipped() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::from(&b"\x00\x01SUP"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.clear();
        buf.extend_from_slice(b"junk");
        buf.extend_from_slice(&frame(10, vec![]).to_bytes());
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.call_type, 10);
    }

    #[test]
    fn declared_size_over_limit_fails_fast() {
        let mut codec = FrameCodec::new(1024);
        let mut header = Vec::new();
        header.extend_from_slice(&FRAME_TAG);
        header.push(PROTO_VERSION);
        header.extend_from_slice(&1u32.to_le_bytes());
        header.extend_from_slice(&40u32.to_le_bytes());
        header.extend_from_slice(&4096u32.to_le_bytes());
        let mut buf = BytesMut::from(&header[..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::FrameTooLarge {
                declared: 4096,
                limit: 1024
            })
        ));
    }

    #[test]
    fn encode_rejects_oversized_payload() {
        let mut codec = FrameCodec::new(8);
        let mut buf = BytesMut::new();
        assert!(codec.encode(frame(40, vec![0; 9]), &mut buf).is_err());
        assert!(buf.is_empty());
    }
}
