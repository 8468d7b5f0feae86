//! # Frame
//!
//! One sentinel-delimited wire unit.
//!
//! ```text
//! [Tag(5)] [Version(1)] [RrId(4)] [CallType(4)] [DataSize(4)] [Data(N)] [Tag(5)]
//! ```
//!
//! All multi-byte integers are little-endian. The declared data size must match
//! the bytes found between the header and the trailing tag.

use bytes::{BufMut, BytesMut};

use crate::config::FRAME_TAG;
use crate::error::{constants, ProtocolError, Result};

/// Header length in bytes: tag + version + rr_id + call_type + data_size.
pub const HEADER_SIZE: usize = FRAME_TAG.len() + 1 + 4 + 4 + 4;
/// Trailer length in bytes.
pub const TRAILER_SIZE: usize = FRAME_TAG.len();

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub version: u8,
    /// Request/response correlation id.
    pub rr_id: u32,
    pub call_type: u32,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(version: u8, rr_id: u32, call_type: u32, payload: Vec<u8>) -> Self {
        Self {
            version,
            rr_id,
            call_type,
            payload,
        }
    }

    /// Total encoded size of this frame.
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.payload.len() + TRAILER_SIZE
    }

    /// Serialize to a standalone buffer.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.write_to(&mut buf);
        buf.to_vec()
    }

    pub(crate) fn write_to(&self, dst: &mut BytesMut) {
        dst.reserve(self.encoded_len());
        dst.put_slice(&FRAME_TAG);
        dst.put_u8(self.version);
        dst.put_u32_le(self.rr_id);
        dst.put_u32_le(self.call_type);
        dst.put_u32_le(self.payload.len() as u32);
        dst.put_slice(&self.payload);
        dst.put_slice(&FRAME_TAG);
    }

    /// Parse exactly one frame from the start of `buf`.
    ///
    /// Unlike the streaming codec this expects the frame to begin at offset 0
    /// and to be complete; trailing bytes after the frame are ignored.
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        Self::parse(buf, usize::MAX).map(|(frame, _)| frame)
    }

    /// Parse one frame, bounding the declared payload by `max_payload`.
    /// Returns the frame and the number of bytes it occupied.
    pub(crate) fn parse(buf: &[u8], max_payload: usize) -> Result<(Self, usize)> {
        if buf.len() < HEADER_SIZE {
            return Err(ProtocolError::MalformedFrame("truncated header"));
        }
        if buf[..FRAME_TAG.len()] != FRAME_TAG {
            return Err(ProtocolError::MalformedFrame("missing start sentinel"));
        }

        // Version policy belongs to the session, which answers with VersionError.
        let version = buf[5];
        let rr_id = read_u32(buf, 6);
        let call_type = read_u32(buf, 10);
        let declared = read_u32(buf, 14) as usize;

        if declared > max_payload {
            return Err(ProtocolError::FrameTooLarge {
                declared,
                limit: max_payload,
            });
        }

        let total = HEADER_SIZE + declared + TRAILER_SIZE;
        if buf.len() < total {
            return Err(ProtocolError::MalformedFrame(constants::ERR_LENGTH_MISMATCH));
        }
        if buf[HEADER_SIZE + declared..total] != FRAME_TAG {
            return Err(ProtocolError::MalformedFrame(constants::ERR_MISSING_TRAILER));
        }

        let payload = buf[HEADER_SIZE..HEADER_SIZE + declared].to_vec();
        Ok((
            Self {
                version,
                rr_id,
                call_type,
                payload,
            },
            total,
        ))
    }
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}
