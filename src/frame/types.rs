use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::error::{FrameError, FrameResult};

/// Size of the sequence-number header at the start of every data frame.
pub const HEADER_SIZE: usize = 4;

/// Token broadcast by the channel after a collided slot.
///
/// Five bytes long, so it can only be mistaken for a frame carrying a one-byte
/// payload whose id spells `NOIS` (0x5349_4F4E), far beyond any realistic
/// transfer. Senders compare against it before looking at ids.
pub const COLLISION_SIGNAL: &[u8; 5] = b"NOISE";

/// Zero-based per-transfer frame sequence number.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct FrameId(pub u32);

impl FrameId {
    pub fn next(self) -> Self {
        FrameId(self.0.wrapping_add(1))
    }

    /// Read an id from the leading header bytes, if there are enough of them.
    pub fn from_header(bytes: &[u8]) -> Option<Self> {
        let header: [u8; HEADER_SIZE] = bytes.get(..HEADER_SIZE)?.try_into().ok()?;
        Some(FrameId(u32::from_le_bytes(header)))
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Largest payload that fits in a frame of `frame_size` bytes.
pub fn max_payload(frame_size: usize) -> FrameResult<usize> {
    if frame_size <= HEADER_SIZE {
        return Err(FrameError::FrameTooSmall {
            frame_size,
            header_size: HEADER_SIZE,
        });
    }
    Ok(frame_size - HEADER_SIZE)
}

/// An encoded data frame: header followed by payload, ready for the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    id: FrameId,
    bytes: Bytes,
}

impl Frame {
    pub fn new(id: FrameId, payload: &[u8]) -> Self {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
        buf.put_u32_le(id.0);
        buf.put_slice(payload);
        Self {
            id,
            bytes: buf.freeze(),
        }
    }

    pub fn id(&self) -> FrameId {
        self.id
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// What a sender got back from the channel while waiting for an ACK.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response<'a> {
    /// Exactly the collision token.
    Collision,
    /// Something frame-shaped: the header id and the full received bytes.
    Frame { id: FrameId, bytes: &'a [u8] },
    /// Fewer bytes than a header; cannot be an acknowledgment.
    Runt(&'a [u8]),
}

impl<'a> Response<'a> {
    pub fn parse(bytes: &'a [u8]) -> Self {
        if bytes == COLLISION_SIGNAL {
            return Response::Collision;
        }
        match FrameId::from_header(bytes) {
            Some(id) => Response::Frame { id, bytes },
            None => Response::Runt(bytes),
        }
    }
}
