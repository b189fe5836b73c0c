//! Message framing shared by every protocol role.
//!
//! Wire format (little-endian):
//! ```text
//! +--------------+----------+--------------+-------------------+
//! | Msg Bytes    | Msg Id   | Trans Id     | Payload           |
//! | 4 bytes LE32 | 2 bytes  | 4 bytes LE32 | msg_bytes - 10    |
//! +--------------+----------+--------------+-------------------+
//! ```
//! `msg_bytes` counts the whole frame, header included. A trans id of zero
//! marks unsolicited traffic.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::core::{TransId, WireError, constants};

/// Frame size constants.
pub mod sizes {
    /// Length prefix size.
    pub const LENGTH_SIZE: usize = 4;
    /// Message id size.
    pub const MSG_ID_SIZE: usize = 2;
    /// Trans id size.
    pub const TRANS_ID_SIZE: usize = 4;
    /// Full header size.
    pub const HEADER_SIZE: usize = LENGTH_SIZE + MSG_ID_SIZE + TRANS_ID_SIZE;
}

/// Message ids common to every role's catalog.
pub mod msg {
    /// Keep-alive ping (request and reply).
    pub const PING: u16 = 0;
    /// Register handshake (Auth and GateKeeper).
    pub const REGISTER: u16 = 1;
}

/// Parsed frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsgHeader {
    /// Message id within the role's catalog.
    pub msg_id: u16,
    /// Correlation id.
    pub trans_id: TransId,
}

impl MsgHeader {
    /// Header for a message belonging to a transaction.
    pub fn new(msg_id: u16, trans_id: TransId) -> Self {
        Self { msg_id, trans_id }
    }

    /// Header for an unsolicited message.
    pub fn unsolicited(msg_id: u16) -> Self {
        Self::new(msg_id, TransId::UNSOLICITED)
    }
}

/// A complete inbound or outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Header fields.
    pub header: MsgHeader,
    /// Payload following the header.
    pub payload: Bytes,
}

impl Frame {
    /// Build a frame from a header and payload.
    pub fn new(header: MsgHeader, payload: impl Into<Bytes>) -> Self {
        Self {
            header,
            payload: payload.into(),
        }
    }

    /// Message id shortcut.
    pub fn msg_id(&self) -> u16 {
        self.header.msg_id
    }

    /// Trans id shortcut.
    pub fn trans_id(&self) -> TransId {
        self.header.trans_id
    }
}

/// Serialize one message into `dst`.
pub fn encode_message(header: MsgHeader, payload: &[u8], dst: &mut BytesMut) {
    let total = sizes::HEADER_SIZE + payload.len();
    dst.reserve(total);
    dst.put_u32_le(total as u32);
    dst.put_u16_le(header.msg_id);
    dst.put_u32_le(header.trans_id.0);
    dst.put_slice(payload);
}

/// Length-prefixed frame codec.
///
/// Inbound bytes arrive as an arbitrary byte stream; the codec accumulates
/// them and yields whole frames.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(constants::MAX_FRAME_SIZE)
    }
}

impl FrameCodec {
    /// Create a codec that rejects frames larger than `max_frame_size`.
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = WireError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, WireError> {
        if src.len() < sizes::LENGTH_SIZE {
            return Ok(None);
        }

        let size = u32::from_le_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if size < sizes::HEADER_SIZE {
            return Err(WireError::FrameTooSmall(size));
        }
        if size > self.max_frame_size {
            return Err(WireError::FrameTooLarge {
                size,
                max: self.max_frame_size,
            });
        }
        if src.len() < size {
            src.reserve(size - src.len());
            return Ok(None);
        }

        let mut raw = src.split_to(size);
        raw.advance(sizes::LENGTH_SIZE);
        let msg_id = raw.get_u16_le();
        let trans_id = TransId(raw.get_u32_le());

        Ok(Some(Frame {
            header: MsgHeader { msg_id, trans_id },
            payload: raw.freeze(),
        }))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = WireError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), WireError> {
        let size = sizes::HEADER_SIZE + frame.payload.len();
        if size > self.max_frame_size {
            return Err(WireError::FrameTooLarge {
                size,
                max: self.max_frame_size,
            });
        }
        encode_message(frame.header, &frame.payload, dst);
        Ok(())
    }
}
