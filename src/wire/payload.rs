//! Little-endian payload field readers and writers.
//!
//! Strings are UTF-8 with a `u16` length prefix; blobs carry a `u32` length
//! prefix.

use bytes::BufMut;
use uuid::Uuid;

use crate::core::WireError;

/// Cursor over a message payload.
#[derive(Debug, Clone)]
pub struct PayloadReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    /// Start reading at the beginning of `buf`.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Take the next `len` bytes.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], WireError> {
        if self.remaining() < len {
            return Err(WireError::Truncated {
                expected: len,
                actual: self.remaining(),
            });
        }
        let out = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], WireError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    /// Read a `u8`.
    pub fn read_u8(&mut self) -> Result<u8, WireError> {
        Ok(self.read_array::<1>()?[0])
    }

    /// Read a little-endian `u16`.
    pub fn read_u16(&mut self) -> Result<u16, WireError> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    /// Read a little-endian `u32`.
    pub fn read_u32(&mut self) -> Result<u32, WireError> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    /// Read a 16-byte uuid.
    pub fn read_uuid(&mut self) -> Result<Uuid, WireError> {
        Ok(Uuid::from_bytes(self.read_array()?))
    }

    /// Read a `u32`-prefixed blob.
    pub fn read_blob(&mut self) -> Result<&'a [u8], WireError> {
        let len = self.read_u32()? as usize;
        self.read_bytes(len)
    }

    /// Read a `u16`-prefixed UTF-8 string.
    pub fn read_str(&mut self) -> Result<&'a str, WireError> {
        let len = self.read_u16()? as usize;
        let raw = self.read_bytes(len)?;
        std::str::from_utf8(raw).map_err(|_| WireError::InvalidString)
    }
}

/// Builder for an outbound payload.
#[derive(Debug, Clone, Default)]
pub struct PayloadWriter {
    buf: Vec<u8>,
}

impl PayloadWriter {
    /// Empty payload.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a `u8`.
    pub fn u8(mut self, value: u8) -> Self {
        self.buf.put_u8(value);
        self
    }

    /// Append a little-endian `u16`.
    pub fn u16(mut self, value: u16) -> Self {
        self.buf.put_u16_le(value);
        self
    }

    /// Append a little-endian `u32`.
    pub fn u32(mut self, value: u32) -> Self {
        self.buf.put_u32_le(value);
        self
    }

    /// Append a uuid.
    pub fn uuid(mut self, value: Uuid) -> Self {
        self.buf.put_slice(value.as_bytes());
        self
    }

    /// Append raw bytes without a prefix.
    pub fn raw(mut self, bytes: &[u8]) -> Self {
        self.buf.put_slice(bytes);
        self
    }

    /// Append a `u32`-prefixed blob.
    pub fn blob(self, bytes: &[u8]) -> Self {
        self.u32(bytes.len() as u32).raw(bytes)
    }

    /// Append a `u16`-prefixed UTF-8 string, truncated at a char boundary
    /// if it exceeds `u16::MAX` bytes.
    pub fn str(self, value: &str) -> Self {
        let mut end = value.len().min(u16::MAX as usize);
        while !value.is_char_boundary(end) {
            end -= 1;
        }
        self.u16(end as u16).raw(&value.as_bytes()[..end])
    }

    /// Finished payload bytes.
    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Body of a ping message (message id 0), request and reply alike.
///
/// The server echoes the whole payload back.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PingPayload {
    /// Sender's clock in milliseconds when the ping left.
    pub ping_at_ms: u32,
    /// Opaque data echoed by the server.
    pub data: Vec<u8>,
}

impl PingPayload {
    /// Parse from a message payload.
    pub fn from_payload(payload: &[u8]) -> Result<Self, WireError> {
        let mut r = PayloadReader::new(payload);
        let ping_at_ms = r.read_u32()?;
        let data = r.read_blob()?.to_vec();
        Ok(Self { ping_at_ms, data })
    }

    /// Serialize.
    pub fn to_payload(&self) -> Vec<u8> {
        PayloadWriter::new()
            .u32(self.ping_at_ms)
            .blob(&self.data)
            .finish()
    }
}
