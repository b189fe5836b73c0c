//! Connect preamble and register handshake messages.
//!
//! The preamble is written once, immediately after the socket connects and
//! before any framed message:
//! ```text
//! conn_type u8 | hdr_bytes u16 | build_id u32 | build_type u32 | branch_id u32
//! | product_id [16] | data_bytes u32 | role data ...
//! ```
//! Role data is the session token for Auth and GateKeeper, build id and
//! server type for File, and empty for Game.

use uuid::Uuid;

use super::payload::{PayloadReader, PayloadWriter};
use crate::core::{NetConfig, Protocol, WireError};

/// Size of the fixed preamble header.
pub const PREAMBLE_HEADER_SIZE: usize = 1 + 2 + 4 + 4 + 4 + 16;

/// Role-specific preamble data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreambleData {
    /// Auth and GateKeeper: token from the previous session, nil on first connect.
    Token(Uuid),
    /// File: requested build and server type.
    File {
        /// Build the client wants to patch to.
        build_id: u32,
        /// Server flavour.
        server_type: u32,
    },
    /// Game: no role data.
    Empty,
}

/// Bytes sent right after the socket connects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectPreamble {
    protocol: Protocol,
    build_id: u32,
    build_type: u32,
    branch_id: u32,
    product_id: Uuid,
    data: PreambleData,
}

impl ConnectPreamble {
    /// Build the preamble for `protocol` from the client config.
    ///
    /// `token` is only used by roles that register.
    pub fn for_protocol(protocol: Protocol, config: &NetConfig, token: Option<Uuid>) -> Self {
        let product = config.product;
        let data = match protocol {
            Protocol::Auth | Protocol::GateKeeper => {
                PreambleData::Token(token.unwrap_or_else(Uuid::nil))
            }
            Protocol::File => PreambleData::File {
                build_id: product.build_id,
                server_type: config.file_server_type,
            },
            Protocol::Game => PreambleData::Empty,
        };
        Self {
            protocol,
            build_id: product.build_id,
            build_type: product.build_type,
            branch_id: product.branch_id,
            product_id: product.product_id,
            data,
        }
    }

    /// Role data.
    pub fn data(&self) -> PreambleData {
        self.data
    }

    /// Serialize to wire bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let data = match self.data {
            PreambleData::Token(token) => PayloadWriter::new().uuid(token).finish(),
            PreambleData::File {
                build_id,
                server_type,
            } => PayloadWriter::new().u32(build_id).u32(server_type).finish(),
            PreambleData::Empty => Vec::new(),
        };

        PayloadWriter::new()
            .u8(self.protocol.conn_type())
            .u16(PREAMBLE_HEADER_SIZE as u16)
            .u32(self.build_id)
            .u32(self.build_type)
            .u32(self.branch_id)
            .uuid(self.product_id)
            .u32((4 + data.len()) as u32)
            .raw(&data)
            .finish()
    }
}

/// Payload of the register request sent after connecting.
pub fn register_request(config: &NetConfig) -> Vec<u8> {
    PayloadWriter::new().u32(config.product.build_id).finish()
}

/// Server reply completing the register handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterReply {
    /// Per-session challenge used by later login requests.
    pub server_challenge: u32,
    /// Token to present on reconnect.
    pub token: Uuid,
}

impl RegisterReply {
    /// Parse from a message payload.
    pub fn from_payload(payload: &[u8]) -> Result<Self, WireError> {
        let mut r = PayloadReader::new(payload);
        Ok(Self {
            server_challenge: r.read_u32()?,
            token: r.read_uuid()?,
        })
    }

    /// Serialize (used by tests and server simulators).
    pub fn to_payload(&self) -> Vec<u8> {
        PayloadWriter::new()
            .u32(self.server_challenge)
            .uuid(self.token)
            .finish()
    }
}
