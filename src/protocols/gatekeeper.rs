//! GateKeeper requests: where to find the file and auth servers.

use super::ReplyTrans;
use crate::client::NetClient;
use crate::core::Protocol;
use crate::trans::PendingReply;
use crate::wire::{PayloadReader, PayloadWriter};

/// GateKeeper message catalog.
pub mod gatekeeper_msg {
    /// File server address request / reply.
    pub const FILE_SRV_IP_ADDRESS: u16 = 2;
    /// Auth server address request / reply.
    pub const AUTH_SRV_IP_ADDRESS: u16 = 3;
}

fn read_address(reader: &mut PayloadReader<'_>) -> Result<String, crate::core::WireError> {
    Ok(reader.read_str()?.to_string())
}

impl NetClient {
    /// Ask the GateKeeper for a file server address. Patchers get a server
    /// carrying patcher builds.
    pub fn gatekeeper_file_server_address(&self, is_patcher: bool) -> PendingReply<String> {
        let payload = PayloadWriter::new().u8(is_patcher.into()).finish();
        let (trans, reply) = ReplyTrans::new(
            Protocol::GateKeeper,
            "gatekeeper.file_srv_address",
            gatekeeper_msg::FILE_SRV_IP_ADDRESS,
            payload,
            read_address,
        );
        self.send(trans);
        reply
    }

    /// Ask the GateKeeper for an auth server address.
    pub fn gatekeeper_auth_server_address(&self) -> PendingReply<String> {
        let (trans, reply) = ReplyTrans::new(
            Protocol::GateKeeper,
            "gatekeeper.auth_srv_address",
            gatekeeper_msg::AUTH_SRV_IP_ADDRESS,
            Vec::new(),
            read_address,
        );
        self.send(trans);
        reply
    }
}
