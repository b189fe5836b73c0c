//! Untyped request for messages without a dedicated transaction.

use bytes::Bytes;

use crate::client::NetClient;
use crate::core::{NetError, NetResult, Protocol, TransType};
use crate::trans::{Completion, NetTrans, PendingReply, TransCtx};
use crate::wire::Frame;

/// Sends one message and yields the raw payload of the first reply.
pub struct RawRequestTrans {
    protocol: Protocol,
    msg_id: u16,
    payload: Vec<u8>,
    reply: Option<Bytes>,
    done: Option<Completion<Bytes>>,
}

impl RawRequestTrans {
    /// Message `msg_id` carrying `payload` for `protocol`.
    pub fn new(protocol: Protocol, msg_id: u16, payload: Vec<u8>) -> (Self, PendingReply<Bytes>) {
        let (done, reply) = Completion::channel();
        let trans = Self {
            protocol,
            msg_id,
            payload,
            reply: None,
            done: Some(done),
        };
        (trans, reply)
    }
}

impl NetTrans for RawRequestTrans {
    fn protocol(&self) -> Protocol {
        self.protocol
    }

    fn trans_type(&self) -> TransType {
        "raw.request"
    }

    fn send(&mut self, ctx: &mut TransCtx<'_>) -> bool {
        ctx.send(self.msg_id, &self.payload)
    }

    fn recv(&mut self, frame: &Frame, ctx: &mut TransCtx<'_>) -> bool {
        self.reply = Some(frame.payload.clone());
        ctx.complete(Ok(()));
        true
    }

    fn post(mut self: Box<Self>, result: NetResult<()>) {
        if let Some(done) = self.done.take() {
            let result = result.and_then(|()| self.reply.take().ok_or(NetError::ProtocolError));
            done.complete(result);
        }
    }
}

impl NetClient {
    /// Send message `msg_id` to `protocol` and wait for the raw reply.
    pub fn raw_request(&self, protocol: Protocol, msg_id: u16, payload: Vec<u8>) -> PendingReply<Bytes> {
        let (trans, reply) = RawRequestTrans::new(protocol, msg_id, payload);
        self.send(trans);
        reply
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::testing::{connect, harness, settle};
    use crate::core::NetConfig;

    #[tokio::test(start_paused = true)]
    async fn test_raw_request_before_connect() {
        let h = harness(NetConfig::default());
        let reply = h.client.raw_request(Protocol::Game, 40, b"join".to_vec());
        assert_eq!(h.client.pending(), 1);

        let server = connect(&h, Protocol::Game).await;
        h.client.update();
        let request = server.take_frames().remove(0);
        assert_eq!(request.msg_id(), 40);
        assert_eq!(&request.payload[..], b"join");

        server.push(request.header, b"welcome");
        settle().await;
        assert_eq!(reply.await, Ok(Bytes::from_static(b"welcome")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_by_protocol() {
        let h = harness(NetConfig::default());
        let first = h.client.raw_request(Protocol::Game, 40, Vec::new());
        let second = h.client.raw_request(Protocol::Auth, 40, Vec::new());

        assert_eq!(h.client.cancel_by_protocol(Protocol::Game, NetError::Cancelled), 1);
        assert_eq!(first.await, Err(NetError::Cancelled));
        assert_eq!(h.client.cancel_all(NetError::RemoteShutdown), 1);
        assert_eq!(second.await, Err(NetError::RemoteShutdown));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_single() {
        let h = harness(NetConfig::default());
        let (trans, reply) = RawRequestTrans::new(Protocol::File, 1, Vec::new());
        let id = h.client.send(trans);
        assert!(h.client.cancel(id, NetError::Cancelled));
        assert!(!h.client.cancel(id, NetError::Cancelled));
        assert_eq!(reply.await, Err(NetError::Cancelled));
    }
}
