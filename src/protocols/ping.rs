//! Round-trip ping request, available on every role.

use std::time::Duration;

use tokio::time::Instant;

use crate::client::NetClient;
use crate::core::{NetError, NetResult, Protocol, TransType};
use crate::trans::{Completion, NetTrans, PendingReply, TransCtx};
use crate::wire::{Frame, PingPayload, msg};

/// Answer to a [`PingRequestTrans`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingReply {
    /// Time between sending the request and receiving the echo.
    pub rtt: Duration,
    /// Data echoed by the server.
    pub data: Vec<u8>,
}

/// Ping carrying a transaction id; the server echoes the payload.
pub struct PingRequestTrans {
    protocol: Protocol,
    data: Vec<u8>,
    sent_at: Option<Instant>,
    reply: Option<PingReply>,
    done: Option<Completion<PingReply>>,
}

impl PingRequestTrans {
    /// Ping `protocol` with opaque `data`.
    pub fn new(protocol: Protocol, data: Vec<u8>) -> (Self, PendingReply<PingReply>) {
        let (done, reply) = Completion::channel();
        let trans = Self {
            protocol,
            data,
            sent_at: None,
            reply: None,
            done: Some(done),
        };
        (trans, reply)
    }
}

impl NetTrans for PingRequestTrans {
    fn protocol(&self) -> Protocol {
        self.protocol
    }

    fn trans_type(&self) -> TransType {
        "ping.request"
    }

    fn send(&mut self, ctx: &mut TransCtx<'_>) -> bool {
        self.sent_at = Some(ctx.now());
        let ping = PingPayload {
            ping_at_ms: 0,
            data: std::mem::take(&mut self.data),
        };
        ctx.send(msg::PING, &ping.to_payload())
    }

    fn recv(&mut self, frame: &Frame, ctx: &mut TransCtx<'_>) -> bool {
        let Ok(ping) = PingPayload::from_payload(&frame.payload) else {
            return false;
        };
        let sent_at = self.sent_at.unwrap_or_else(|| ctx.now());
        self.reply = Some(PingReply {
            rtt: ctx.now().saturating_duration_since(sent_at),
            data: ping.data,
        });
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
    /// Measure the round trip to the server of `protocol`.
    pub fn ping(&self, protocol: Protocol, data: Vec<u8>) -> PendingReply<PingReply> {
        let (trans, reply) = PingRequestTrans::new(protocol, data);
        self.send(trans);
        reply
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::client::testing::{advance, connect, harness, settle};
    use crate::core::NetConfig;

    #[tokio::test(start_paused = true)]
    async fn test_ping_measures_round_trip() {
        let h = harness(NetConfig::default());
        let server = connect(&h, Protocol::Auth).await;

        let mut reply = h.client.ping(Protocol::Auth, b"hello".to_vec());
        let request = server.take_frames().remove(0);
        assert_eq!(request.msg_id(), msg::PING);
        assert!(!request.trans_id().is_unsolicited());

        advance(Duration::from_millis(120)).await;
        server.push(request.header, &request.payload);
        settle().await;

        let reply = reply.try_take().unwrap().unwrap();
        assert_eq!(reply.data, b"hello");
        assert_eq!(reply.rtt, Duration::from_millis(120));
    }
}
