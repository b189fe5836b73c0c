//! Scenario harness shared by the client and protocol tests.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use uuid::Uuid;

use super::{NetClient, NotificationReceiver};
use crate::core::{NetConfig, NetError, Protocol};
use crate::transport::mock::{MockHandle, MockSocketCore};
use crate::wire::{MsgHeader, RegisterReply, msg};

pub(crate) type Errors = Arc<Mutex<Vec<(Protocol, NetError)>>>;

/// Token handed out by [`connect`]'s register reply.
pub(crate) const SESSION_TOKEN: Uuid = Uuid::from_u128(7);

pub(crate) struct Harness {
    pub client: NetClient,
    pub core: Arc<MockSocketCore>,
    pub errors: Errors,
    pub notifications: NotificationReceiver,
}

pub(crate) fn harness(config: NetConfig) -> Harness {
    let core = MockSocketCore::new();
    let errors: Errors = Arc::default();
    let sink = errors.clone();
    let (client, notifications) = NetClient::builder()
        .config(config)
        .socket_core(core.clone())
        .on_net_error(move |p, e| sink.lock().push((p, e)))
        .build()
        .unwrap();
    Harness {
        client,
        core,
        errors,
        notifications,
    }
}

/// Let spawned driver tasks run until they block.
pub(crate) async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

/// Move the paused clock and let the drivers react.
pub(crate) async fn advance(by: Duration) {
    tokio::time::advance(by).await;
    settle().await;
}

/// Connect `protocol` and complete the register handshake when needed.
pub(crate) async fn connect(h: &Harness, protocol: Protocol) -> Arc<MockHandle> {
    h.client.initialize(protocol).unwrap();
    h.client.start_connect(protocol, "server.test").unwrap();
    settle().await;
    let server = h.core.last_attempt().accept();
    settle().await;
    if protocol.requires_register() {
        let frames = server.take_frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].msg_id(), msg::REGISTER);
        let reply = RegisterReply {
            server_challenge: 42,
            token: SESSION_TOKEN,
        };
        server.push(MsgHeader::unsolicited(msg::REGISTER), &reply.to_payload());
        settle().await;
    }
    assert!(h.client.is_connected(protocol));
    server
}
