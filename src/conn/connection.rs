//! Connection object: one socket session for one protocol role.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use bytes::BytesMut;
use tokio::time::Instant;
use tokio_util::codec::Encoder;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::ping::{PingAction, PingState};
use crate::core::{ConnId, NetConfig, NetError, NetResult, Protocol, TransId};
use crate::transport::SocketHandle;
use crate::wire::{Frame, FrameCodec, MsgHeader, PingPayload, RegisterReply, msg};

/// Register handshake result for Auth and GateKeeper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handshake {
    /// Per-session challenge from the server.
    pub server_challenge: u32,
    /// Token to present on reconnect.
    pub token: Uuid,
}

impl From<RegisterReply> for Handshake {
    fn from(reply: RegisterReply) -> Self {
        Self {
            server_challenge: reply.server_challenge,
            token: reply.token,
        }
    }
}

struct ConnInner {
    socket: Option<Arc<dyn SocketHandle>>,
    cancel: Option<CancellationToken>,
    abandoned: bool,
    ready: bool,
    codec: FrameCodec,
    ping: PingState,
    handshake: Option<Handshake>,
}

/// One socket session for a protocol role.
///
/// Shared as `Arc<Connection>` by the role driver, the module slot and any
/// transaction bound to it. Once abandoned it never sends again; the socket
/// is closed on abandon or when the last reference drops, whichever is first.
pub struct Connection {
    id: ConnId,
    protocol: Protocol,
    addr: String,
    epoch: Instant,
    sequence: AtomicU32,
    live: Arc<AtomicUsize>,
    inner: parking_lot::Mutex<ConnInner>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("protocol", &self.protocol)
            .field("addr", &self.addr)
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Create a connection object. `live` counts connection objects that have
    /// not been dropped yet.
    pub fn new(
        id: ConnId,
        protocol: Protocol,
        addr: impl Into<String>,
        config: &NetConfig,
        live: Arc<AtomicUsize>,
    ) -> Self {
        live.fetch_add(1, Ordering::SeqCst);
        Self {
            id,
            protocol,
            addr: addr.into(),
            epoch: Instant::now(),
            sequence: AtomicU32::new(0),
            live,
            inner: parking_lot::Mutex::new(ConnInner {
                socket: None,
                cancel: None,
                abandoned: false,
                ready: false,
                codec: FrameCodec::new(config.max_frame_size),
                ping: PingState::new(config.ping_interval, config.ping_timeout),
                handshake: None,
            }),
        }
    }

    /// Connection id.
    pub fn id(&self) -> ConnId {
        self.id
    }

    /// Role this connection serves.
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Remote address.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Messages sent so far.
    pub fn sequence(&self) -> u32 {
        self.sequence.load(Ordering::Relaxed)
    }

    /// Whether the connection was abandoned.
    pub fn is_abandoned(&self) -> bool {
        self.inner.lock().abandoned
    }

    /// Whether transactions may use this connection.
    pub fn is_ready(&self) -> bool {
        let inner = self.inner.lock();
        inner.ready && !inner.abandoned
    }

    /// Register handshake result, once received.
    pub fn handshake(&self) -> Option<Handshake> {
        self.inner.lock().handshake
    }

    /// Last measured ping round trip.
    pub fn rtt(&self) -> Option<Duration> {
        self.inner.lock().ping.rtt()
    }

    /// Keep the token that aborts the pending connect or closes the socket.
    pub fn set_cancel(&self, token: CancellationToken) {
        let mut inner = self.inner.lock();
        if inner.abandoned {
            token.cancel();
        } else {
            inner.cancel = Some(token);
        }
    }

    /// Attach the opened socket. Returns `false` (and closes the socket) if
    /// the connection was abandoned in the meantime.
    pub fn attach(&self, socket: Arc<dyn SocketHandle>) -> bool {
        let mut inner = self.inner.lock();
        if inner.abandoned {
            socket.disconnect();
            return false;
        }
        inner.socket = Some(socket);
        true
    }

    /// Mark usable for transactions and start pinging if enabled.
    pub fn set_ready(&self, now: Instant, ping_enabled: bool) {
        let mut inner = self.inner.lock();
        if inner.abandoned {
            return;
        }
        inner.ready = true;
        if ping_enabled {
            inner.ping.start(now);
        }
    }

    /// Record the register handshake.
    pub fn set_handshake(&self, handshake: Handshake) {
        self.inner.lock().handshake = Some(handshake);
    }

    /// Mark abandoned and close the socket. Returns `false` if it already was.
    pub fn abandon(&self) -> bool {
        let (socket, cancel) = {
            let mut inner = self.inner.lock();
            if inner.abandoned {
                return false;
            }
            inner.abandoned = true;
            inner.ready = false;
            inner.ping.stop();
            (inner.socket.take(), inner.cancel.take())
        };
        if let Some(socket) = socket {
            socket.disconnect();
        }
        if let Some(cancel) = cancel {
            cancel.cancel();
        }
        true
    }

    /// Frame and send one message.
    pub fn send(&self, msg_id: u16, trans_id: TransId, payload: &[u8]) -> NetResult<()> {
        let mut inner = self.inner.lock();
        if inner.abandoned {
            return Err(NetError::NotConnected);
        }
        let Some(socket) = inner.socket.clone() else {
            return Err(NetError::NotConnected);
        };

        let mut buf = BytesMut::new();
        inner
            .codec
            .encode(Frame::new(MsgHeader::new(msg_id, trans_id), payload.to_vec()), &mut buf)?;
        if !socket.send(&buf) {
            return Err(NetError::NotConnected);
        }
        self.sequence.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Record inbound traffic.
    pub fn heard(&self, now: Instant) {
        self.inner.lock().ping.on_heard(now);
    }

    fn clock_ms(&self, now: Instant) -> u32 {
        now.saturating_duration_since(self.epoch).as_millis() as u32
    }

    /// When the keep-alive timer next needs polling.
    pub fn ping_wake(&self) -> Option<Instant> {
        self.inner.lock().ping.next_wake()
    }

    /// Drive the keep-alive timer; sends the ping itself when due.
    pub fn poll_ping(&self, now: Instant) -> PingAction {
        let action = self.inner.lock().ping.poll(now);
        if action == PingAction::SendPing {
            let ping = PingPayload {
                ping_at_ms: self.clock_ms(now),
                data: Vec::new(),
            };
            if let Err(e) = self.send(msg::PING, TransId::UNSOLICITED, &ping.to_payload()) {
                tracing::debug!(
                    protocol = %self.protocol,
                    conn_id = %self.id,
                    error = %e,
                    "keep-alive ping not sent"
                );
            }
        }
        action
    }

    /// Handle a keep-alive ping reply.
    pub fn on_pong(&self, ping: &PingPayload, now: Instant) {
        let rtt = Duration::from_millis(self.clock_ms(now).wrapping_sub(ping.ping_at_ms) as u64);
        self.inner.lock().ping.on_pong(rtt);
        tracing::trace!(protocol = %self.protocol, conn_id = %self.id, rtt_ms = rtt.as_millis() as u64, "pong");
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        if let Some(socket) = inner.socket.take() {
            socket.disconnect();
        }
        if let Some(cancel) = inner.cancel.take() {
            cancel.cancel();
        }
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockSocketCore;
    use crate::transport::{SocketCore, SocketEvent, SocketNotify};

    struct Capture(parking_lot::Mutex<Option<Arc<dyn SocketHandle>>>);

    impl SocketNotify for Capture {
        fn notify(&self, event: SocketEvent) {
            if let SocketEvent::Connected(handle) = event {
                *self.0.lock() = Some(handle);
            }
        }
    }

    fn open(live: &Arc<AtomicUsize>) -> (Connection, Arc<crate::transport::mock::MockHandle>) {
        let core = MockSocketCore::new();
        let capture = Arc::new(Capture(parking_lot::Mutex::new(None)));
        let _ = core.connect("127.0.0.1:1", Vec::new(), capture.clone());
        let server = core.attempt(0).accept();
        let conn = Connection::new(ConnId(1), Protocol::File, "127.0.0.1:1", &NetConfig::default(), live.clone());
        let socket = capture.0.lock().take().unwrap();
        assert!(conn.attach(socket));
        (conn, server)
    }

    #[test]
    fn test_send_frames_and_counts() {
        let live = Arc::new(AtomicUsize::new(0));
        let (conn, server) = open(&live);
        conn.send(5, TransId(9), b"abc").unwrap();
        assert_eq!(conn.sequence(), 1);

        let frames = server.take_frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].msg_id(), 5);
        assert_eq!(frames[0].trans_id(), TransId(9));
        assert_eq!(&frames[0].payload[..], b"abc");
    }

    #[test]
    fn test_abandoned_never_sends() {
        let live = Arc::new(AtomicUsize::new(0));
        let (conn, server) = open(&live);
        assert!(conn.abandon());
        assert!(!conn.abandon());
        assert!(server.is_closed());
        assert_eq!(conn.send(5, TransId(1), b""), Err(NetError::NotConnected));
        assert!(!conn.is_ready());
    }

    #[test]
    fn test_last_drop_closes_socket() {
        let live = Arc::new(AtomicUsize::new(0));
        let (conn, server) = open(&live);
        assert_eq!(live.load(Ordering::SeqCst), 1);
        let conn = Arc::new(conn);
        let bound = conn.clone();
        drop(conn);
        assert!(!server.is_closed());
        drop(bound);
        assert!(server.is_closed());
        assert_eq!(live.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_ping_sent_when_due() {
        let live = Arc::new(AtomicUsize::new(0));
        let (conn, server) = open(&live);
        let now = Instant::now();
        conn.set_ready(now, true);
        assert!(conn.is_ready());

        let config = NetConfig::default();
        assert_eq!(conn.poll_ping(now + config.ping_interval), PingAction::SendPing);
        let frames = server.take_frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].msg_id(), msg::PING);
        assert!(frames[0].trans_id().is_unsolicited());
    }
}
