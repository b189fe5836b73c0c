//! Per-role connection driver.
//!
//! One task per initialized role owns the role's current connection and its
//! reconnect state. Socket events, application commands and timers are
//! handled one at a time, so a role never has two live sessions in flight.

use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::codec::Decoder;
use uuid::Uuid;

use super::client::Shared;
use super::dispatch::{self, Routed};
use crate::conn::{Connection, PingAction, ReconnectDecision, ReconnectPolicy, ReconnectState};
use crate::core::{ConnId, NetError, Protocol, TransId};
use crate::transport::{SocketEvent, SocketHandle, SocketNotify};
use crate::wire::{ConnectPreamble, FrameCodec, msg, register_request};

/// Input to a driver task.
pub(crate) enum DriverEvent {
    /// Something happened on the socket of connection `conn_id`.
    Socket { conn_id: ConnId, event: SocketEvent },
    /// Abandon the current session and connect to this address.
    Connect(String),
    /// Abandon the current session and stay idle.
    Disconnect,
    /// Abandon the current session and exit.
    Stop,
}

/// Driver lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    /// No address, given up, or explicitly disconnected.
    Idle,
    /// Next connect attempt starts at this instant.
    WaitingToConnect(Instant),
    /// Socket connect in progress; fails at this deadline.
    Connecting(Instant),
    /// Waiting for the register reply; fails at this deadline.
    Registering(Instant),
    /// Ready for transactions.
    Connected,
}

struct DriverNotify {
    conn_id: ConnId,
    tx: mpsc::UnboundedSender<DriverEvent>,
}

impl SocketNotify for DriverNotify {
    fn notify(&self, event: SocketEvent) {
        let _ = self.tx.send(DriverEvent::Socket {
            conn_id: self.conn_id,
            event,
        });
    }
}

pub(crate) struct Driver {
    protocol: Protocol,
    generation: u64,
    shared: Arc<Shared>,
    tx: mpsc::UnboundedSender<DriverEvent>,
    rx: mpsc::UnboundedReceiver<DriverEvent>,
    addr: Option<String>,
    phase: Phase,
    conn: Option<Arc<Connection>>,
    recv_buf: BytesMut,
    codec: FrameCodec,
    reconnect: ReconnectState,
    token: Option<Uuid>,
}

impl Driver {
    pub fn new(
        protocol: Protocol,
        generation: u64,
        shared: Arc<Shared>,
        tx: mpsc::UnboundedSender<DriverEvent>,
        rx: mpsc::UnboundedReceiver<DriverEvent>,
    ) -> Self {
        let config = &shared.config;
        let reconnect = ReconnectState::new(ReconnectPolicy::from_config(config, protocol));
        let codec = FrameCodec::new(config.max_frame_size);
        Self {
            protocol,
            generation,
            shared,
            tx,
            rx,
            addr: None,
            phase: Phase::Idle,
            conn: None,
            recv_buf: BytesMut::new(),
            codec,
            reconnect,
            token: None,
        }
    }

    pub async fn run(mut self) {
        tracing::debug!(protocol = %self.protocol, "driver started");
        loop {
            let wake = self.next_wake();
            let sleep_to = wake.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));
            tokio::select! {
                event = self.rx.recv() => match event {
                    None | Some(DriverEvent::Stop) => break,
                    Some(event) => self.handle(event, Instant::now()),
                },
                _ = tokio::time::sleep_until(sleep_to), if wake.is_some() => {
                    self.on_timer(Instant::now());
                }
            }
        }
        self.abandon_current(NetError::RemoteShutdown);
        tracing::debug!(protocol = %self.protocol, "driver stopped");
    }

    fn next_wake(&self) -> Option<Instant> {
        match self.phase {
            Phase::Idle => None,
            Phase::WaitingToConnect(at) | Phase::Connecting(at) | Phase::Registering(at) => Some(at),
            Phase::Connected => self.conn.as_ref().and_then(|conn| conn.ping_wake()),
        }
    }

    fn handle(&mut self, event: DriverEvent, now: Instant) {
        match event {
            DriverEvent::Connect(addr) => {
                self.abandon_current(NetError::Disconnected);
                self.addr = Some(addr);
                self.reconnect.reset();
                self.start_attempt(now);
            }
            DriverEvent::Disconnect => {
                self.abandon_current(NetError::Disconnected);
                self.phase = Phase::Idle;
            }
            DriverEvent::Socket { conn_id, event } => {
                let current = self.conn.as_ref().map(|conn| conn.id());
                if current == Some(conn_id) {
                    self.on_socket(event, now);
                } else if let SocketEvent::Connected(handle) = event {
                    tracing::debug!(protocol = %self.protocol, conn_id = %conn_id, "closing stale socket");
                    handle.disconnect();
                }
            }
            DriverEvent::Stop => {}
        }
    }

    fn on_timer(&mut self, now: Instant) {
        match self.phase {
            Phase::WaitingToConnect(at) if now >= at => self.start_attempt(now),
            Phase::Connecting(deadline) | Phase::Registering(deadline) if now >= deadline => {
                tracing::warn!(protocol = %self.protocol, "connect attempt timed out");
                self.connection_lost(now);
            }
            Phase::Connected => {
                let dead = self
                    .conn
                    .as_ref()
                    .is_some_and(|conn| conn.poll_ping(now) == PingAction::Dead);
                if dead {
                    tracing::warn!(protocol = %self.protocol, "no traffic within ping timeout");
                    self.connection_lost(now);
                }
            }
            _ => {}
        }
    }

    fn start_attempt(&mut self, now: Instant) {
        let Some(addr) = self.addr.clone() else {
            self.phase = Phase::Idle;
            return;
        };
        let config = &self.shared.config;
        let conn_id = self.shared.next_conn_id();
        let conn = Arc::new(Connection::new(
            conn_id,
            self.protocol,
            addr.clone(),
            config,
            self.shared.live.clone(),
        ));
        let preamble = ConnectPreamble::for_protocol(self.protocol, config, self.token).to_bytes();
        let notify = Arc::new(DriverNotify {
            conn_id,
            tx: self.tx.clone(),
        });

        self.reconnect.on_attempt(now);
        self.recv_buf.clear();
        self.phase = Phase::Connecting(now + config.disconnected_timeout);
        self.conn = Some(conn.clone());

        tracing::info!(protocol = %self.protocol, conn_id = %conn_id, addr = %addr, "connecting");
        let cancel = self.shared.core.connect(&addr, preamble, notify);
        conn.set_cancel(cancel);
    }

    fn on_socket(&mut self, event: SocketEvent, now: Instant) {
        match event {
            SocketEvent::Connected(handle) => self.on_connected(handle, now),
            SocketEvent::ConnectFailed(reason) => {
                tracing::warn!(protocol = %self.protocol, reason = %reason, "connect failed");
                self.connection_lost(now);
            }
            SocketEvent::Read(bytes) => self.on_read(bytes, now),
            SocketEvent::Disconnected => {
                tracing::info!(protocol = %self.protocol, "disconnected");
                self.connection_lost(now);
            }
        }
    }

    fn on_connected(&mut self, handle: Arc<dyn SocketHandle>, now: Instant) {
        let Some(conn) = self.conn.clone() else {
            handle.disconnect();
            return;
        };
        if !conn.attach(handle) {
            return;
        }
        self.reconnect.on_connected(now);

        if !self.protocol.requires_register() {
            self.become_ready(&conn, now);
            return;
        }

        let request = register_request(&self.shared.config);
        if conn.send(msg::REGISTER, TransId::UNSOLICITED, &request).is_err() {
            self.connection_lost(now);
            return;
        }
        self.phase = Phase::Registering(now + self.shared.config.disconnected_timeout);
    }

    fn become_ready(&mut self, conn: &Arc<Connection>, now: Instant) {
        let ping_enabled = self.shared.config.protocol(self.protocol).ping_enabled;
        conn.set_ready(now, ping_enabled);
        self.phase = Phase::Connected;
        let module = self.shared.modules.get(self.protocol);
        if !module.set_active(self.generation, conn.clone()) {
            tracing::debug!(protocol = %self.protocol, conn_id = %conn.id(), "driver replaced, connection not published");
            return;
        }
        tracing::info!(protocol = %self.protocol, conn_id = %conn.id(), addr = %conn.addr(), "connected");
    }

    fn on_read(&mut self, bytes: Bytes, now: Instant) {
        let Some(conn) = self.conn.clone() else {
            return;
        };
        conn.heard(now);
        self.recv_buf.extend_from_slice(&bytes);

        loop {
            let frame = match self.codec.decode(&mut self.recv_buf) {
                Ok(Some(frame)) => frame,
                Ok(None) => return,
                Err(e) => {
                    tracing::warn!(protocol = %self.protocol, conn_id = %conn.id(), error = %e, "bad frame");
                    self.connection_lost(now);
                    return;
                }
            };

            let routed = dispatch::route(
                &self.shared.table,
                &self.shared.notifications,
                &conn,
                frame,
                now,
            );
            match routed {
                Routed::Handled => {}
                Routed::Register(reply) => {
                    if matches!(self.phase, Phase::Registering(_)) {
                        self.token = Some(reply.token);
                        conn.set_handshake(reply.into());
                        self.become_ready(&conn, now);
                    }
                }
                Routed::Drop => {
                    self.connection_lost(now);
                    return;
                }
            }
        }
    }

    /// Abandon the current connection and cancel what was bound to it.
    fn abandon_current(&mut self, error: NetError) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        self.shared.modules.get(self.protocol).clear_active(conn.id());
        conn.abandon();
        let cancelled = self.shared.table.cancel_by_conn_id(conn.id(), error);
        if cancelled > 0 {
            tracing::debug!(
                protocol = %self.protocol,
                conn_id = %conn.id(),
                cancelled,
                error = %error,
                "cancelled bound transactions"
            );
        }
    }

    fn connection_lost(&mut self, now: Instant) {
        self.abandon_current(NetError::Disconnected);
        match self.reconnect.on_disconnect(now) {
            ReconnectDecision::RetryAt(at) => {
                tracing::info!(
                    protocol = %self.protocol,
                    delay_ms = at.saturating_duration_since(now).as_millis() as u64,
                    "reconnect scheduled"
                );
                self.phase = Phase::WaitingToConnect(at);
            }
            ReconnectDecision::GiveUp(error) => {
                tracing::warn!(
                    protocol = %self.protocol,
                    error = %error,
                    immediate_disconnects = self.reconnect.immediate_disconnects(),
                    failed_connects = self.reconnect.failed_connects(),
                    "giving up on connection"
                );
                self.phase = Phase::Idle;
                self.shared.report_error(self.protocol, error);
            }
        }
    }
}
