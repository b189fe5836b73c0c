//! The client context.
//!
//! [`NetClient`] owns the transaction table, the four role modules and their
//! driver tasks. Several clients may coexist in one process; nothing is
//! global.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use tokio::runtime::Handle;
use tokio::sync::mpsc;

use super::dispatch::{Notification, NotificationReceiver};
use super::driver::{Driver, DriverEvent};
use super::module::{DriverHandle, Modules};
use crate::core::{ClientError, ConnId, NetConfig, NetError, Protocol, TransId};
use crate::trans::{NetTrans, TransTable, UpdateStats};
use crate::transport::SocketCore;

/// Callback for hard, non-recoverable network errors (exhausted reconnects,
/// dropped game connections).
pub type ErrorCallback = Arc<dyn Fn(Protocol, NetError) + Send + Sync>;

/// State shared between the client handle and its driver tasks.
pub(crate) struct Shared {
    pub config: NetConfig,
    pub table: TransTable,
    pub modules: Modules,
    pub core: Arc<dyn SocketCore>,
    pub notifications: mpsc::UnboundedSender<Notification>,
    pub live: Arc<AtomicUsize>,
    on_error: ErrorCallback,
    next_conn_id: AtomicU32,
}

impl Shared {
    pub fn next_conn_id(&self) -> ConnId {
        ConnId(self.next_conn_id.fetch_add(1, Ordering::Relaxed).wrapping_add(1))
    }

    pub fn report_error(&self, protocol: Protocol, error: NetError) {
        (self.on_error)(protocol, error);
    }
}

/// Builder for [`NetClient`].
pub struct NetClientBuilder {
    config: NetConfig,
    core: Option<Arc<dyn SocketCore>>,
    runtime: Option<Handle>,
    on_error: Option<ErrorCallback>,
}

impl fmt::Debug for NetClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetClientBuilder")
            .field("config", &self.config)
            .field("core", &self.core.is_some())
            .field("runtime", &self.runtime.is_some())
            .finish_non_exhaustive()
    }
}

impl Default for NetClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl NetClientBuilder {
    /// Start with the default configuration.
    pub fn new() -> Self {
        Self {
            config: NetConfig::default(),
            core: None,
            runtime: None,
            on_error: None,
        }
    }

    /// Use this configuration.
    pub fn config(mut self, config: NetConfig) -> Self {
        self.config = config;
        self
    }

    /// Use this socket core instead of the tokio TCP one.
    pub fn socket_core(mut self, core: Arc<dyn SocketCore>) -> Self {
        self.core = Some(core);
        self
    }

    /// Spawn driver tasks on this runtime instead of the current one.
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    /// Install the global error callback. By default errors are logged.
    pub fn on_net_error(mut self, f: impl Fn(Protocol, NetError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    /// Build the client and the receiver for server notifications.
    pub fn build(self) -> Result<(NetClient, NotificationReceiver), ClientError> {
        self.config.validate()?;
        let runtime = match self.runtime {
            Some(handle) => handle,
            None => Handle::try_current().map_err(|_| ClientError::NoRuntime)?,
        };
        let core = match self.core {
            Some(core) => core,
            None => default_core()?,
        };
        let on_error = self.on_error.unwrap_or_else(|| {
            Arc::new(|protocol, error| {
                tracing::error!(protocol = %protocol, error = %error, "network error");
            })
        });

        let (notifications, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            table: TransTable::new(self.config.trans_timeout),
            config: self.config,
            modules: Modules::new(),
            core,
            notifications,
            live: Arc::new(AtomicUsize::new(0)),
            on_error,
            next_conn_id: AtomicU32::new(0),
        });
        Ok((NetClient { shared, runtime }, rx))
    }
}

#[cfg(feature = "tcp")]
fn default_core() -> Result<Arc<dyn SocketCore>, ClientError> {
    Ok(Arc::new(crate::transport::TcpSocketCore::new()))
}

#[cfg(not(feature = "tcp"))]
fn default_core() -> Result<Arc<dyn SocketCore>, ClientError> {
    Err(ClientError::InvalidConfig("no socket core configured".into()))
}

/// Client network context.
///
/// # Example
///
/// ```no_run
/// use ngl_client::prelude::*;
///
/// # async fn run() -> Result<(), ClientError> {
/// let (client, _notifications) = NetClient::builder()
///     .on_net_error(|protocol, error| eprintln!("{protocol}: {error}"))
///     .build()?;
///
/// client.initialize(Protocol::GateKeeper)?;
/// client.start_connect(Protocol::GateKeeper, "gatekeeper.example.net")?;
///
/// let file_server = client.gatekeeper_file_server_address(false).await;
/// # let _ = file_server;
/// client.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct NetClient {
    shared: Arc<Shared>,
    runtime: Handle,
}

impl fmt::Debug for NetClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetClient")
            .field("pending", &self.shared.table.len())
            .field("live_connections", &self.live_connections())
            .finish_non_exhaustive()
    }
}

impl NetClient {
    /// Start building a client.
    pub fn builder() -> NetClientBuilder {
        NetClientBuilder::new()
    }

    /// Client configuration.
    pub fn config(&self) -> &NetConfig {
        &self.shared.config
    }

    /// Start the driver for `protocol`. Idempotent.
    pub fn initialize(&self, protocol: Protocol) -> Result<(), ClientError> {
        let started = self.shared.modules.get(protocol).start(|generation| {
            let (tx, rx) = mpsc::unbounded_channel();
            let driver = Driver::new(protocol, generation, self.shared.clone(), tx.clone(), rx);
            let task = self.runtime.spawn(driver.run());
            DriverHandle { tx, task }
        });
        if started {
            tracing::debug!(protocol = %protocol, "protocol initialized");
        }
        Ok(())
    }

    /// Whether `protocol` has been initialized and not destroyed.
    pub fn is_initialized(&self, protocol: Protocol) -> bool {
        self.shared.modules.get(protocol).is_running()
    }

    /// Tear down `protocol`: every transaction for it completes with
    /// [`NetError::RemoteShutdown`] and its connection is abandoned.
    pub fn destroy(&self, protocol: Protocol) {
        let _ = self.stop_driver(protocol);
    }

    fn stop_driver(&self, protocol: Protocol) -> Option<DriverHandle> {
        let driver = self.shared.modules.get(protocol).stop()?;
        let cancelled = self
            .shared
            .table
            .cancel_by_protocol(protocol, NetError::RemoteShutdown);
        let _ = driver.tx.send(DriverEvent::Stop);
        tracing::debug!(protocol = %protocol, cancelled, "protocol destroyed");
        Some(driver)
    }

    /// Connect `protocol` to `addr`, replacing any current connection. The
    /// default port is appended when `addr` has none.
    pub fn start_connect(&self, protocol: Protocol, addr: &str) -> Result<(), ClientError> {
        let addr = addr.trim();
        if addr.is_empty() {
            return Err(ClientError::EmptyAddress(protocol));
        }
        let endpoint = self.shared.config.endpoint(addr);
        self.shared
            .modules
            .get(protocol)
            .command(DriverEvent::Connect(endpoint))
    }

    /// Drop the connection for `protocol` without reconnecting.
    pub fn disconnect(&self, protocol: Protocol) -> Result<(), ClientError> {
        self.shared
            .modules
            .get(protocol)
            .command(DriverEvent::Disconnect)
    }

    /// Whether `protocol` has a ready connection.
    pub fn is_connected(&self, protocol: Protocol) -> bool {
        self.shared.modules.get(protocol).active().is_some()
    }

    /// Id of the ready connection for `protocol`.
    pub fn conn_id(&self, protocol: Protocol) -> Option<ConnId> {
        self.shared.modules.get(protocol).active().map(|conn| conn.id())
    }

    /// Submit a transaction.
    pub fn send(&self, trans: impl NetTrans) -> TransId {
        self.send_boxed(Box::new(trans))
    }

    /// Submit a boxed transaction.
    pub fn send_boxed(&self, trans: Box<dyn NetTrans>) -> TransId {
        self.shared.table.send(trans, &self.shared.modules)
    }

    /// Cancel one transaction.
    pub fn cancel(&self, id: TransId, error: NetError) -> bool {
        self.shared.table.cancel(id, error)
    }

    /// Cancel every transaction for `protocol`.
    pub fn cancel_by_protocol(&self, protocol: Protocol, error: NetError) -> usize {
        self.shared.table.cancel_by_protocol(protocol, error)
    }

    /// Cancel every transaction bound to `conn_id`.
    pub fn cancel_by_conn_id(&self, conn_id: ConnId, error: NetError) -> usize {
        self.shared.table.cancel_by_conn_id(conn_id, error)
    }

    /// Cancel every transaction.
    pub fn cancel_all(&self, error: NetError) -> usize {
        self.shared.table.cancel_all(error)
    }

    /// Per-tick sweep: start waiting transactions, expire overdue ones and
    /// post completed notify transactions.
    pub fn update(&self) -> UpdateStats {
        self.shared.table.update(&self.shared.modules)
    }

    /// Transactions in the table.
    pub fn pending(&self) -> usize {
        self.shared.table.len()
    }

    /// Connection objects not yet dropped, across all roles.
    pub fn live_connections(&self) -> usize {
        self.shared.live.load(Ordering::SeqCst)
    }

    /// Destroy every role and wait for the driver tasks to exit.
    pub async fn shutdown(self) {
        let drivers: Vec<_> = Protocol::ALL
            .iter()
            .filter_map(|&protocol| self.stop_driver(protocol))
            .collect();
        for driver in drivers {
            if let Err(e) = driver.task.await {
                tracing::warn!(error = %e, "driver task failed");
            }
        }
        self.shared.table.cancel_all(NetError::RemoteShutdown);
    }
}

impl Drop for NetClient {
    fn drop(&mut self) {
        for protocol in Protocol::ALL {
            if let Some(driver) = self.shared.modules.get(protocol).stop() {
                let _ = driver.tx.send(DriverEvent::Stop);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::client::testing::{SESSION_TOKEN, advance, connect, harness, settle};
    use crate::core::{NetConfigBuilder, TransState};
    use crate::trans::{Completion, NotifyTrans, PendingReply, TransCtx};
    use crate::wire::{Frame, MsgHeader, PREAMBLE_HEADER_SIZE, msg};

    /// Request answered by the first reply; yields the reply payload.
    struct Echo {
        protocol: Protocol,
        payload: Option<Vec<u8>>,
        done: Option<Completion<Vec<u8>>>,
    }

    fn echo(protocol: Protocol) -> (Echo, PendingReply<Vec<u8>>) {
        let (done, reply) = Completion::channel();
        (
            Echo {
                protocol,
                payload: None,
                done: Some(done),
            },
            reply,
        )
    }

    impl NetTrans for Echo {
        fn protocol(&self) -> Protocol {
            self.protocol
        }

        fn trans_type(&self) -> crate::core::TransType {
            "test.echo"
        }

        fn send(&mut self, ctx: &mut TransCtx<'_>) -> bool {
            ctx.send(50, b"request")
        }

        fn recv(&mut self, frame: &Frame, ctx: &mut TransCtx<'_>) -> bool {
            self.payload = Some(frame.payload.to_vec());
            ctx.complete(Ok(()));
            true
        }

        fn post(mut self: Box<Self>, result: crate::core::NetResult<()>) {
            if let Some(done) = self.done.take() {
                done.complete(result.map(|()| self.payload.take().unwrap_or_default()));
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_scenario_reply_before_deadline() {
        let h = harness(NetConfig::default());
        let server = connect(&h, Protocol::GateKeeper).await;

        let (trans, mut reply) = echo(Protocol::GateKeeper);
        let id = h.client.send(trans);
        let frames = server.take_frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].trans_id(), id);

        server.push(MsgHeader::new(50, id), b"answer");
        settle().await;
        assert_eq!(reply.try_take(), Some(Ok(b"answer".to_vec())));
        assert_eq!(h.client.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scenario_no_reply_times_out() {
        let config = NetConfigBuilder::new()
            .trans_timeout(Duration::from_secs(10))
            .build()
            .unwrap();
        let h = harness(config);
        let _server = connect(&h, Protocol::File).await;

        let (trans, mut reply) = echo(Protocol::File);
        h.client.send(trans);
        advance(Duration::from_secs(9)).await;
        h.client.update();
        assert_eq!(reply.try_take(), None);

        advance(Duration::from_secs(1)).await;
        h.client.update();
        assert_eq!(reply.try_take(), Some(Err(NetError::TimedOut)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scenario_disconnect_cancels_bound() {
        let h = harness(NetConfig::default());
        let server = connect(&h, Protocol::Auth).await;
        let conn_id = h.client.conn_id(Protocol::Auth).unwrap();

        let mut replies: Vec<_> = (0..3)
            .map(|_| {
                let (trans, reply) = echo(Protocol::Auth);
                h.client.send(trans);
                reply
            })
            .collect();

        server.drop_remote();
        settle().await;
        for reply in &mut replies {
            assert_eq!(reply.try_take(), Some(Err(NetError::Disconnected)));
        }
        assert!(!h.client.is_connected(Protocol::Auth));
        assert_eq!(h.client.cancel_by_conn_id(conn_id, NetError::Cancelled), 0);
        assert!(h.errors.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_scenario_ping_timeout_forces_reconnect() {
        let config = NetConfigBuilder::new()
            .ping_interval(Duration::from_secs(1))
            .trans_timeout(Duration::from_secs(600))
            .build()
            .unwrap();
        let h = harness(config);
        let server = connect(&h, Protocol::File).await;
        let (trans, mut reply) = echo(Protocol::File);
        h.client.send(trans);

        for _ in 0..9 {
            advance(Duration::from_secs(1)).await;
        }
        assert_eq!(reply.try_take(), None);
        let pings = server
            .take_frames()
            .into_iter()
            .filter(|f| f.msg_id() == msg::PING)
            .count();
        assert!(pings >= 8);

        advance(Duration::from_secs(1)).await;
        assert_eq!(reply.try_take(), Some(Err(NetError::Disconnected)));
        assert!(server.is_closed());
        assert_eq!(h.core.attempt_count(), 1);

        advance(Duration::from_secs(5)).await;
        assert_eq!(h.core.attempt_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pong_keeps_connection_alive() {
        let config = NetConfigBuilder::new()
            .ping_interval(Duration::from_secs(1))
            .build()
            .unwrap();
        let h = harness(config);
        let server = connect(&h, Protocol::File).await;

        for _ in 0..30 {
            advance(Duration::from_secs(1)).await;
            for ping in server.take_frames() {
                server.push(ping.header, &ping.payload);
            }
        }
        settle().await;
        assert!(h.client.is_connected(Protocol::File));
        assert_eq!(h.core.attempt_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_connects_give_up_once() {
        let h = harness(NetConfig::default());
        h.client.initialize(Protocol::Auth).unwrap();
        h.client.start_connect(Protocol::Auth, "auth.test").unwrap();
        settle().await;

        let mut last_attempt = tokio::time::Instant::now();
        for n in 0..5 {
            assert_eq!(h.core.attempt_count(), n + 1);
            let now = tokio::time::Instant::now();
            assert!(now - last_attempt <= h.client.config().max_reconnect_interval);
            last_attempt = now;
            h.core.last_attempt().fail();
            settle().await;
            if n < 4 {
                while h.core.attempt_count() == n + 1 {
                    advance(Duration::from_millis(100)).await;
                }
            }
        }

        advance(Duration::from_secs(60)).await;
        assert_eq!(h.core.attempt_count(), 5);
        assert_eq!(*h.errors.lock(), vec![(Protocol::Auth, NetError::ConnectFailed)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_game_drop_reported_without_reconnect() {
        let h = harness(NetConfig::default());
        let server = connect(&h, Protocol::Game).await;
        server.drop_remote();
        settle().await;
        advance(Duration::from_secs(60)).await;

        assert_eq!(h.core.attempt_count(), 1);
        assert_eq!(*h.errors.lock(), vec![(Protocol::Game, NetError::Disconnected)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_presents_token() {
        let h = harness(NetConfig::default());
        let server = connect(&h, Protocol::GateKeeper).await;
        assert_eq!(h.core.attempt(0).preamble[PREAMBLE_HEADER_SIZE + 4..], [0u8; 16]);

        advance(Duration::from_secs(30)).await;
        server.drop_remote();
        settle().await;
        advance(Duration::from_secs(1)).await;

        assert_eq!(h.core.attempt_count(), 2);
        let preamble = h.core.attempt(1).preamble;
        assert_eq!(&preamble[PREAMBLE_HEADER_SIZE + 4..], SESSION_TOKEN.as_bytes());
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiting_transaction_starts_after_connect() {
        let h = harness(NetConfig::default());
        h.client.initialize(Protocol::File).unwrap();
        let (trans, mut reply) = echo(Protocol::File);
        let id = h.client.send(trans);
        assert_eq!(trans_state(&h.client, id), Some(TransState::WaitServerConnect));

        h.client.start_connect(Protocol::File, "file.test").unwrap();
        settle().await;
        let server = h.core.last_attempt().accept();
        settle().await;
        h.client.update();
        assert_eq!(trans_state(&h.client, id), Some(TransState::WaitServerResponse));

        server.push(MsgHeader::new(50, id), b"ok");
        settle().await;
        assert_eq!(reply.try_take(), Some(Ok(b"ok".to_vec())));
    }

    fn trans_state(client: &NetClient, id: TransId) -> Option<TransState> {
        client.shared.table.state(id)
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroy_cancels_with_remote_shutdown() {
        let h = harness(NetConfig::default());
        let _server = connect(&h, Protocol::Auth).await;
        let (trans, mut reply) = echo(Protocol::Auth);
        h.client.send(trans);
        let (waiting, mut waiting_reply) = echo(Protocol::File);
        h.client.send(waiting);

        h.client.destroy(Protocol::Auth);
        assert_eq!(reply.try_take(), Some(Err(NetError::RemoteShutdown)));
        assert_eq!(waiting_reply.try_take(), None);
        assert!(!h.client.is_initialized(Protocol::Auth));
        assert!(!h.client.is_connected(Protocol::Auth));
        assert!(matches!(
            h.client.start_connect(Protocol::Auth, "auth.test"),
            Err(ClientError::NotInitialized(Protocol::Auth))
        ));

        settle().await;
        assert_eq!(h.client.live_connections(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_notifications_and_notify_trans() {
        let mut h = harness(NetConfig::default());
        let server = connect(&h, Protocol::File).await;
        let conn_id = h.client.conn_id(Protocol::File).unwrap();

        server.push(MsgHeader::unsolicited(77), b"push");
        settle().await;
        let note = h.notifications.try_recv().unwrap();
        assert_eq!(note.protocol, Protocol::File);
        assert_eq!(note.conn_id, conn_id);
        assert_eq!(note.msg_id, 77);
        assert_eq!(&note.payload[..], b"push");

        let (done, mut sent) = Completion::channel();
        h.client.send(NotifyTrans::new(Protocol::File, 9, b"fire".to_vec()).with_completion(done));
        assert_eq!(server.take_frames()[0].msg_id(), 9);
        assert_eq!(sent.try_take(), None);
        h.client.update();
        assert_eq!(sent.try_take(), Some(Ok(())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_replaces_connection() {
        let h = harness(NetConfig::default());
        let first = connect(&h, Protocol::File).await;
        let first_id = h.client.conn_id(Protocol::File).unwrap();

        h.client.start_connect(Protocol::File, "other.test").unwrap();
        settle().await;
        assert!(first.is_closed());
        assert!(!h.client.is_connected(Protocol::File));
        assert_eq!(h.core.last_attempt().addr, "other.test:14617");

        h.core.last_attempt().accept();
        settle().await;
        let second_id = h.client.conn_id(Protocol::File).unwrap();
        assert_ne!(first_id, second_id);
        assert_eq!(h.client.live_connections(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reinitialize_ignores_old_driver_connect() {
        let h = harness(NetConfig::default());
        h.client.initialize(Protocol::File).unwrap();
        h.client.start_connect(Protocol::File, "old.test").unwrap();
        settle().await;
        // Queued to the first driver before it gets to run again.
        let stale = h.core.last_attempt().accept();

        h.client.destroy(Protocol::File);
        h.client.initialize(Protocol::File).unwrap();
        h.client.start_connect(Protocol::File, "new.test").unwrap();
        settle().await;
        assert!(stale.is_closed());
        assert!(!h.client.is_connected(Protocol::File));
        assert_eq!(h.core.attempt_count(), 2);

        let fresh = h.core.last_attempt().accept();
        settle().await;
        assert!(!fresh.is_closed());
        assert!(h.client.is_connected(Protocol::File));
        assert_eq!(h.client.conn_id(Protocol::File), Some(ConnId(2)));
        assert_eq!(h.client.live_connections(), 1);

        let (trans, mut reply) = echo(Protocol::File);
        let id = h.client.send(trans);
        assert_eq!(fresh.take_frames()[0].trans_id(), id);
        fresh.push(MsgHeader::new(50, id), b"ok");
        settle().await;
        assert_eq!(reply.try_take(), Some(Ok(b"ok".to_vec())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_address_rejected() {
        let h = harness(NetConfig::default());
        h.client.initialize(Protocol::File).unwrap();
        assert!(matches!(
            h.client.start_connect(Protocol::File, "  "),
            Err(ClientError::EmptyAddress(Protocol::File))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_waits_for_drivers() {
        let h = harness(NetConfig::default());
        let _server = connect(&h, Protocol::GateKeeper).await;
        let live = h.client.shared.live.clone();
        h.client.shutdown().await;
        assert_eq!(live.load(Ordering::SeqCst), 0);
    }
}
