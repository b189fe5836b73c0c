//! The transaction abstraction and its completion plumbing.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::conn::Connection;
use crate::core::{NetError, NetResult, Protocol, TransId, TransType};
use crate::wire::Frame;

/// One outstanding request/response exchange.
///
/// The table owns the transaction from submission until [`NetTrans::post`],
/// which consumes it and therefore runs exactly once. Hooks run without the
/// table lock and may submit or cancel transactions, this one included.
pub trait NetTrans: Send + 'static {
    /// Role the transaction talks to.
    fn protocol(&self) -> Protocol;

    /// Diagnostic tag.
    fn trans_type(&self) -> TransType;

    /// Fire-and-forget: completes as soon as it is sent, never waits for a
    /// reply, and is posted on the next table update.
    fn is_notify(&self) -> bool {
        false
    }

    /// Deadline override. `None` uses the table default.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// Whether the transaction may start on `conn`.
    fn can_start(&self, _conn: &Connection) -> bool {
        true
    }

    /// Serialize the request through `ctx`. `false` is an immediate local
    /// failure and completes the transaction with a network error.
    fn send(&mut self, ctx: &mut TransCtx<'_>) -> bool;

    /// Handle a reply carrying this transaction's id. Call
    /// [`TransCtx::complete`] when the exchange is finished. `false` means
    /// the data was malformed and the connection must be dropped.
    fn recv(&mut self, _frame: &Frame, _ctx: &mut TransCtx<'_>) -> bool {
        false
    }

    /// The deadline passed. `true` completes with a timeout; `false` resets
    /// the deadline and keeps the transaction outstanding.
    fn timed_out(&mut self) -> bool {
        true
    }

    /// Deliver the final result to the caller.
    fn post(self: Box<Self>, result: NetResult<()>);
}

/// What a transaction sees while sending or receiving.
pub struct TransCtx<'a> {
    trans_id: TransId,
    conn: Option<&'a Connection>,
    now: Instant,
    outcome: Option<NetResult<()>>,
}

impl<'a> TransCtx<'a> {
    pub(crate) fn new(trans_id: TransId, conn: Option<&'a Connection>, now: Instant) -> Self {
        Self {
            trans_id,
            conn,
            now,
            outcome: None,
        }
    }

    /// Id stamped on outgoing messages (zero for notify transactions).
    pub fn trans_id(&self) -> TransId {
        self.trans_id
    }

    /// Bound connection, if any.
    pub fn conn(&self) -> Option<&Connection> {
        self.conn
    }

    /// Current time.
    pub fn now(&self) -> Instant {
        self.now
    }

    /// Send one message on the bound connection.
    pub fn send(&self, msg_id: u16, payload: &[u8]) -> bool {
        match self.conn {
            Some(conn) => conn.send(msg_id, self.trans_id, payload).is_ok(),
            None => false,
        }
    }

    /// Finish the exchange with `result`. The first call wins.
    pub fn complete(&mut self, result: NetResult<()>) {
        if self.outcome.is_none() {
            self.outcome = Some(result);
        }
    }

    pub(crate) fn take_outcome(&mut self) -> Option<NetResult<()>> {
        self.outcome.take()
    }
}

/// Where a typed transaction delivers its result.
pub enum Completion<T> {
    /// Resolve a [`PendingReply`].
    Channel(oneshot::Sender<NetResult<T>>),
    /// Run a callback.
    Callback(Box<dyn FnOnce(NetResult<T>) + Send>),
}

impl<T: Send + 'static> Completion<T> {
    /// Completion paired with a future that resolves to the result.
    pub fn channel() -> (Self, PendingReply<T>) {
        let (tx, rx) = oneshot::channel();
        (Completion::Channel(tx), PendingReply { rx })
    }

    /// Completion that runs `f`.
    pub fn callback(f: impl FnOnce(NetResult<T>) + Send + 'static) -> Self {
        Completion::Callback(Box::new(f))
    }

    /// Deliver the result.
    pub fn complete(self, result: NetResult<T>) {
        match self {
            Completion::Channel(tx) => {
                let _ = tx.send(result);
            }
            Completion::Callback(f) => f(result),
        }
    }
}

/// Future resolving to a transaction's result.
///
/// If the transaction is dropped without being posted (e.g. the client is
/// torn down), resolves to [`NetError::Cancelled`].
#[derive(Debug)]
pub struct PendingReply<T> {
    rx: oneshot::Receiver<NetResult<T>>,
}

impl<T> PendingReply<T> {
    /// Take the result if it is already available.
    pub fn try_take(&mut self) -> Option<NetResult<T>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(NetError::Cancelled)),
        }
    }
}

impl<T> Future for PendingReply<T> {
    type Output = NetResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|res| res.unwrap_or(Err(NetError::Cancelled)))
    }
}

/// Fire-and-forget message.
pub struct NotifyTrans {
    protocol: Protocol,
    trans_type: TransType,
    msg_id: u16,
    payload: Vec<u8>,
    completion: Option<Completion<()>>,
}

impl NotifyTrans {
    /// Message `msg_id` with `payload` for `protocol`.
    pub fn new(protocol: Protocol, msg_id: u16, payload: Vec<u8>) -> Self {
        Self {
            protocol,
            trans_type: "notify",
            msg_id,
            payload,
            completion: None,
        }
    }

    /// Override the diagnostic tag.
    pub fn with_type(mut self, trans_type: TransType) -> Self {
        self.trans_type = trans_type;
        self
    }

    /// Be told whether the message went out.
    pub fn with_completion(mut self, completion: Completion<()>) -> Self {
        self.completion = Some(completion);
        self
    }
}

impl NetTrans for NotifyTrans {
    fn protocol(&self) -> Protocol {
        self.protocol
    }

    fn trans_type(&self) -> TransType {
        self.trans_type
    }

    fn is_notify(&self) -> bool {
        true
    }

    fn send(&mut self, ctx: &mut TransCtx<'_>) -> bool {
        ctx.send(self.msg_id, &self.payload)
    }

    fn post(self: Box<Self>, result: NetResult<()>) {
        if let Some(completion) = self.completion {
            completion.complete(result);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn test_pending_reply_resolves() {
        let (completion, reply) = Completion::<u32>::channel();
        completion.complete(Ok(7));
        assert_eq!(reply.await, Ok(7));
    }

    #[tokio::test]
    async fn test_pending_reply_dropped_completion_is_cancelled() {
        let (completion, reply) = Completion::<u32>::channel();
        drop(completion);
        assert_eq!(reply.await, Err(NetError::Cancelled));
    }

    #[test]
    fn test_try_take() {
        let (completion, mut reply) = Completion::<u32>::channel();
        assert_eq!(reply.try_take(), None);
        completion.complete(Err(NetError::TimedOut));
        assert_eq!(reply.try_take(), Some(Err(NetError::TimedOut)));
    }

    #[test]
    fn test_callback_completion() {
        let seen = Arc::new(parking_lot::Mutex::new(None));
        let sink = seen.clone();
        Completion::callback(move |r: NetResult<u8>| *sink.lock() = Some(r)).complete(Ok(3));
        assert_eq!(*seen.lock(), Some(Ok(3)));
    }

    #[test]
    fn test_ctx_first_completion_wins() {
        let mut ctx = TransCtx::new(TransId(1), None, Instant::now());
        assert!(!ctx.send(1, b""));
        ctx.complete(Ok(()));
        ctx.complete(Err(NetError::Cancelled));
        assert_eq!(ctx.take_outcome(), Some(Ok(())));
    }
}
