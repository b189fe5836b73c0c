//! Registry of live transactions.
//!
//! A transaction is checked out of its entry while one of its hooks runs and
//! the table lock is never held across a hook or a completion. Hooks may
//! therefore submit, route to or cancel any transaction, their own included.
//! Replies that arrive while their transaction is checked out are queued on
//! the entry and replayed once it is checked back in. Connection sources and
//! connections are only called with the table unlocked.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use super::trans::{NetTrans, TransCtx};
use crate::conn::Connection;
use crate::core::{ConnId, NetError, NetResult, Protocol, TransId, TransState, TransType};
use crate::wire::Frame;

/// Supplies the usable connection for a role, if there is one.
pub trait ConnectionSource {
    /// Current ready connection for `protocol`.
    fn active_connection(&self, protocol: Protocol) -> Option<Arc<Connection>>;
}

/// Result of routing a reply to the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvOutcome {
    /// Delivered to its transaction.
    Handled,
    /// No live transaction owns this id on this connection.
    Unknown,
    /// The transaction rejected the data; drop the connection.
    Drop,
}

/// Per-sweep counters returned by [`TransTable::update_at`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateStats {
    /// Transactions that started this sweep.
    pub started: usize,
    /// Transactions that timed out.
    pub timed_out: usize,
    /// Transactions whose deadline was extended.
    pub extended: usize,
    /// Transactions posted.
    pub posted: usize,
}

struct Entry {
    /// `None` while a hook runs.
    trans: Option<Box<dyn NetTrans>>,
    protocol: Protocol,
    trans_type: TransType,
    notify: bool,
    state: TransState,
    conn: Option<Arc<Connection>>,
    timeout: Duration,
    deadline: Instant,
    result: Option<NetResult<()>>,
    deferred: Vec<Frame>,
    /// Completed by a cancel while checked out; post on check-in.
    flush: bool,
}

impl Entry {
    fn new(trans: Box<dyn NetTrans>, default_timeout: Duration, now: Instant) -> Self {
        let timeout = trans.timeout().unwrap_or(default_timeout);
        Self {
            protocol: trans.protocol(),
            trans_type: trans.trans_type(),
            notify: trans.is_notify(),
            state: TransState::WaitServerConnect,
            conn: None,
            timeout,
            deadline: now + timeout,
            result: None,
            deferred: Vec::new(),
            flush: false,
            trans: Some(trans),
        }
    }

    fn conn_id(&self) -> Option<ConnId> {
        self.conn.as_ref().map(|conn| conn.id())
    }

    fn is_checked_out(&self) -> bool {
        self.trans.is_none()
    }

    fn finish(&mut self, result: NetResult<()>) {
        if self.state != TransState::Complete {
            self.state = TransState::Complete;
            self.result = Some(result);
        }
    }

    fn into_posting(self, id: TransId) -> Option<Posting> {
        let trans = self.trans?;
        Some(Posting {
            id,
            trans,
            protocol: self.protocol,
            trans_type: self.trans_type,
            result: self.result.unwrap_or(Err(NetError::Cancelled)),
        })
    }
}

/// A completed transaction waiting to be posted outside the lock.
struct Posting {
    id: TransId,
    trans: Box<dyn NetTrans>,
    protocol: Protocol,
    trans_type: TransType,
    result: NetResult<()>,
}

impl Posting {
    fn orphan(id: TransId, trans: Box<dyn NetTrans>) -> Self {
        Self {
            id,
            protocol: trans.protocol(),
            trans_type: trans.trans_type(),
            trans,
            result: Err(NetError::Cancelled),
        }
    }

    fn post(self) {
        tracing::debug!(
            trans_id = %self.id,
            trans_type = self.trans_type,
            protocol = %self.protocol,
            result = ?self.result,
            "transaction complete"
        );
        self.trans.post(self.result);
    }
}

/// Work collected under the lock and carried out after it is released.
#[derive(Default)]
struct Settled {
    done: Vec<Posting>,
    replay: Vec<(Arc<Connection>, Frame)>,
}

enum Claim {
    Unknown,
    Deferred,
    Ready(Box<dyn NetTrans>, Arc<Connection>),
}

struct TableInner {
    entries: HashMap<TransId, Entry>,
    next_id: u32,
}

impl TableInner {
    fn alloc_id(&mut self) -> TransId {
        loop {
            self.next_id = self.next_id.wrapping_add(1);
            let id = TransId(self.next_id);
            if !id.is_unsolicited() && !self.entries.contains_key(&id) {
                return id;
            }
        }
    }

    fn checkout_waiting(&mut self, id: TransId) -> Option<Box<dyn NetTrans>> {
        self.entries
            .get_mut(&id)
            .filter(|e| e.state == TransState::WaitServerConnect)
            .and_then(|e| e.trans.take())
    }

    fn checkout_overdue(&mut self, id: TransId, now: Instant) -> Option<Box<dyn NetTrans>> {
        self.entries
            .get_mut(&id)
            .filter(|e| e.state != TransState::Complete && now >= e.deadline)
            .and_then(|e| e.trans.take())
    }

    /// Check out the owner of a reply, or queue the reply if the owner is
    /// already checked out.
    fn claim(&mut self, id: TransId, conn_id: ConnId, frame: &Frame) -> Claim {
        let Some(entry) = self.entries.get_mut(&id).filter(|e| {
            e.state == TransState::WaitServerResponse && e.conn_id() == Some(conn_id)
        }) else {
            return Claim::Unknown;
        };
        let Some(conn) = entry.conn.clone() else {
            return Claim::Unknown;
        };
        match entry.trans.take() {
            Some(trans) => Claim::Ready(trans, conn),
            None => {
                entry.deferred.push(frame.clone());
                Claim::Deferred
            }
        }
    }

    /// Move a waiting entry to its connection. `false` if it was completed
    /// while checked out.
    fn bind(&mut self, id: TransId, conn: &Arc<Connection>) -> bool {
        match self.entries.get_mut(&id) {
            Some(entry) if entry.state == TransState::WaitServerConnect => {
                entry.state = TransState::WaitServerResponse;
                entry.conn = Some(conn.clone());
                true
            }
            _ => false,
        }
    }

    /// Return a checked-out transaction and apply its hook's effect.
    ///
    /// Completed notify transactions stay until the next update unless
    /// `flush_notify` is set.
    fn checkin(
        &mut self,
        id: TransId,
        trans: Box<dyn NetTrans>,
        flush_notify: bool,
        settled: &mut Settled,
        apply: impl FnOnce(&mut Entry),
    ) {
        let Some(entry) = self.entries.get_mut(&id) else {
            settled.done.push(Posting::orphan(id, trans));
            return;
        };
        entry.trans = Some(trans);
        apply(entry);

        if entry.state != TransState::Complete {
            if let Some(conn) = entry.conn.clone() {
                settled
                    .replay
                    .extend(entry.deferred.drain(..).map(|frame| (conn.clone(), frame)));
            }
            return;
        }

        entry.deferred.clear();
        if flush_notify || entry.flush || !entry.notify {
            if let Some(posting) = self.entries.remove(&id).and_then(|e| e.into_posting(id)) {
                settled.done.push(posting);
            }
        }
    }

    fn take_complete(&mut self, id: TransId) -> Option<Posting> {
        let complete = self
            .entries
            .get(&id)
            .is_some_and(|e| e.state == TransState::Complete && !e.is_checked_out());
        if !complete {
            return None;
        }
        self.entries.remove(&id).and_then(|e| e.into_posting(id))
    }

    /// Complete one entry with `error`. A checked-out entry is marked and
    /// posted when its hook returns.
    fn drain_entry(&mut self, id: TransId, error: NetError, done: &mut Vec<Posting>) -> usize {
        let Some(entry) = self.entries.get_mut(&id) else {
            return 0;
        };
        if entry.is_checked_out() {
            if entry.state == TransState::Complete {
                return 0;
            }
            entry.finish(Err(error));
            entry.flush = true;
            return 1;
        }
        entry.finish(Err(error));
        match self.entries.remove(&id).and_then(|e| e.into_posting(id)) {
            Some(posting) => {
                done.push(posting);
                1
            }
            None => 0,
        }
    }

    /// Complete every non-complete entry matching `pred`, along with
    /// already-complete entries when `flush_complete` is set. Returns the
    /// number of transactions completed, checked-out ones included.
    fn drain_matching(
        &mut self,
        error: NetError,
        flush_complete: bool,
        pred: impl Fn(&Entry) -> bool,
        done: &mut Vec<Posting>,
    ) -> usize {
        let ids: Vec<TransId> = self
            .entries
            .iter()
            .filter(|(_, e)| pred(e) && (flush_complete || e.state != TransState::Complete))
            .map(|(id, _)| *id)
            .collect();

        let mut count = 0;
        for id in ids {
            count += self.drain_entry(id, error, done);
        }
        count
    }

    fn drain_one(&mut self, id: TransId, error: NetError, done: &mut Vec<Posting>) -> usize {
        let outstanding = self
            .entries
            .get(&id)
            .is_some_and(|e| e.state != TransState::Complete);
        if !outstanding {
            return 0;
        }
        self.drain_entry(id, error, done)
    }
}

fn post_all(mut done: Vec<Posting>) -> usize {
    done.sort_by_key(|posting| posting.id);
    let count = done.len();
    for posting in done {
        posting.post();
    }
    count
}

/// Live transactions keyed by trans id.
pub struct TransTable {
    inner: Mutex<TableInner>,
    default_timeout: Duration,
}

impl TransTable {
    /// Create an empty table whose transactions expire after `default_timeout`
    /// unless they override it.
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(TableInner {
                entries: HashMap::new(),
                next_id: 0,
            }),
            default_timeout,
        }
    }

    /// Number of transactions in the table, including completed notify
    /// transactions waiting to be posted.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// State of a transaction still in the table.
    pub fn state(&self, id: TransId) -> Option<TransState> {
        self.inner.lock().entries.get(&id).map(|e| e.state)
    }

    /// Connection a transaction is bound to.
    pub fn bound_conn(&self, id: TransId) -> Option<ConnId> {
        self.inner.lock().entries.get(&id).and_then(Entry::conn_id)
    }

    /// Submit a transaction.
    pub fn send(&self, trans: Box<dyn NetTrans>, source: &dyn ConnectionSource) -> TransId {
        self.send_at(trans, source, Instant::now())
    }

    /// Submit a transaction at `now`.
    ///
    /// The transaction starts immediately if its role has a ready connection,
    /// otherwise on a later [`update`](Self::update). A request that fails to
    /// send is posted before this returns.
    pub fn send_at(
        &self,
        trans: Box<dyn NetTrans>,
        source: &dyn ConnectionSource,
        now: Instant,
    ) -> TransId {
        let entry = Entry::new(trans, self.default_timeout, now);
        let (protocol, trans_type) = (entry.protocol, entry.trans_type);
        let id = {
            let mut inner = self.inner.lock();
            let id = inner.alloc_id();
            inner.entries.insert(id, entry);
            id
        };
        tracing::debug!(trans_id = %id, trans_type, protocol = %protocol, "transaction submitted");

        let mut settled = Settled::default();
        self.start(id, source, now, false, &mut settled);
        self.settle(settled, now);
        id
    }

    /// Start a waiting transaction if its connection is available.
    fn start(
        &self,
        id: TransId,
        source: &dyn ConnectionSource,
        now: Instant,
        flush_notify: bool,
        settled: &mut Settled,
    ) -> bool {
        let checked_out = self.inner.lock().checkout_waiting(id);
        let Some(mut trans) = checked_out else {
            return false;
        };
        let conn = source.active_connection(trans.protocol());

        if trans.is_notify() {
            let mut ctx = TransCtx::new(TransId::UNSOLICITED, conn.as_deref(), now);
            let sent = trans.send(&mut ctx);
            let result = ctx
                .take_outcome()
                .unwrap_or(if sent { Ok(()) } else { Err(NetError::NotConnected) });
            self.inner.lock().checkin(id, trans, flush_notify, settled, |entry| {
                entry.conn = conn;
                entry.finish(result);
            });
            return true;
        }

        let conn = match conn {
            Some(conn) if trans.can_start(&conn) => conn,
            _ => {
                self.inner.lock().checkin(id, trans, flush_notify, settled, |_| {});
                return false;
            }
        };

        // A reply racing the send must find the entry bound.
        let bound = self.inner.lock().bind(id, &conn);
        if !bound {
            self.inner.lock().checkin(id, trans, flush_notify, settled, |_| {});
            return false;
        }

        let mut ctx = TransCtx::new(id, Some(&*conn), now);
        let sent = trans.send(&mut ctx);
        let outcome = ctx.take_outcome();
        let trans_type = trans.trans_type();
        self.inner.lock().checkin(id, trans, flush_notify, settled, |entry| {
            if !sent {
                entry.finish(outcome.unwrap_or(Err(NetError::NotConnected)));
            } else if let Some(result) = outcome {
                entry.finish(result);
            }
        });

        tracing::debug!(
            trans_id = %id,
            trans_type,
            protocol = %conn.protocol(),
            conn_id = %conn.id(),
            sent,
            "transaction started"
        );
        true
    }

    /// Post completed transactions, then replay replies that were queued
    /// while their owner was checked out.
    fn settle(&self, settled: Settled, now: Instant) -> usize {
        let posted = post_all(settled.done);
        for (conn, frame) in settled.replay {
            if self.recv_at(conn.id(), &frame, now) == RecvOutcome::Drop {
                tracing::debug!(conn_id = %conn.id(), trans_id = %frame.trans_id(), "queued reply rejected");
                conn.abandon();
            }
        }
        posted
    }

    /// Route a reply that arrived on `conn_id`.
    pub fn recv(&self, conn_id: ConnId, frame: &Frame) -> RecvOutcome {
        self.recv_at(conn_id, frame, Instant::now())
    }

    /// Route a reply that arrived on `conn_id` at `now`.
    pub fn recv_at(&self, conn_id: ConnId, frame: &Frame, now: Instant) -> RecvOutcome {
        let id = frame.trans_id();
        let claim = self.inner.lock().claim(id, conn_id, frame);
        let (mut trans, conn) = match claim {
            Claim::Unknown => {
                tracing::debug!(trans_id = %id, conn_id = %conn_id, msg_id = frame.msg_id(), "reply for unknown transaction");
                return RecvOutcome::Unknown;
            }
            Claim::Deferred => return RecvOutcome::Handled,
            Claim::Ready(trans, conn) => (trans, conn),
        };

        let mut ctx = TransCtx::new(id, Some(&*conn), now);
        let ok = trans.recv(frame, &mut ctx);
        let outcome = ctx.take_outcome();

        let mut settled = Settled::default();
        self.inner.lock().checkin(id, trans, true, &mut settled, |entry| {
            if let Some(result) = outcome {
                entry.finish(result);
            } else if !ok {
                entry.finish(Err(NetError::ProtocolError));
            }
        });
        self.settle(settled, now);

        if ok { RecvOutcome::Handled } else { RecvOutcome::Drop }
    }

    /// Complete one transaction with `error`. Returns `false` if it was not
    /// outstanding.
    pub fn cancel(&self, id: TransId, error: NetError) -> bool {
        let mut done = Vec::new();
        let count = self.inner.lock().drain_one(id, error, &mut done);
        post_all(done);
        count > 0
    }

    /// Complete every transaction for `protocol` with `error`.
    pub fn cancel_by_protocol(&self, protocol: Protocol, error: NetError) -> usize {
        let mut done = Vec::new();
        let count = self
            .inner
            .lock()
            .drain_matching(error, true, |e| e.protocol == protocol, &mut done);
        post_all(done);
        count
    }

    /// Complete every outstanding transaction bound to `conn_id` with `error`.
    pub fn cancel_by_conn_id(&self, conn_id: ConnId, error: NetError) -> usize {
        let mut done = Vec::new();
        let count = self
            .inner
            .lock()
            .drain_matching(error, false, |e| e.conn_id() == Some(conn_id), &mut done);
        post_all(done);
        count
    }

    /// Complete every transaction with `error`.
    pub fn cancel_all(&self, error: NetError) -> usize {
        let mut done = Vec::new();
        let count = self.inner.lock().drain_matching(error, true, |_| true, &mut done);
        post_all(done);
        count
    }

    /// Periodic sweep.
    pub fn update(&self, source: &dyn ConnectionSource) -> UpdateStats {
        self.update_at(Instant::now(), source)
    }

    /// Periodic sweep at `now`: expire overdue transactions, start waiting
    /// ones whose connection became available, and post everything complete.
    pub fn update_at(&self, now: Instant, source: &dyn ConnectionSource) -> UpdateStats {
        let mut stats = UpdateStats::default();
        let mut settled = Settled::default();
        let mut ids: Vec<TransId> = self.inner.lock().entries.keys().copied().collect();
        ids.sort();

        for id in ids {
            self.expire(id, now, &mut stats, &mut settled);
            if self.start(id, source, now, true, &mut settled) {
                stats.started += 1;
            }
            if let Some(posting) = self.inner.lock().take_complete(id) {
                settled.done.push(posting);
            }
        }

        stats.posted = self.settle(settled, now);
        stats
    }

    fn expire(&self, id: TransId, now: Instant, stats: &mut UpdateStats, settled: &mut Settled) {
        let checked_out = self.inner.lock().checkout_overdue(id, now);
        let Some(mut trans) = checked_out else {
            return;
        };
        let expired = trans.timed_out();
        let trans_type = trans.trans_type();
        self.inner.lock().checkin(id, trans, true, settled, |entry| {
            if expired {
                entry.finish(Err(NetError::TimedOut));
            } else {
                entry.deadline = now + entry.timeout;
            }
        });

        if expired {
            stats.timed_out += 1;
            tracing::debug!(trans_id = %id, trans_type, "transaction timed out");
        } else {
            stats.extended += 1;
        }
    }
}

impl Drop for TransTable {
    fn drop(&mut self) {
        let mut done = Vec::new();
        self.inner
            .get_mut()
            .drain_matching(NetError::Cancelled, true, |_| true, &mut done);
        post_all(done);
    }
}
