//! In-memory socket core for tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio_util::codec::Decoder;
use tokio_util::sync::CancellationToken;

use super::socket::{SocketCore, SocketEvent, SocketHandle, SocketNotify};
use crate::wire::{Frame, FrameCodec, MsgHeader, encode_message};

/// One recorded connect attempt.
#[derive(Clone)]
pub(crate) struct MockAttempt {
    pub addr: String,
    pub preamble: Vec<u8>,
    pub token: CancellationToken,
    notify: Arc<dyn SocketNotify>,
}

impl MockAttempt {
    /// Open the connection and return the server side of it.
    pub fn accept(&self) -> Arc<MockHandle> {
        let handle = Arc::new(MockHandle {
            sent: Mutex::new(BytesMut::new()),
            closed: AtomicBool::new(false),
            notify: self.notify.clone(),
        });
        self.notify.notify(SocketEvent::Connected(handle.clone()));
        handle
    }

    /// Fail the attempt.
    pub fn fail(&self) {
        self.notify.notify(SocketEvent::ConnectFailed("refused".into()));
    }
}

/// Test-controlled socket core.
#[derive(Default)]
pub(crate) struct MockSocketCore {
    attempts: Mutex<Vec<MockAttempt>>,
}

impl MockSocketCore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.lock().len()
    }

    pub fn attempt(&self, index: usize) -> MockAttempt {
        self.attempts.lock()[index].clone()
    }

    pub fn last_attempt(&self) -> MockAttempt {
        let attempts = self.attempts.lock();
        attempts[attempts.len() - 1].clone()
    }
}

impl SocketCore for MockSocketCore {
    fn connect(
        &self,
        addr: &str,
        preamble: Vec<u8>,
        notify: Arc<dyn SocketNotify>,
    ) -> CancellationToken {
        let token = CancellationToken::new();
        self.attempts.lock().push(MockAttempt {
            addr: addr.to_string(),
            preamble,
            token: token.clone(),
            notify,
        });
        token
    }
}

/// Server side of a mock connection.
pub(crate) struct MockHandle {
    sent: Mutex<BytesMut>,
    closed: AtomicBool,
    notify: Arc<dyn SocketNotify>,
}

impl MockHandle {
    /// Drain every complete frame the client has sent so far.
    pub fn take_frames(&self) -> Vec<Frame> {
        let mut sent = self.sent.lock();
        let mut codec = FrameCodec::default();
        let mut frames = Vec::new();
        while let Ok(Some(frame)) = codec.decode(&mut sent) {
            frames.push(frame);
        }
        frames
    }

    /// Deliver a framed message to the client.
    pub fn push(&self, header: MsgHeader, payload: &[u8]) {
        let mut buf = BytesMut::new();
        encode_message(header, payload, &mut buf);
        self.push_raw(buf.freeze());
    }

    /// Deliver raw bytes to the client.
    pub fn push_raw(&self, bytes: Bytes) {
        self.notify.notify(SocketEvent::Read(bytes));
    }

    /// Close from the server side.
    pub fn drop_remote(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.notify.notify(SocketEvent::Disconnected);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl SocketHandle for MockHandle {
    fn send(&self, data: &[u8]) -> bool {
        if self.is_closed() {
            return false;
        }
        self.sent.lock().extend_from_slice(data);
        true
    }

    fn disconnect(&self) {
        self.drop_remote();
    }
}
