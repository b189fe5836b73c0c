//! Async socket core boundary.
//!
//! The transaction layer never touches sockets directly. A [`SocketCore`]
//! opens byte-stream connections and reports everything that happens on them
//! through a [`SocketNotify`] callback; the live connection is driven through
//! a [`SocketHandle`].

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;

/// Event reported by a socket core for one connect attempt.
pub enum SocketEvent {
    /// The connection is open and the preamble has been written.
    Connected(Arc<dyn SocketHandle>),
    /// The attempt failed before the connection opened.
    ConnectFailed(String),
    /// Bytes arrived. Frame boundaries are not preserved.
    Read(Bytes),
    /// The connection closed. Reported at most once, and only after `Connected`.
    Disconnected,
}

impl fmt::Debug for SocketEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocketEvent::Connected(_) => f.write_str("Connected"),
            SocketEvent::ConnectFailed(reason) => f.debug_tuple("ConnectFailed").field(reason).finish(),
            SocketEvent::Read(bytes) => write!(f, "Read({} bytes)", bytes.len()),
            SocketEvent::Disconnected => f.write_str("Disconnected"),
        }
    }
}

/// Callback interface implemented by the connection layer.
///
/// Called from socket core tasks; implementations must not block.
pub trait SocketNotify: Send + Sync {
    /// Deliver one event.
    fn notify(&self, event: SocketEvent);
}

/// An open connection.
pub trait SocketHandle: Send + Sync {
    /// Queue bytes for sending. Returns `false` if the connection is gone.
    fn send(&self, data: &[u8]) -> bool;

    /// Close the connection. `Disconnected` follows asynchronously.
    fn disconnect(&self);
}

/// Opens connections.
pub trait SocketCore: Send + Sync {
    /// Start connecting to `addr`; `preamble` is written before any other
    /// bytes once the connection opens.
    ///
    /// Cancelling the returned token aborts a pending attempt (no event is
    /// reported) or closes an open connection.
    fn connect(
        &self,
        addr: &str,
        preamble: Vec<u8>,
        notify: Arc<dyn SocketNotify>,
    ) -> CancellationToken;
}
