//! Error types for the Ngl client layer.

use std::io;

use thiserror::Error;

use super::types::Protocol;

/// Result code carried by every completed transaction.
///
/// This is the value handed to [`NetTrans::post`](crate::trans::NetTrans::post)
/// and to the global error callback. It is `Copy` so one code can be fanned
/// out to many transactions during bulk cancellation.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetError {
    /// The server could not be reached at all.
    #[error("connect failed")]
    ConnectFailed,

    /// The socket dropped while the exchange was outstanding.
    #[error("disconnected")]
    Disconnected,

    /// No reply arrived before the transaction's deadline.
    #[error("timed out")]
    TimedOut,

    /// A reply was malformed or semantically invalid.
    #[error("protocol error")]
    ProtocolError,

    /// Aborted by the caller or by the system.
    #[error("cancelled")]
    Cancelled,

    /// The protocol role was torn down while the transaction was live.
    #[error("remote shutdown")]
    RemoteShutdown,

    /// There was no usable connection to send on.
    #[error("not connected")]
    NotConnected,

    /// The server answered with a failure code.
    #[error("server returned error code {0}")]
    Remote(u32),
}

/// Result alias for transaction outcomes.
pub type NetResult<T> = Result<T, NetError>;

/// Errors raised while framing or parsing wire data.
#[derive(Debug, Error)]
pub enum WireError {
    /// Not enough bytes for the field being read.
    #[error("truncated: expected {expected} bytes, got {actual}")]
    Truncated {
        /// Bytes required.
        expected: usize,
        /// Bytes available.
        actual: usize,
    },

    /// Declared frame length is shorter than the header.
    #[error("frame too small: {0} bytes")]
    FrameTooSmall(usize),

    /// Declared frame length exceeds the configured maximum.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge {
        /// Declared size.
        size: usize,
        /// Accepted maximum.
        max: usize,
    },

    /// A string field was not valid UTF-8.
    #[error("invalid utf-8 in string field")]
    InvalidString,

    /// I/O error surfaced through the codec traits.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

impl From<WireError> for NetError {
    fn from(_: WireError) -> Self {
        NetError::ProtocolError
    }
}

/// Errors from client construction and role lifecycle.
#[derive(Debug, Error)]
pub enum ClientError {
    /// No tokio runtime was available to spawn connection drivers on.
    #[error("no tokio runtime available")]
    NoRuntime,

    /// The configuration failed validation.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// The protocol role has not been initialized (or was destroyed).
    #[error("{0} is not initialized")]
    NotInitialized(Protocol),

    /// The server address was empty.
    #[error("empty server address for {0}")]
    EmptyAddress(Protocol),
}
