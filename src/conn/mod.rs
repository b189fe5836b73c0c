//! Connection objects and the state machines that keep them alive.
//!
//! - [`Connection`]: one socket session, shared as `Arc`
//! - [`ReconnectState`]: backoff and give-up bookkeeping across sessions
//! - [`PingState`]: keep-alive timer and dead-connection detection

mod connection;
mod ping;
mod reconnect;

pub use connection::*;
pub use ping::*;
pub use reconnect::*;
