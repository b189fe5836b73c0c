//! Wire framing contract.
//!
//! Every message starts with a fixed little-endian header carrying the
//! message id and a correlation id (`trans_id`). Replies are matched to
//! requests purely by `trans_id`; zero marks unsolicited traffic such as
//! keep-alive pings and server pushes.

mod frame;
mod handshake;
mod payload;

pub use frame::*;
pub use handshake::*;
pub use payload::*;
