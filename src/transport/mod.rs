//! Socket transport.
//!
//! - [`SocketCore`] / [`SocketNotify`] / [`SocketHandle`]: the boundary the
//!   connection layer is written against
//! - [`TcpSocketCore`]: tokio TCP implementation (requires `tcp` feature)

mod socket;

#[cfg(feature = "tcp")]
#[cfg_attr(docsrs, doc(cfg(feature = "tcp")))]
mod tcp;

#[cfg(test)]
pub(crate) mod mock;

pub use socket::*;

#[cfg(feature = "tcp")]
pub use tcp::*;
