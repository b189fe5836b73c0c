//! Client context: role drivers, inbound dispatch and the public API.

#[allow(clippy::module_inception)]
mod client;
mod dispatch;
mod driver;
mod module;
#[cfg(test)]
pub(crate) mod testing;

pub use client::{ErrorCallback, NetClient, NetClientBuilder};
pub use dispatch::{Notification, NotificationReceiver};
