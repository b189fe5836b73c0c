//! # Ngl client networking
//!
//! Client side of a game's networking layer: cancellable, timeout-aware
//! request/response **transactions** multiplexed over one persistent,
//! auto-reconnecting connection per server role.
//!
//! - **Roles**: Auth, Game, File and GateKeeper, each with its own
//!   connection, reconnect policy and keep-alive ping
//! - **Transactions**: correlated by a 32-bit id, routed back to their owner,
//!   completed exactly once with a success or error code
//! - **Cancellation**: by transaction id, by connection, by role, or all
//! - **Reconnect**: bounded backoff, give-up thresholds reported once through
//!   a global error callback
//!
//! ## Modules
//!
//! - [`core`]: constants, configuration, ids and error types
//! - [`wire`]: frame codec, payload helpers and the connect handshake
//! - [`transport`]: socket boundary and the tokio TCP implementation
//! - [`conn`]: connection objects, reconnect and ping state machines
//! - [`trans`]: the transaction trait and the transaction table
//! - [`client`]: the [`NetClient`] context and per-role drivers
//! - [`protocols`]: typed requests for the individual roles
//!
//! ## Example
//!
//! ```no_run
//! use ngl_client::prelude::*;
//!
//! # async fn run() -> Result<(), ClientError> {
//! let (client, mut notifications) = NetClient::builder().build()?;
//!
//! client.initialize(Protocol::File)?;
//! client.start_connect(Protocol::File, "files.example.net")?;
//!
//! match client.file_build_id().await {
//!     Ok(build) => println!("server build {build}"),
//!     Err(e) => eprintln!("build id request failed: {e}"),
//! }
//!
//! while let Ok(note) = notifications.try_recv() {
//!     if let Some(Ok(build)) = parse_build_id_update(&note) {
//!         println!("new build {build}");
//!     }
//! }
//!
//! client.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod core;

pub mod wire;

pub mod transport;

pub mod conn;

pub mod trans;

pub mod client;

pub mod protocols;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::client::{NetClient, NetClientBuilder, Notification, NotificationReceiver};
    pub use crate::core::{
        ClientError, ConnId, NetConfig, NetConfigBuilder, NetError, NetResult, Protocol, TransId,
    };
    pub use crate::protocols::{PingReply, parse_build_id_update};
    pub use crate::trans::{Completion, NetTrans, NotifyTrans, PendingReply, TransCtx};
}

pub use client::{NetClient, NetClientBuilder, Notification};
pub use core::{ClientError, NetConfig, NetError, NetResult, Protocol, TransId};
