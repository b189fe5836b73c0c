//! Transactions and the transaction table.
//!
//! A transaction is one request/response exchange correlated by its
//! [`TransId`](crate::core::TransId). The [`TransTable`] owns every live
//! transaction, starts it once its role has a ready connection, routes
//! replies to it, expires it, and cancels it singly or in bulk.

mod table;
#[allow(clippy::module_inception)]
mod trans;

pub use table::*;
pub use trans::*;
