//! Inbound frame routing.
//!
//! Frames with a non-zero trans id belong to the transaction table. Trans id
//! zero is unsolicited: keep-alive pongs, the register reply, and server
//! pushes that go to the application's notification channel.

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::conn::Connection;
use crate::core::{ConnId, Protocol};
use crate::trans::{RecvOutcome, TransTable};
use crate::wire::{Frame, PingPayload, RegisterReply, msg};

/// Unsolicited message pushed by a server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Role that sent it.
    pub protocol: Protocol,
    /// Connection it arrived on.
    pub conn_id: ConnId,
    /// Message id within the role's catalog.
    pub msg_id: u16,
    /// Raw payload.
    pub payload: Bytes,
}

/// Receiving end of the notification channel.
pub type NotificationReceiver = mpsc::UnboundedReceiver<Notification>;

/// What the driver must do after a frame was routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Routed {
    Handled,
    Register(RegisterReply),
    Drop,
}

pub(crate) fn route(
    table: &TransTable,
    notifications: &mpsc::UnboundedSender<Notification>,
    conn: &Connection,
    frame: Frame,
    now: Instant,
) -> Routed {
    if !frame.trans_id().is_unsolicited() {
        return match table.recv_at(conn.id(), &frame, now) {
            RecvOutcome::Drop => Routed::Drop,
            RecvOutcome::Handled | RecvOutcome::Unknown => Routed::Handled,
        };
    }

    match frame.msg_id() {
        msg::PING => match PingPayload::from_payload(&frame.payload) {
            Ok(ping) => {
                conn.on_pong(&ping, now);
                Routed::Handled
            }
            Err(e) => {
                tracing::warn!(protocol = %conn.protocol(), conn_id = %conn.id(), error = %e, "malformed pong");
                Routed::Drop
            }
        },
        msg::REGISTER if conn.protocol().requires_register() => {
            match RegisterReply::from_payload(&frame.payload) {
                Ok(reply) => Routed::Register(reply),
                Err(e) => {
                    tracing::warn!(protocol = %conn.protocol(), conn_id = %conn.id(), error = %e, "malformed register reply");
                    Routed::Drop
                }
            }
        }
        msg_id => {
            tracing::trace!(protocol = %conn.protocol(), conn_id = %conn.id(), msg_id, "server notification");
            let _ = notifications.send(Notification {
                protocol: conn.protocol(),
                conn_id: conn.id(),
                msg_id,
                payload: frame.payload,
            });
            Routed::Handled
        }
    }
}
