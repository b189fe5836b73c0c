//! Typed transactions for the individual server roles.
//!
//! Each role has a small message catalog. Message ids 0 and 1 are shared:
//! keep-alive ping and the register handshake.

mod file;
mod gatekeeper;
mod ping;
mod raw;

pub use file::*;
pub use gatekeeper::*;
pub use ping::*;
pub use raw::*;

use crate::core::{NetError, NetResult, Protocol, TransType, WireError};
use crate::trans::{Completion, NetTrans, PendingReply, TransCtx};
use crate::wire::{Frame, PayloadReader};

/// Read the leading result code of a reply: zero is success.
pub fn read_result(reader: &mut PayloadReader<'_>) -> Result<NetResult<()>, WireError> {
    Ok(match reader.read_u32()? {
        0 => Ok(()),
        code => Err(NetError::Remote(code)),
    })
}

type ParseFn<T> = fn(&mut PayloadReader<'_>) -> Result<T, WireError>;

/// Single request answered by a single reply that starts with a result code.
pub(crate) struct ReplyTrans<T> {
    protocol: Protocol,
    trans_type: TransType,
    msg_id: u16,
    payload: Vec<u8>,
    parse: ParseFn<T>,
    value: Option<T>,
    done: Option<Completion<T>>,
}

impl<T: Send + 'static> ReplyTrans<T> {
    pub fn new(
        protocol: Protocol,
        trans_type: TransType,
        msg_id: u16,
        payload: Vec<u8>,
        parse: ParseFn<T>,
    ) -> (Self, PendingReply<T>) {
        let (done, reply) = Completion::channel();
        let trans = Self {
            protocol,
            trans_type,
            msg_id,
            payload,
            parse,
            value: None,
            done: Some(done),
        };
        (trans, reply)
    }
}

impl<T: Send + 'static> NetTrans for ReplyTrans<T> {
    fn protocol(&self) -> Protocol {
        self.protocol
    }

    fn trans_type(&self) -> TransType {
        self.trans_type
    }

    fn send(&mut self, ctx: &mut TransCtx<'_>) -> bool {
        ctx.send(self.msg_id, &self.payload)
    }

    fn recv(&mut self, frame: &Frame, ctx: &mut TransCtx<'_>) -> bool {
        let mut reader = PayloadReader::new(&frame.payload);
        let parsed = read_result(&mut reader).and_then(|result| match result {
            Ok(()) => (self.parse)(&mut reader).map(Ok),
            Err(e) => Ok(Err(e)),
        });
        match parsed {
            Ok(Ok(value)) => {
                self.value = Some(value);
                ctx.complete(Ok(()));
                true
            }
            Ok(Err(e)) => {
                ctx.complete(Err(e));
                true
            }
            Err(e) => {
                tracing::warn!(trans_id = %ctx.trans_id(), trans_type = self.trans_type, error = %e, "malformed reply");
                false
            }
        }
    }

    fn post(mut self: Box<Self>, result: NetResult<()>) {
        let Some(done) = self.done.take() else {
            return;
        };
        let result = result.and_then(|()| self.value.take().ok_or(NetError::ProtocolError));
        done.complete(result);
    }
}
