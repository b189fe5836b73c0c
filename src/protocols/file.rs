//! File server requests: build id, chunked downloads, build id pushes.

use super::{ReplyTrans, read_result};
use crate::client::{NetClient, Notification};
use crate::core::{NetError, NetResult, Protocol, TransType, WireError};
use crate::trans::{Completion, NetTrans, PendingReply, TransCtx};
use crate::wire::{Frame, PayloadReader, PayloadWriter};

/// File server message catalog.
pub mod file_msg {
    /// Build id request / reply.
    pub const BUILD_ID: u16 = 2;
    /// Download request / chunk reply.
    pub const DOWNLOAD: u16 = 3;
    /// Acknowledge one download chunk.
    pub const CHUNK_ACK: u16 = 4;
    /// Pushed by the server when a new build goes live.
    pub const BUILD_ID_UPDATE: u16 = 5;
}

/// Parse a [`file_msg::BUILD_ID_UPDATE`] notification. Returns `None` for
/// any other notification.
pub fn parse_build_id_update(note: &Notification) -> Option<Result<u32, WireError>> {
    if note.protocol != Protocol::File || note.msg_id != file_msg::BUILD_ID_UPDATE {
        return None;
    }
    Some(PayloadReader::new(&note.payload).read_u32())
}

fn read_build_id(reader: &mut PayloadReader<'_>) -> Result<u32, WireError> {
    reader.read_u32()
}

/// Download of one file, delivered in acknowledged chunks.
///
/// Every chunk moves the deadline forward, so a slow but progressing transfer
/// never times out.
pub struct DownloadTrans {
    request: Vec<u8>,
    data: Vec<u8>,
    total: Option<u32>,
    progressed: bool,
    done: Option<Completion<Vec<u8>>>,
}

impl DownloadTrans {
    /// Download `filename` as of `build_id`.
    pub fn new(filename: &str, build_id: u32) -> (Self, PendingReply<Vec<u8>>) {
        let (done, reply) = Completion::channel();
        let request = PayloadWriter::new().u32(build_id).str(filename).finish();
        let trans = Self {
            request,
            data: Vec::new(),
            total: None,
            progressed: false,
            done: Some(done),
        };
        (trans, reply)
    }

    fn on_chunk(&mut self, frame: &Frame, ctx: &mut TransCtx<'_>) -> Result<(), WireError> {
        let mut r = PayloadReader::new(&frame.payload);
        let result = read_result(&mut r)?;
        let reader_id = r.read_u32()?;
        let total = r.read_u32()?;
        let offset = r.read_u32()?;
        let chunk = r.read_blob()?;

        let ack = PayloadWriter::new().u32(reader_id).finish();
        if !ctx.send(file_msg::CHUNK_ACK, &ack) {
            ctx.complete(Err(NetError::Disconnected));
            return Ok(());
        }
        if let Err(e) = result {
            ctx.complete(Err(e));
            return Ok(());
        }
        if offset as usize != self.data.len() || self.total.is_some_and(|t| t != total) {
            ctx.complete(Err(NetError::ProtocolError));
            return Ok(());
        }

        self.total = Some(total);
        self.progressed = true;
        self.data.extend_from_slice(chunk);
        tracing::trace!(trans_id = %ctx.trans_id(), received = self.data.len(), total, "download chunk");
        if self.data.len() >= total as usize {
            ctx.complete(Ok(()));
        }
        Ok(())
    }
}

impl NetTrans for DownloadTrans {
    fn protocol(&self) -> Protocol {
        Protocol::File
    }

    fn trans_type(&self) -> TransType {
        "file.download"
    }

    fn send(&mut self, ctx: &mut TransCtx<'_>) -> bool {
        ctx.send(file_msg::DOWNLOAD, &self.request)
    }

    fn recv(&mut self, frame: &Frame, ctx: &mut TransCtx<'_>) -> bool {
        match self.on_chunk(frame, ctx) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(trans_id = %ctx.trans_id(), error = %e, "malformed download chunk");
                false
            }
        }
    }

    fn timed_out(&mut self) -> bool {
        !std::mem::take(&mut self.progressed)
    }

    fn post(mut self: Box<Self>, result: NetResult<()>) {
        if let Some(done) = self.done.take() {
            done.complete(result.map(|()| std::mem::take(&mut self.data)));
        }
    }
}

impl NetClient {
    /// Ask the file server for the current build id.
    pub fn file_build_id(&self) -> PendingReply<u32> {
        let (trans, reply) = ReplyTrans::new(
            Protocol::File,
            "file.build_id",
            file_msg::BUILD_ID,
            Vec::new(),
            read_build_id,
        );
        self.send(trans);
        reply
    }

    /// Download `filename` from the file server.
    pub fn file_download(&self, filename: &str, build_id: u32) -> PendingReply<Vec<u8>> {
        let (trans, reply) = DownloadTrans::new(filename, build_id);
        self.send(trans);
        reply
    }
}
