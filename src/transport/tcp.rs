//! Tokio TCP socket core.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::socket::{SocketCore, SocketEvent, SocketHandle, SocketNotify};

/// Read buffer reserved per read call.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 16 * 1024;

/// [`SocketCore`] backed by tokio TCP streams.
///
/// Each connection runs one task that owns the read half and one writer
/// task fed by an unbounded queue, so [`SocketHandle::send`] never blocks.
/// Must be used from within a tokio runtime.
#[derive(Debug, Clone)]
pub struct TcpSocketCore {
    read_buffer_size: usize,
}

impl Default for TcpSocketCore {
    fn default() -> Self {
        Self::new()
    }
}

impl TcpSocketCore {
    /// Create a core with the default read buffer size.
    pub fn new() -> Self {
        Self {
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }

    /// Set the read buffer size.
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.max(1);
        self
    }
}

struct TcpHandle {
    tx: mpsc::UnboundedSender<Bytes>,
    token: CancellationToken,
}

impl SocketHandle for TcpHandle {
    fn send(&self, data: &[u8]) -> bool {
        !self.token.is_cancelled() && self.tx.send(Bytes::copy_from_slice(data)).is_ok()
    }

    fn disconnect(&self) {
        self.token.cancel();
    }
}

impl SocketCore for TcpSocketCore {
    fn connect(
        &self,
        addr: &str,
        preamble: Vec<u8>,
        notify: Arc<dyn SocketNotify>,
    ) -> CancellationToken {
        let token = CancellationToken::new();
        let task_token = token.clone();
        let addr = addr.to_string();
        let read_buffer_size = self.read_buffer_size;

        tokio::spawn(async move {
            let connected = tokio::select! {
                _ = task_token.cancelled() => return,
                res = TcpStream::connect(&addr) => res,
            };
            let stream = match connected {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::debug!(addr = %addr, error = %e, "tcp connect failed");
                    notify.notify(SocketEvent::ConnectFailed(e.to_string()));
                    return;
                }
            };
            if let Err(e) = stream.set_nodelay(true) {
                tracing::debug!(addr = %addr, error = %e, "set_nodelay failed");
            }

            let (mut reader, mut writer) = stream.into_split();
            if let Err(e) = writer.write_all(&preamble).await {
                notify.notify(SocketEvent::ConnectFailed(e.to_string()));
                return;
            }

            let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();
            notify.notify(SocketEvent::Connected(Arc::new(TcpHandle {
                tx,
                token: task_token.clone(),
            })));

            let writer_token = task_token.clone();
            let write_task = tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = writer_token.cancelled() => break,
                        msg = rx.recv() => match msg {
                            Some(bytes) => {
                                if writer.write_all(&bytes).await.is_err() {
                                    break;
                                }
                            }
                            None => break,
                        },
                    }
                }
                let _ = writer.shutdown().await;
                writer_token.cancel();
            });

            let mut buf = BytesMut::with_capacity(read_buffer_size);
            loop {
                buf.reserve(read_buffer_size);
                tokio::select! {
                    _ = task_token.cancelled() => break,
                    res = reader.read_buf(&mut buf) => match res {
                        Ok(0) => break,
                        Ok(_) => notify.notify(SocketEvent::Read(buf.split().freeze())),
                        Err(e) => {
                            tracing::debug!(addr = %addr, error = %e, "tcp read failed");
                            break;
                        }
                    },
                }
            }

            task_token.cancel();
            let _ = write_task.await;
            notify.notify(SocketEvent::Disconnected);
        });

        token
    }
}
