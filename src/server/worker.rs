//! Per-connection worker
//!
//! Reads newline-delimited JSON requests off one socket, dispatches
//! them strictly in order and writes one response line per request.
//! Request-level failures become error responses; only transport-level
//! failures end the connection.

use super::ServerShared;
use crate::invoke::{self, InvokeOutcome};
use crate::registry::HandlerRegistry;
use anyhow::Result;
use callwire_shared::codec::{self, LineDecoder};
use callwire_shared::{Request, Response};
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, warn};

pub(super) async fn run(socket: TcpStream, peer: SocketAddr, shared: Arc<ServerShared>, id: u64) {
    debug!("Connection worker {} started for {}", id, peer);

    if let Err(e) = serve(socket, peer, &shared).await {
        // During shutdown the sockets are yanked out from under us, so
        // transport errors are expected noise.
        if !shared.stopping.load(Ordering::SeqCst) {
            warn!("Connection error from {}: {}", peer, e);
        }
    }

    shared.workers.remove(id);
    debug!("Connection worker {} finished", id);
}

async fn serve(socket: TcpStream, peer: SocketAddr, shared: &ServerShared) -> Result<()> {
    let (reader, writer) = socket.into_split();
    let mut conn = Connection::new(reader, writer);

    if let Some(secret) = &shared.secret {
        match conn.next_line().await? {
            Some(line) if line == *secret => {
                debug!("Handshake accepted from {}", peer);
            }
            _ => {
                // Drop without a byte of response; the peer cannot
                // tell a wrong secret from a dead server.
                warn!("Handshake rejected from {}", peer);
                return Ok(());
            }
        }
    }

    while let Some(line) = conn.next_line().await? {
        // Once shutdown has begun, no request may be served, even on
        // a connection whose abort has not landed yet.
        if shared.stopping.load(Ordering::SeqCst) {
            break;
        }
        let response = match Request::parse(&line) {
            Ok(request) => {
                debug!("Received request {} ({})", request.id, request.method);
                dispatch(&shared.registry, &request).await
            }
            Err(e) => {
                debug!("Malformed request line from {}: {}", peer, e);
                Response::failure(format!("Malformed request: {e}"))
            }
        };
        conn.send(&response).await?;
    }

    debug!("Connection from {} closed by peer", peer);
    Ok(())
}

async fn dispatch(registry: &Arc<HandlerRegistry>, request: &Request) -> Response {
    let Some(entry) = registry.operation(&request.method) else {
        return Response::failure("Unknown RPC.");
    };

    match invoke::invoke(registry, entry, &request.params).await {
        InvokeOutcome::Ok(value) => Response::success(value),
        InvokeOutcome::BindingFailed(e) => Response::failure(e.to_string()),
        InvokeOutcome::HandlerFailed(message) => Response::failure(message),
    }
}

struct Connection {
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    decoder: LineDecoder,
    read_buf: Vec<u8>,
}

impl Connection {
    fn new(reader: OwnedReadHalf, writer: OwnedWriteHalf) -> Self {
        Self {
            reader,
            writer,
            decoder: LineDecoder::new(),
            read_buf: vec![0u8; 4096],
        }
    }

    /// Next complete line, or `None` on clean EOF
    ///
    /// Oversized or non-UTF-8 input is a transport error and ends the
    /// connection; there is no way to resynchronize a line stream with
    /// a peer that sends either.
    async fn next_line(&mut self) -> Result<Option<String>> {
        loop {
            if let Some(line) = self.decoder.next_line()? {
                return Ok(Some(line));
            }
            let n = self.reader.read(&mut self.read_buf).await?;
            if n == 0 {
                return Ok(None);
            }
            self.decoder.extend(&self.read_buf[..n]);
        }
    }

    async fn send(&mut self, response: &Response) -> Result<()> {
        let encoded = codec::encode(response)?;
        self.writer.write_all(&encoded).await?;
        self.writer.flush().await?;
        Ok(())
    }
}
