//! Async TCP serving loop using Tokio.
//!
//! Accepts TCP connections and dispatches HTTP/1.1 requests to a handler
//! function until a shutdown signal arrives. Supports persistent and pipelined
//! connections; idle waits and whole-request reads are both bounded by the
//! configured timeout.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::http::{
    StatusCode,
    request::{Request, RequestError},
    response::Response,
};

/// Errors produced by the server and its background lifecycle.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server not running")]
    NotRunning,

    #[error("failed to launch the server runtime: {0}")]
    Runtime(#[source] std::io::Error),
}

/// Maximum size of a complete HTTP request we will buffer before rejecting it (8 MiB).
const MAX_REQUEST_SIZE: usize = 8 * 1024 * 1024;

/// Initial read buffer capacity per connection.
const INITIAL_BUF_SIZE: usize = 4096;

/// A bound listener, ready to serve.
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Server {
    /// Binds the server to the given TCP address.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound
    /// (e.g. port already in use, insufficient permissions).
    pub async fn bind(addr: impl AsRef<str>) -> Result<Self, ServerError> {
        let addr = addr.as_ref();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: addr.to_owned(),
                source: e,
            })?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts connections and dispatches requests to `handler` until `shutdown`
    /// resolves.
    ///
    /// Each connection runs on its own Tokio task. When `shutdown` fires the
    /// listener is dropped immediately; connection tasks are left to the
    /// owning runtime to cancel.
    pub async fn run_until<H, F, S>(self, handler: H, timeout: Duration, shutdown: S)
    where
        H: Fn(Request) -> F + Send + Sync + 'static,
        F: Future<Output = Response> + Send + 'static,
        S: Future<Output = ()>,
    {
        let handler = Arc::new(handler);
        info!(address = %self.local_addr, "resource server listening");
        tokio::pin!(shutdown);

        loop {
            let (stream, peer_addr) = tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        error!(error = %e, "failed to accept connection");
                        continue;
                    }
                },
            };

            debug!(peer = %peer_addr, "connection accepted");
            let handler = Arc::clone(&handler);

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer_addr, handler, timeout).await {
                    warn!(peer = %peer_addr, error = %e, "connection closed with error");
                }
            });
        }

        info!(address = %self.local_addr, "resource server stopped accepting");
    }
}

/// Handles a single TCP connection over its lifetime.
///
/// Answers every complete request already buffered before reading again, so
/// pipelined requests are served in order. Between requests the connection may
/// sit idle for `timeout`; once the first byte of a request arrives, its head
/// and body must be complete within `timeout` in total.
async fn handle_connection<H, F>(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    handler: Arc<H>,
    timeout: Duration,
) -> Result<(), std::io::Error>
where
    H: Fn(Request) -> F + Send + Sync + 'static,
    F: Future<Output = Response> + Send + 'static,
{
    let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);
    // Set while a request is partially read; `None` while idle between requests.
    let mut deadline: Option<Instant> = None;

    loop {
        if !buf.is_empty() {
            if buf.len() > MAX_REQUEST_SIZE {
                warn!(peer = %peer_addr, "request too large, sending 413");
                let response = Response::new(StatusCode::PayloadTooLarge).keep_alive(false);
                stream.write_all(&response.into_bytes()).await?;
                break;
            }

            match Request::parse(&buf) {
                Ok((request, body_offset)) => {
                    let total_needed = body_offset
                        .checked_add(request.content_length().unwrap_or(0))
                        .filter(|total| *total <= MAX_REQUEST_SIZE);
                    let Some(total_needed) = total_needed else {
                        warn!(peer = %peer_addr, "declared body too large, sending 413");
                        let response = Response::new(StatusCode::PayloadTooLarge).keep_alive(false);
                        stream.write_all(&response.into_bytes()).await?;
                        break;
                    };

                    if buf.len() >= total_needed {
                        let keep_alive = request.is_keep_alive();

                        debug!(
                            peer = %peer_addr,
                            method = %request.method(),
                            path = %request.path(),
                            "dispatching request"
                        );

                        let response = handler(request).await.keep_alive(keep_alive);
                        stream.write_all(&response.into_bytes()).await?;
                        stream.flush().await?;

                        let _ = buf.split_to(total_needed);

                        if !keep_alive {
                            debug!(peer = %peer_addr, "Connection: close, shutting down");
                            break;
                        }
                        deadline = (!buf.is_empty()).then(|| Instant::now() + timeout);
                        continue;
                    }
                }
                Err(RequestError::Incomplete) => {}
                Err(e) => {
                    warn!(peer = %peer_addr, error = %e, "bad request, sending 400");
                    let response = Response::new(StatusCode::BadRequest)
                        .body(format!("Bad Request: {e}"))
                        .keep_alive(false);
                    stream.write_all(&response.into_bytes()).await?;
                    break;
                }
            }
        }

        let read = match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, stream.read_buf(&mut buf)).await,
            None => tokio::time::timeout(timeout, stream.read_buf(&mut buf)).await,
        };
        let bytes_read = match read {
            Ok(read) => read?,
            Err(_elapsed) if deadline.is_some() => {
                debug!(peer = %peer_addr, "request not completed within timeout, closing");
                break;
            }
            Err(_elapsed) => {
                debug!(peer = %peer_addr, "connection idle past timeout, closing");
                break;
            }
        };

        if bytes_read == 0 {
            debug!(peer = %peer_addr, "connection closed by peer");
            break;
        }

        if deadline.is_none() {
            deadline = Some(Instant::now() + timeout);
        }
    }

    Ok(())
}
