//! Async TCP server using Tokio.
//!
//! Accepts TCP connections and hands HTTP/1.1 requests to a handler function.
//! Connections are persistent (keep-alive) unless the client asks otherwise,
//! and pipelined requests already in the buffer are answered in order.
//!
//! The server transports bytes and nothing more: routing, middleware and error
//! mapping all happen in the handler. The only protocol rule applied here is
//! that responses to `HEAD` carry headers but no body.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::http::{
    Method, StatusCode,
    request::{Request, RequestError},
    response::Response,
};

/// Errors produced by the server.
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
}

/// Maximum size of a complete HTTP request we will buffer before rejecting it (8 MiB).
const MAX_REQUEST_SIZE: usize = 8 * 1024 * 1024;

/// Initial read buffer capacity per connection.
const INITIAL_BUF_SIZE: usize = 4096;

/// The HTTP listener.
///
/// # Examples
///
/// ```rust,no_run
/// use treeroute::server::Server;
/// use treeroute::http::{Request, Response, StatusCode};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let server = Server::bind("127.0.0.1:8080").await?;
///     server
///         .run_until(
///             |_req: Request| async { Response::new(StatusCode::Ok).body("Hello!") },
///             async {
///                 let _ = tokio::signal::ctrl_c().await;
///             },
///         )
///         .await?;
///     Ok(())
/// }
/// ```
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

    /// Accepts connections and dispatches requests to `handler` until
    /// `shutdown` completes.
    ///
    /// Once `shutdown` resolves the listener is closed. Connections that are
    /// already open keep being served on their own tasks until the peer
    /// disconnects.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Io`] if the TCP listener itself fails.
    pub async fn run_until<H, F, S>(self, handler: H, shutdown: S) -> Result<(), ServerError>
    where
        H: Fn(Request) -> F + Send + Sync + 'static,
        F: Future<Output = Response> + Send + 'static,
        S: Future<Output = ()>,
    {
        let handler = Arc::new(handler);
        info!(address = %self.local_addr, "listening");
        tokio::pin!(shutdown);

        loop {
            let (stream, peer_addr) = tokio::select! {
                () = &mut shutdown => {
                    info!(address = %self.local_addr, "shutdown requested, no longer accepting connections");
                    break;
                }
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
                if let Err(e) = handle_connection(stream, peer_addr, handler).await {
                    warn!(peer = %peer_addr, error = %e, "connection closed with error");
                }
            });
        }

        Ok(())
    }
}

/// Handles a single TCP connection over its lifetime.
///
/// Every complete request already buffered is answered before more bytes are
/// read. The loop ends when the peer closes the connection, sends
/// `Connection: close`, or sends something unparseable.
async fn handle_connection<H, F>(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    handler: Arc<H>,
) -> Result<(), std::io::Error>
where
    H: Fn(Request) -> F + Send + Sync + 'static,
    F: Future<Output = Response> + Send + 'static,
{
    let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);

    loop {
        match Request::parse(&buf) {
            Ok((request, body_offset)) => {
                let total = request
                    .content_length()
                    .unwrap_or(0)
                    .checked_add(body_offset)
                    .filter(|total| *total <= MAX_REQUEST_SIZE);
                let Some(total) = total else {
                    warn!(peer = %peer_addr, "request too large, sending 413");
                    reject(&mut stream, StatusCode::PayloadTooLarge, "Request entity too large").await?;
                    break;
                };

                if buf.len() >= total {
                    let frame = buf.split_to(total).freeze();
                    let request = request.with_body(frame.slice(body_offset..));
                    let keep_alive = request.is_keep_alive();
                    let head = request.method() == &Method::Head;

                    debug!(
                        peer = %peer_addr,
                        method = %request.method(),
                        url = %request.url(),
                        "dispatching request"
                    );

                    let mut response = handler(request).await.keep_alive(keep_alive);
                    if head {
                        response = response.head_only();
                    }
                    stream.write_all(&response.into_bytes()).await?;
                    stream.flush().await?;

                    if !keep_alive {
                        debug!(peer = %peer_addr, "Connection: close, shutting down");
                        break;
                    }
                    continue;
                }
            }
            // Headers not yet fully received.
            Err(RequestError::Incomplete) => {}
            Err(e) => {
                warn!(peer = %peer_addr, error = %e, "bad request, sending 400");
                reject(&mut stream, StatusCode::BadRequest, &format!("Bad Request: {e}")).await?;
                break;
            }
        }

        if buf.len() > MAX_REQUEST_SIZE {
            warn!(peer = %peer_addr, "request too large, sending 413");
            reject(&mut stream, StatusCode::PayloadTooLarge, "Request entity too large").await?;
            break;
        }

        if stream.read_buf(&mut buf).await? == 0 {
            debug!(peer = %peer_addr, "connection closed by peer");
            break;
        }
    }

    Ok(())
}

async fn reject(stream: &mut TcpStream, status: StatusCode, reason: &str) -> std::io::Result<()> {
    let response = Response::new(status).body(reason).keep_alive(false);
    stream.write_all(&response.into_bytes()).await?;
    stream.flush().await
}
