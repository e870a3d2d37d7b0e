//! Connection Handler Module
//!
//! This module handles individual client connections.
//! Each client gets its own task that runs in a loop,
//! reading requests and dispatching them in arrival order.
//!
//! ## Connection Lifecycle
//!
//! ```text
//! 1. Client connects (TCP handshake)
//!        │
//!        ▼
//! 2. ConnectionHandler spawned, buffers taken from the pool
//!        │
//!        ▼
//! 3. ┌──────────────────────────────┐
//!    │      Main Loop               │
//!    │                              │
//!    │  ┌─────────────────────────┐ │
//!    │  │ Read bytes from socket  │ │
//!    │  └───────────┬─────────────┘ │
//!    │              │               │
//!    │              ▼               │
//!    │  ┌─────────────────────────┐ │
//!    │  │ Parse request           │ │
//!    │  └───────────┬─────────────┘ │
//!    │              │               │
//!    │              ▼               │
//!    │  ┌─────────────────────────┐ │
//!    │  │ Dispatch to handler     │ │
//!    │  │ (handler writes reply)  │ │
//!    │  └───────────┬─────────────┘ │
//!    │              │               │
//!    │              ▼               │
//!    │         [Loop back]          │
//!    └──────────────────────────────┘
//!        │
//!        ▼
//! 4. Parse failure / read failure / handler error / client disconnects
//!        │
//!        ▼
//! 5. Bad-request callback (parse and read failures only),
//!    buffers returned to the pool, socket closed
//! ```
//!
//! ## Buffer Management
//!
//! Incoming bytes accumulate in a pooled `BytesMut` because TCP is a stream
//! protocol: a read may hold half a request, or several pipelined ones.

use crate::commands::{BadRequestHandler, Dispatcher};
use crate::config::ServerConfig;
use crate::connection::pool::{BufferPool, PooledBuffer};
use crate::protocol::{ParseError, Request, RequestParser, ResponseWriter};
use bytes::Buf;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tracing::{debug, info, trace, warn};

/// Keep at least this much spare room before each read
const MIN_READ_SPACE: usize = 1024;

/// Statistics for connection handling
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently active connections
    pub active_connections: AtomicU64,
    /// Total requests dispatched
    pub requests_processed: AtomicU64,
    /// Total bytes read
    pub bytes_read: AtomicU64,
    /// Total bytes written
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn request_processed(&self) {
        self.requests_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: u64) {
        self.bytes_written.fetch_add(count, Ordering::Relaxed);
    }
}

/// Everything a connection task shares with the server that spawned it.
///
/// Built once per server and never mutated afterwards.
pub struct ConnectionContext {
    pub dispatcher: Dispatcher,
    pub bad_request: Option<BadRequestHandler>,
    pub config: ServerConfig,
    pub pool: Arc<BufferPool>,
    pub stats: Arc<ConnectionStats>,
}

/// Handles a single client connection.
///
/// This struct owns the read half of the socket, the read buffer, the
/// parser, and the response writer over the write half.
pub struct ConnectionHandler {
    reader: OwnedReadHalf,

    writer: ResponseWriter,

    /// Client's address (for logging)
    addr: SocketAddr,

    /// Buffer for incoming data
    buffer: PooledBuffer,

    parser: RequestParser,

    ctx: Arc<ConnectionContext>,
}

impl ConnectionHandler {
    /// Creates a new connection handler, taking its buffers from the
    /// context's pool.
    pub fn new(stream: TcpStream, addr: SocketAddr, ctx: Arc<ConnectionContext>) -> Self {
        ctx.stats.connection_opened();

        if ctx.config.nodelay {
            if let Err(e) = stream.set_nodelay(true) {
                debug!(client = %addr, error = %e, "Failed to set TCP_NODELAY");
            }
        }

        let (reader, writer) = stream.into_split();
        let buffer = ctx.pool.acquire();
        let writer = ResponseWriter::new(writer, ctx.pool.acquire());

        Self {
            reader,
            writer,
            addr,
            buffer,
            parser: RequestParser::with_mode(ctx.config.array_mode)
                .with_max_bulk_size(ctx.config.max_buffer_size),
            ctx,
        }
    }

    /// Runs the main connection loop.
    ///
    /// Returns once the client disconnects or the connection fails. The
    /// buffers go back to the pool and the socket closes when `self` drops
    /// at the end of this call.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!(client = %self.addr, "Client connected");

        let result = self.main_loop().await;

        match &result {
            Ok(()) => info!(client = %self.addr, "Client disconnected gracefully"),
            Err(e) => match e {
                ConnectionError::ClientDisconnected => {
                    debug!(client = %self.addr, "Client disconnected")
                }
                ConnectionError::IoError(io_err)
                    if io_err.kind() == std::io::ErrorKind::ConnectionReset =>
                {
                    debug!(client = %self.addr, "Connection reset by client")
                }
                _ => warn!(client = %self.addr, error = %e, "Connection error"),
            },
        }

        self.ctx.stats.connection_closed();
        result
    }

    /// The read-dispatch loop.
    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        loop {
            let request = match self.next_request().await {
                Ok(request) => request,
                Err(e) => {
                    if e.is_bad_request() {
                        self.report_bad_request(&e).await;
                    }
                    return Err(e);
                }
            };

            self.ctx.stats.request_processed();

            let before = self.writer.bytes_written();
            let outcome = self
                .ctx
                .dispatcher
                .dispatch(request, &mut self.writer)
                .await;
            self.ctx
                .stats
                .bytes_written(self.writer.bytes_written() - before);

            outcome.map_err(ConnectionError::Handler)?;
        }
    }

    /// Reads until one complete request is buffered, then decodes it.
    async fn next_request(&mut self) -> Result<Request, ConnectionError> {
        loop {
            if let Some(request) = self.try_parse_request()? {
                return Ok(request);
            }
            self.read_more_data().await?;
        }
    }

    /// Attempts to parse a request from the buffer.
    fn try_parse_request(&mut self) -> Result<Option<Request>, ConnectionError> {
        if self.buffer.is_empty() {
            return Ok(None);
        }

        match self.parser.parse(&self.buffer) {
            Ok(Some((request, consumed))) => {
                self.buffer.advance(consumed);
                trace!(
                    client = %self.addr,
                    command = %request.command,
                    consumed = consumed,
                    remaining = self.buffer.len(),
                    "Parsed request"
                );
                Ok(Some(request))
            }
            Ok(None) => {
                trace!(
                    client = %self.addr,
                    buffered = self.buffer.len(),
                    "Incomplete request, need more data"
                );
                Ok(None)
            }
            Err(e) => {
                warn!(client = %self.addr, error = %e, "Parse error");
                Err(ConnectionError::ParseError(e))
            }
        }
    }

    /// Reads more data from the socket into the buffer.
    async fn read_more_data(&mut self) -> Result<(), ConnectionError> {
        if self.buffer.len() >= self.ctx.config.max_buffer_size {
            warn!(
                client = %self.addr,
                size = self.buffer.len(),
                "Buffer size limit exceeded"
            );
            return Err(ConnectionError::BufferFull);
        }

        if self.buffer.capacity() - self.buffer.len() < MIN_READ_SPACE {
            self.buffer.reserve(4096);
        }

        let idle_timeout = self.ctx.config.idle_timeout;
        let read = self.reader.read_buf(&mut *self.buffer);
        let n = match idle_timeout {
            Some(limit) => tokio::time::timeout(limit, read)
                .await
                .map_err(|_| ConnectionError::Timeout(limit))??,
            None => read.await?,
        };

        if n == 0 {
            if self.buffer.is_empty() {
                return Err(ConnectionError::ClientDisconnected);
            } else {
                // Partial request in buffer
                return Err(ConnectionError::UnexpectedEof);
            }
        }

        self.ctx.stats.bytes_read(n);
        trace!(client = %self.addr, bytes = n, "Read data");

        Ok(())
    }

    async fn report_bad_request(&mut self, error: &ConnectionError) {
        if let Some(callback) = self.ctx.bad_request.clone() {
            let before = self.writer.bytes_written();
            callback(error, &mut self.writer).await;
            self.ctx
                .stats
                .bytes_written(self.writer.bytes_written() - before);
        }
    }
}

/// Errors that can end a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// I/O error while reading from the client
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Malformed request
    #[error("Protocol error: {0}")]
    ParseError(#[from] ParseError),

    /// Client disconnected between requests
    #[error("Client disconnected")]
    ClientDisconnected,

    /// Unexpected end of stream (partial request)
    #[error("Unexpected end of stream")]
    UnexpectedEof,

    /// Buffer size limit exceeded
    #[error("Buffer size limit exceeded")]
    BufferFull,

    /// No data arrived within the idle timeout
    #[error("Idle for more than {0:?}")]
    Timeout(Duration),

    /// A handler returned an error
    #[error("Handler error: {0}")]
    Handler(anyhow::Error),
}

impl ConnectionError {
    /// Whether this failure happened while reading a request, which is when
    /// the bad-request callback runs.
    pub fn is_bad_request(&self) -> bool {
        !matches!(
            self,
            ConnectionError::ClientDisconnected | ConnectionError::Handler(_)
        )
    }
}

/// Handles a client connection.
///
/// This is a convenience function that creates a ConnectionHandler
/// and runs it to completion.
pub async fn handle_connection(stream: TcpStream, addr: SocketAddr, ctx: Arc<ConnectionContext>) {
    let handler = ConnectionHandler::new(stream, addr, ctx);
    if let Err(e) = handler.run().await {
        match e {
            ConnectionError::ClientDisconnected => {}
            ConnectionError::IoError(ref io_err)
                if io_err.kind() == std::io::ErrorKind::ConnectionReset => {}
            _ => {
                debug!(client = %addr, error = %e, "Connection ended with error");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{CommandTable, Handler};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn ping_table() -> CommandTable {
        let ping: Handler = Arc::new(|_req, w| {
            Box::pin(async move {
                w.write_string("PONG").await?;
                Ok(())
            })
        });
        let mut table = CommandTable::new();
        table.insert("ping", ping);
        table
    }

    fn context(
        config: ServerConfig,
        bad_request: Option<BadRequestHandler>,
    ) -> Arc<ConnectionContext> {
        Arc::new(ConnectionContext {
            dispatcher: Dispatcher::Table(Arc::new(ping_table())),
            bad_request,
            config,
            pool: Arc::new(BufferPool::new()),
            stats: Arc::new(ConnectionStats::new()),
        })
    }

    async fn create_test_server(ctx: Arc<ConnectionContext>) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            while let Ok((stream, client_addr)) = listener.accept().await {
                tokio::spawn(handle_connection(stream, client_addr, Arc::clone(&ctx)));
            }
        });

        addr
    }

    #[tokio::test]
    async fn test_ping_pong() {
        let addr = create_test_server(context(ServerConfig::default(), None)).await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();

        let mut buf = [0u8; 64];
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"+PONG\r\n");
    }

    #[tokio::test]
    async fn test_request_split_across_writes() {
        let addr = create_test_server(context(ServerConfig::default(), None)).await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"*1\r\n$4\r\nPI").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        client.write_all(b"NG\r\n").await.unwrap();

        let mut buf = [0u8; 64];
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"+PONG\r\n");
    }

    #[tokio::test]
    async fn test_parse_error_without_callback_closes_silently() {
        let addr = create_test_server(context(ServerConfig::default(), None)).await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"*1\r\n:1\r\n").await.unwrap();

        let mut buf = Vec::new();
        client.read_to_end(&mut buf).await.unwrap();
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn test_buffer_limit_reports_bad_request() {
        let callback: BadRequestHandler = Arc::new(|err, w| {
            Box::pin(async move {
                let _ = w.write_error(format!("ERR {}", err)).await;
            })
        });
        let config = ServerConfig {
            max_buffer_size: 16,
            ..ServerConfig::default()
        };
        let addr = create_test_server(context(config, Some(callback))).await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        // An inline command that never ends
        client.write_all(b"SET key xxxxxxxxxxxxxxxx").await.unwrap();

        let mut buf = Vec::new();
        client.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"-ERR Buffer size limit exceeded\r\n");
    }

    #[tokio::test]
    async fn test_bulk_larger_than_buffer_is_rejected_on_header() {
        let callback: BadRequestHandler = Arc::new(|err, w| {
            Box::pin(async move {
                let _ = w.write_error(format!("ERR {}", err)).await;
            })
        });
        let config = ServerConfig {
            max_buffer_size: 64,
            ..ServerConfig::default()
        };
        let addr = create_test_server(context(config, Some(callback))).await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"*1\r\n$100\r\n").await.unwrap();

        let mut buf = Vec::new();
        client.read_to_end(&mut buf).await.unwrap();
        assert_eq!(
            buf,
            b"-ERR Protocol error: bulk string too large: 100 bytes (max: 64)\r\n"
        );
    }

    #[tokio::test]
    async fn test_idle_timeout_closes_connection() {
        let config = ServerConfig {
            idle_timeout: Some(Duration::from_millis(50)),
            ..ServerConfig::default()
        };
        let ctx = context(config, None);
        let stats = Arc::clone(&ctx.stats);
        let addr = create_test_server(ctx).await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        let mut buf = Vec::new();
        let read = tokio::time::timeout(Duration::from_secs(2), client.read_to_end(&mut buf))
            .await
            .expect("server should close the idle connection");
        assert_eq!(read.unwrap(), 0);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_connection_stats_and_buffer_return() {
        let ctx = context(ServerConfig::default(), None);
        let stats = Arc::clone(&ctx.stats);
        let pool = Arc::clone(&ctx.pool);
        let addr = create_test_server(ctx).await;

        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);

        let mut client = TcpStream::connect(addr).await.unwrap();

        // Give the server time to accept the connection
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(stats.connections_accepted.load(Ordering::Relaxed), 1);
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 1);
        assert_eq!(pool.idle(), 0);

        client.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
        let mut buf = [0u8; 64];
        let _ = client.read(&mut buf).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(stats.requests_processed.load(Ordering::Relaxed), 1);
        assert_eq!(stats.bytes_read.load(Ordering::Relaxed), 14);
        assert_eq!(stats.bytes_written.load(Ordering::Relaxed), 7);

        drop(client);

        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);
        // Read and write buffers are both back in the pool.
        assert_eq!(pool.idle(), 2);
    }
}
