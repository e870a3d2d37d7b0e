//! TCP server and registration API.
//!
//! A [`ServerBuilder`] collects handlers and settings; [`ServerBuilder::build`]
//! freezes them into a [`Server`]. Because the builder is consumed, the
//! command table cannot change once connections are being served.
//!
//! ```ignore
//! use flashresp::ServerBuilder;
//! use tokio::net::TcpListener;
//!
//! let server = ServerBuilder::new()
//!     .handle("ping", |_req, w| Box::pin(async move {
//!         w.write_string("PONG").await?;
//!         Ok(())
//!     }))
//!     .build();
//!
//! let listener = TcpListener::bind("127.0.0.1:6379").await?;
//! server.serve(listener).await;
//! ```

use crate::commands::{
    BadRequestHandler, BoxFuture, CommandTable, Dispatcher, Handler, HandlerResult,
};
use crate::config::ServerConfig;
use crate::connection::{
    handle_connection, BufferPool, ConnectionContext, ConnectionError, ConnectionStats,
};
use crate::protocol::{Request, ResponseWriter};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Collects handlers and settings for a [`Server`].
#[derive(Default)]
pub struct ServerBuilder {
    table: CommandTable,
    dispatch: Option<Handler>,
    bad_request: Option<BadRequestHandler>,
    config: ServerConfig,
    pool: Option<Arc<BufferPool>>,
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for `command`.
    ///
    /// Lookup is case-insensitive; registering the same name again in any
    /// case replaces the earlier handler.
    pub fn handle<F>(mut self, command: &str, handler: F) -> Self
    where
        F: for<'a> Fn(Request, &'a mut ResponseWriter) -> BoxFuture<'a, HandlerResult>
            + Send
            + Sync
            + 'static,
    {
        self.table.insert(command, Arc::new(handler));
        self
    }

    /// Sends every request to `dispatch` instead of the command table.
    ///
    /// Handlers registered with [`handle`](Self::handle) are ignored while a
    /// custom dispatch function is set.
    pub fn dispatch<F>(mut self, dispatch: F) -> Self
    where
        F: for<'a> Fn(Request, &'a mut ResponseWriter) -> BoxFuture<'a, HandlerResult>
            + Send
            + Sync
            + 'static,
    {
        self.dispatch = Some(Arc::new(dispatch));
        self
    }

    /// Called with the error and a writer when a connection fails to
    /// deliver a well-formed request. The connection closes afterwards
    /// either way.
    pub fn bad_request_handler<F>(mut self, callback: F) -> Self
    where
        F: for<'a> Fn(&'a ConnectionError, &'a mut ResponseWriter) -> BoxFuture<'a, ()>
            + Send
            + Sync
            + 'static,
    {
        self.bad_request = Some(Arc::new(callback));
        self
    }

    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Uses `pool` for connection buffers instead of a private one.
    pub fn buffer_pool(mut self, pool: Arc<BufferPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Freezes the configuration into a server.
    pub fn build(self) -> Server {
        let dispatcher = match self.dispatch {
            Some(dispatch) => Dispatcher::Custom(dispatch),
            None => Dispatcher::Table(Arc::new(self.table)),
        };

        Server {
            ctx: Arc::new(ConnectionContext {
                dispatcher,
                bad_request: self.bad_request,
                config: self.config,
                pool: self.pool.unwrap_or_default(),
                stats: Arc::new(ConnectionStats::new()),
            }),
        }
    }
}

/// A RESP server with a frozen dispatch table.
///
/// Cloning is cheap; clones serve from the same table, pool and stats.
#[derive(Clone)]
pub struct Server {
    ctx: Arc<ConnectionContext>,
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Accepts connections forever, one task per connection.
    ///
    /// Accept errors are logged and the loop keeps going.
    pub async fn serve(&self, listener: TcpListener) {
        if let Ok(addr) = listener.local_addr() {
            info!("Accepting connections on {}", addr);
        }
        self.accept_loop(&listener).await
    }

    /// Like [`serve`](Self::serve), but stops accepting once `shutdown`
    /// completes. Connections already being served run until they end on
    /// their own.
    pub async fn serve_with_shutdown<F>(&self, listener: TcpListener, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            _ = self.serve(listener) => {}
            _ = shutdown => {
                info!("Shutdown signal received, no longer accepting connections");
            }
        }
    }

    pub fn stats(&self) -> &Arc<ConnectionStats> {
        &self.ctx.stats
    }

    pub fn buffer_pool(&self) -> &Arc<BufferPool> {
        &self.ctx.pool
    }

    pub fn config(&self) -> &ServerConfig {
        &self.ctx.config
    }

    async fn accept_loop(&self, listener: &TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    let ctx = Arc::clone(&self.ctx);
                    tokio::spawn(handle_connection(stream, addr, ctx));
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ArrayMode, Response, Value};
    use std::net::SocketAddr;
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    fn echo_server() -> ServerBuilder {
        ServerBuilder::new()
            .handle("echo", |req, w| {
                Box::pin(async move {
                    match req.arguments.first() {
                        Some(Value::String(data)) => w.write_bulk_string(data.clone()).await?,
                        _ => w.write_error("ERR wrong number of arguments").await?,
                    }
                    Ok(())
                })
            })
            .handle("get", |req, w| {
                Box::pin(async move {
                    let key = req.arg_str(0).unwrap_or_default().to_string();
                    w.write_bulk_string(format!("hit:{}", key)).await?;
                    Ok(())
                })
            })
    }

    async fn spawn_server(server: Server) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { server.serve(listener).await });
        addr
    }

    async fn read_len(client: &mut TcpStream, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        client.read_exact(&mut buf).await.unwrap();
        buf
    }

    #[tokio::test]
    async fn test_command_lookup_is_case_insensitive() {
        let addr = spawn_server(echo_server().build()).await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client
            .write_all(b"*2\r\n$3\r\nGET\r\n$1\r\nx\r\n")
            .await
            .unwrap();
        assert_eq!(read_len(&mut client, 11).await, b"$5\r\nhit:x\r\n");

        client
            .write_all(b"*2\r\n$3\r\nget\r\n$1\r\nx\r\n")
            .await
            .unwrap();
        assert_eq!(read_len(&mut client, 11).await, b"$5\r\nhit:x\r\n");
    }

    #[tokio::test]
    async fn test_unknown_command_keeps_connection_open() {
        let addr = spawn_server(echo_server().build()).await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"*1\r\n$3\r\nFOO\r\n").await.unwrap();
        let expected = b"-ERR unknown command `FOO`\r\n";
        assert_eq!(read_len(&mut client, expected.len()).await, expected);

        client.write_all(b"ECHO hi\r\n").await.unwrap();
        assert_eq!(read_len(&mut client, 8).await, b"$2\r\nhi\r\n");
    }

    #[tokio::test]
    async fn test_all_request_framings() {
        let addr = spawn_server(echo_server().build()).await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        // Simple-string and bulk-string framings carry no arguments.
        client.write_all(b"+echo\r\n$4\r\nECHO\r\n").await.unwrap();
        let expected = b"-ERR wrong number of arguments\r\n";
        assert_eq!(read_len(&mut client, expected.len()).await, expected);
        assert_eq!(read_len(&mut client, expected.len()).await, expected);

        client.write_all(b"echo inline\r\n").await.unwrap();
        assert_eq!(read_len(&mut client, 12).await, b"$6\r\ninline\r\n");
    }

    #[tokio::test]
    async fn test_truncated_bulk_reports_once_then_closes() {
        let server = echo_server()
            .bad_request_handler(|err, w| {
                Box::pin(async move {
                    let _ = w.write_error(format!("ERR {}", err)).await;
                })
            })
            .build();
        let addr = spawn_server(server).await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        // Declared length 5, only 3 bytes plus a terminator.
        client
            .write_all(b"*2\r\n$4\r\nECHO\r\n$5\r\nabc\r\n")
            .await
            .unwrap();
        client.shutdown().await.unwrap();

        let mut buf = Vec::new();
        client.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"-ERR Unexpected end of stream\r\n");
    }

    #[tokio::test]
    async fn test_missing_terminator_reports_parse_error() {
        let server = echo_server()
            .bad_request_handler(|err, w| {
                Box::pin(async move {
                    let _ = w.write_error(format!("ERR {}", err)).await;
                })
            })
            .build();
        let addr = spawn_server(server).await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client
            .write_all(b"*2\r\n$4\r\nECHO\r\n$5\r\nabc\r\n*1\r\n")
            .await
            .unwrap();

        let mut buf = Vec::new();
        client.read_to_end(&mut buf).await.unwrap();
        assert_eq!(
            buf,
            b"-ERR Protocol error: invalid bulk string: missing CRLF terminator\r\n"
        );
    }

    #[tokio::test]
    async fn test_handler_error_closes_connection() {
        let server = ServerBuilder::new()
            .handle("fail", |_req, w| {
                Box::pin(async move {
                    w.write_error("ERR failing on purpose").await?;
                    Err(anyhow::anyhow!("handler gave up"))
                })
            })
            .build();
        let addr = spawn_server(server).await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"FAIL\r\n").await.unwrap();

        let mut buf = Vec::new();
        client.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"-ERR failing on purpose\r\n");
    }

    #[tokio::test]
    async fn test_custom_dispatch_bypasses_table() {
        let server = echo_server()
            .dispatch(|req, w| {
                Box::pin(async move {
                    w.write_string(format!("saw {}", req.command)).await?;
                    Ok(())
                })
            })
            .build();
        let addr = spawn_server(server).await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"echo x\r\n").await.unwrap();
        assert_eq!(read_len(&mut client, 11).await, b"+saw echo\r\n");
    }

    #[tokio::test]
    async fn test_connections_do_not_interfere() {
        let addr = spawn_server(echo_server().build()).await;
        let mut a = TcpStream::connect(addr).await.unwrap();
        let mut b = TcpStream::connect(addr).await.unwrap();

        for i in 0..20 {
            let msg_a = format!("a{:02}", i);
            let msg_b = format!("b{:02}", i);

            a.write_all(format!("ECHO {}\r\n", msg_a).as_bytes())
                .await
                .unwrap();
            b.write_all(format!("ECHO {}\r\n", msg_b).as_bytes())
                .await
                .unwrap();
            a.write_all(format!("ECHO {}!\r\n", msg_a).as_bytes())
                .await
                .unwrap();

            assert_eq!(
                read_len(&mut b, 9).await,
                format!("$3\r\n{}\r\n", msg_b).into_bytes()
            );
            assert_eq!(
                read_len(&mut a, 9).await,
                format!("$3\r\n{}\r\n", msg_a).into_bytes()
            );
            assert_eq!(
                read_len(&mut a, 10).await,
                format!("$4\r\n{}!\r\n", msg_a).into_bytes()
            );
        }
    }

    #[tokio::test]
    async fn test_wire_output_decodes_with_redis_client() {
        let server = ServerBuilder::new()
            .handle("mixed", |_req, w| {
                Box::pin(async move {
                    w.write_response(Response::array(vec![
                        Response::integer(7),
                        Response::null_array(),
                        Response::array(vec![]),
                        None::<Response>.into(),
                    ]))
                    .await?;
                    Ok(())
                })
            })
            .build();
        let addr = spawn_server(server).await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"MIXED\r\n").await.unwrap();
        let raw = read_len(&mut client, b"*4\r\n:7\r\n*-1\r\n*0\r\n$-1\r\n".len()).await;

        let decoded = redis::parse_redis_value(&raw).unwrap();
        assert_eq!(
            decoded,
            redis::Value::Array(vec![
                redis::Value::Int(7),
                redis::Value::Nil,
                redis::Value::Array(vec![]),
                redis::Value::Nil,
            ])
        );
    }

    #[tokio::test]
    async fn test_nested_array_mode_reaches_handlers() {
        let server = ServerBuilder::new()
            .config(ServerConfig {
                array_mode: ArrayMode::Nested,
                ..ServerConfig::default()
            })
            .handle("count", |req, w| {
                Box::pin(async move {
                    w.write_int(req.arguments.len() as i64).await?;
                    Ok(())
                })
            })
            .build();
        let addr = spawn_server(server).await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client
            .write_all(b"*3\r\n$5\r\nCOUNT\r\n*2\r\n$1\r\na\r\n$1\r\nb\r\n$1\r\nc\r\n")
            .await
            .unwrap();
        assert_eq!(read_len(&mut client, 4).await, b":2\r\n");
    }

    #[tokio::test]
    async fn test_serve_with_shutdown_returns() {
        let server = echo_server().build();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            server
                .serve_with_shutdown(listener, async {
                    let _ = rx.await;
                })
                .await
        });

        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("serve_with_shutdown should return")
            .unwrap();
    }

    #[test]
    fn test_pool_is_per_server_unless_shared() {
        let a = ServerBuilder::new().build();
        let b = ServerBuilder::new().build();
        assert!(!Arc::ptr_eq(a.buffer_pool(), b.buffer_pool()));

        let shared = Arc::new(BufferPool::new());
        let c = ServerBuilder::new().buffer_pool(Arc::clone(&shared)).build();
        let d = ServerBuilder::new().buffer_pool(Arc::clone(&shared)).build();
        assert!(Arc::ptr_eq(c.buffer_pool(), d.buffer_pool()));
    }

    #[test]
    fn test_builder_config_is_kept() {
        let config = ServerConfig {
            array_mode: ArrayMode::Nested,
            idle_timeout: Some(Duration::from_secs(5)),
            ..ServerConfig::default()
        };
        let server = Server::builder().config(config).build();

        assert_eq!(server.config().array_mode, ArrayMode::Nested);
        assert_eq!(server.config().idle_timeout, Some(Duration::from_secs(5)));
        assert_eq!(server.stats().connections_accepted.load(Ordering::Relaxed), 0);
    }
}
