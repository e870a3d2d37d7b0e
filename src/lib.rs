//! # FlashRESP - An Embeddable RESP Server Engine
//!
//! FlashRESP speaks the Redis Serialization Protocol (RESP) over TCP and
//! leaves the meaning of each command to the application. You register a
//! handler per command name; the engine parses requests, dispatches them,
//! and gives each handler a writer for its response.
//!
//! ## Features
//!
//! - **Redis-Compatible Framing**: simple, bulk, multi-bulk and inline requests
//! - **Typed Responses**: a closed `Response` enum with exact RESP encodings
//! - **Async I/O**: Built on Tokio, one task per connection
//! - **Pooled Buffers**: per-server, injectable read/write buffer pool
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              FlashRESP                                  │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │ TCP Server  │───>│ Connection  │───>│ Dispatcher  │                  │
//! │  │ (Listener)  │    │  Handler    │    │ (Command    │                  │
//! │  └─────────────┘    └──────┬──────┘    │  Table)     │                  │
//! │                            │           └──────┬──────┘                  │
//! │                            ▼                  ▼                         │
//! │                     ┌─────────────┐    ┌─────────────┐                  │
//! │                     │   Request   │    │ Application │                  │
//! │                     │   Parser    │    │  Handlers   │                  │
//! │                     └─────────────┘    └──────┬──────┘                  │
//! │                                               │                         │
//! │  ┌─────────────┐                              ▼                         │
//! │  │ BufferPool  │─────────────────────> ResponseWriter                   │
//! │  └─────────────┘                                                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use flashresp::ServerBuilder;
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let server = ServerBuilder::new()
//!         .handle("ping", |_req, w| Box::pin(async move {
//!             w.write_string("PONG").await?;
//!             Ok(())
//!         }))
//!         .build();
//!
//!     let listener = TcpListener::bind("127.0.0.1:6379").await?;
//!     server.serve(listener).await;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`protocol`]: request parser, response types and the response writer
//! - [`commands`]: command table and dispatch
//! - [`connection`]: per-connection loop, statistics and buffer pool
//! - [`server`]: builder and accept loop
//! - [`config`]: server tunables
//!
//! ## Concurrency
//!
//! Requests on one connection are handled strictly one after another, and
//! their responses go out in the same order. Different connections run
//! independently. The command table is frozen when the server is built;
//! handlers own whatever state they share between requests.

pub mod commands;
pub mod config;
pub mod connection;
pub mod protocol;
pub mod server;

// Re-export commonly used types for convenience
pub use commands::{BoxFuture, CommandTable, Dispatcher, HandlerResult};
pub use config::ServerConfig;
pub use connection::{BufferPool, ConnectionError, ConnectionStats};
pub use protocol::{ArrayMode, ParseError, Request, RequestParser, Response, ResponseWriter, Value};
pub use server::{Server, ServerBuilder};

/// The default port (same as Redis)
pub const DEFAULT_PORT: u16 = 6379;

/// The default host
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of FlashRESP
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
