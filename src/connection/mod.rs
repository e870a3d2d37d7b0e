//! Connection Handler Module
//!
//! This module manages individual client connections.
//! Each client connection is handled by its own async task, so a slow
//! client never holds up the others.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     TCP Listener                            │
//! │                    (server.rs)                              │
//! └──────────────────────┬──────────────────────────────────────┘
//!                        │
//!                        │ accept()
//!                        ▼
//!           ┌────────────────────────┐
//!           │   For each client...   │
//!           └────────────┬───────────┘
//!                        │
//!                        │ spawn task
//!                        ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 ConnectionHandler                           │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐     │
//! │  │ Read bytes  │───>│ Parse RESP  │───>│  Dispatch   │     │
//! │  └─────────────┘    └─────────────┘    └─────────────┘     │
//! │         ▲                                     │             │
//! │         │            BufferPool               ▼             │
//! │   read buffer  <───  (shared)  ───>  ResponseWriter        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **Async I/O**: Uses Tokio for non-blocking network operations
//! - **Pooled Buffers**: Read and write buffers are reused across connections
//! - **Pipelining**: Multiple requests in one TCP packet are handled in order
//! - **Statistics**: Tracks connection and request metrics

pub mod handler;
pub mod pool;

// Re-export commonly used types
pub use handler::{
    handle_connection, ConnectionContext, ConnectionError, ConnectionHandler, ConnectionStats,
};
pub use pool::{BufferPool, PooledBuffer};
