//! Server configuration.

use crate::protocol::ArrayMode;
use std::time::Duration;

/// Upper bound on buffered, not yet parsed request bytes (64 MB)
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 64 * 1024 * 1024;

/// Tunables for a [`Server`](crate::server::Server).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// How sub-arrays in multi-bulk requests are decoded
    pub array_mode: ArrayMode,

    /// A connection whose read buffer reaches this size without yielding a
    /// complete request is dropped. Bulk strings declared longer than this
    /// are rejected as soon as their header arrives.
    pub max_buffer_size: usize,

    /// Close connections that send nothing for this long.
    ///
    /// `None` waits forever, including for a client that stops part way
    /// through a request (for example a bulk string shorter than its
    /// declared length) without closing its side. Set a timeout to bound
    /// how long such a connection is kept.
    pub idle_timeout: Option<Duration>,

    /// Set `TCP_NODELAY` on accepted sockets
    pub nodelay: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            array_mode: ArrayMode::Flatten,
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            idle_timeout: None,
            nodelay: true,
        }
    }
}
