//! Reusable connection buffers.
//!
//! Every connection needs a read buffer and a write buffer. Rather than
//! allocating both per accept, the server keeps a [`BufferPool`] and hands
//! out [`PooledBuffer`] guards that put the buffer back when dropped, on
//! every exit path of the connection task.
//!
//! A pool belongs to the server that created it. Two servers only share
//! buffers if the same `Arc<BufferPool>` is handed to both builders.

use bytes::BytesMut;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};
use tracing::trace;

/// Default capacity of a freshly allocated buffer (4 KB)
pub const DEFAULT_BUFFER_CAPACITY: usize = 4096;

/// Default number of idle buffers kept for reuse
pub const DEFAULT_MAX_IDLE: usize = 1024;

/// Buffers that grew past this are dropped instead of pooled (1 MB)
const MAX_RETAINED_CAPACITY: usize = 1024 * 1024;

/// A thread-safe stack of idle byte buffers.
#[derive(Debug)]
pub struct BufferPool {
    idle: Mutex<Vec<BytesMut>>,
    buffer_capacity: usize,
    max_idle: usize,
}

impl BufferPool {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_BUFFER_CAPACITY, DEFAULT_MAX_IDLE)
    }

    /// Creates a pool.
    ///
    /// # Arguments
    ///
    /// * `buffer_capacity` - Capacity of buffers allocated when the pool is empty
    /// * `max_idle` - Upper bound on buffers held while idle
    pub fn with_limits(buffer_capacity: usize, max_idle: usize) -> Self {
        Self {
            idle: Mutex::new(Vec::new()),
            buffer_capacity,
            max_idle,
        }
    }

    /// Takes an idle buffer, or allocates one if none are available.
    ///
    /// The returned buffer is empty.
    pub fn acquire(self: &Arc<Self>) -> PooledBuffer {
        let reused = self.lock().pop();
        let buf = match reused {
            Some(buf) => buf,
            None => {
                trace!(capacity = self.buffer_capacity, "Allocating connection buffer");
                BytesMut::with_capacity(self.buffer_capacity)
            }
        };

        PooledBuffer {
            buf,
            pool: Some(Arc::clone(self)),
        }
    }

    /// Number of buffers currently waiting for reuse.
    pub fn idle(&self) -> usize {
        self.lock().len()
    }

    fn release(&self, mut buf: BytesMut) {
        if buf.capacity() > MAX_RETAINED_CAPACITY {
            return;
        }
        buf.clear();

        let mut idle = self.lock();
        if idle.len() < self.max_idle {
            idle.push(buf);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<BytesMut>> {
        // The stack stays consistent even if a holder panicked.
        self.idle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

/// A buffer on loan from a [`BufferPool`].
///
/// Dereferences to [`BytesMut`]. Returned to its pool on drop.
#[derive(Debug)]
pub struct PooledBuffer {
    buf: BytesMut,
    pool: Option<Arc<BufferPool>>,
}

impl PooledBuffer {
    /// Wraps a buffer that belongs to no pool; dropping it just frees it.
    pub fn unpooled(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
            pool: None,
        }
    }
}

impl Deref for PooledBuffer {
    type Target = BytesMut;

    fn deref(&self) -> &BytesMut {
        &self.buf
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.release(std::mem::take(&mut self.buf));
        }
    }
}
