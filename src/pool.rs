//! Fixed-size buffer pool.
//!
//! Every connection reads into one pooled buffer for its whole lifetime, so
//! peak buffer memory is bounded by the pool size rather than the connection
//! count, and the hot path never allocates.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};

/// Size of each pooled buffer. One byte is reserved so a full request block
/// can always be distinguished from an overflowing one.
pub const BUFFER_SIZE: usize = 8 * 1024;

/// Number of buffers in the pool.
pub const POOL_CAPACITY: usize = 1024;

#[derive(Debug, PartialEq, Eq)]
pub struct ResourceExhausted;

impl std::fmt::Display for ResourceExhausted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "buffer pool exhausted")
    }
}

impl std::error::Error for ResourceExhausted {}

#[derive(Debug)]
struct Inner {
    free: Mutex<Vec<Vec<u8>>>,
}

/// Pool of equally-sized byte buffers recycled across connections.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<Inner>,
}

impl BufferPool {
    pub fn new() -> Self {
        Self::with_capacity(POOL_CAPACITY, BUFFER_SIZE)
    }

    pub fn with_capacity(count: usize, size: usize) -> Self {
        let free = (0..count).map(|_| vec![0u8; size]).collect();
        Self {
            inner: Arc::new(Inner {
                free: Mutex::new(free),
            }),
        }
    }

    /// Takes a buffer out of the pool.
    ///
    /// The buffer is handed back automatically when the returned guard is
    /// dropped. Fails when every buffer is already held by a connection.
    pub fn acquire(&self) -> Result<PooledBuffer, ResourceExhausted> {
        let mut free = self.inner.free.lock().unwrap();
        match free.pop() {
            Some(buf) => Ok(PooledBuffer {
                buf: Some(buf),
                pool: Arc::clone(&self.inner),
            }),
            None => Err(ResourceExhausted),
        }
    }

    /// Buffers currently sitting in the pool.
    pub fn available(&self) -> usize {
        self.inner.free.lock().unwrap().len()
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive hold on one pooled buffer. Contents are whatever the previous
/// holder left behind; consumers track their own fill offset.
#[derive(Debug)]
pub struct PooledBuffer {
    buf: Option<Vec<u8>>,
    pool: Arc<Inner>,
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.buf.as_ref().unwrap()
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.buf.as_mut().unwrap()
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.free.lock().unwrap().push(buf);
        }
    }
}
