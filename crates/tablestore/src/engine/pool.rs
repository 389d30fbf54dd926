//! Reusable request body buffers.
//!
//! The pool is owned by the transport layer. Every request body is written
//! into a [`PooledBuffer`]; dropping the buffer hands its allocation back.
//! [`BufferPool::outstanding`] counts buffers that have been acquired and
//! not yet dropped, so it is zero whenever no operation is in flight.

use std::io;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

/// Free buffers kept for reuse.
const MAX_POOLED_BUFFERS: usize = 16;

/// Buffers larger than this are released instead of pooled.
const MAX_POOLED_CAPACITY: usize = 4 * 1024 * 1024 + 64 * 1024;

#[derive(Debug, Default)]
struct PoolInner {
    free: Mutex<Vec<Vec<u8>>>,
    outstanding: AtomicUsize,
}

/// A pool of byte buffers shared by every request a client sends.
#[derive(Debug, Clone, Default)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl BufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Borrows an empty buffer.
    pub fn acquire(&self) -> PooledBuffer {
        let buf = self.inner.free.lock().pop().unwrap_or_default();
        self.inner.outstanding.fetch_add(1, Ordering::AcqRel);
        PooledBuffer {
            buf,
            pool: Arc::clone(&self.inner),
        }
    }

    /// Number of buffers currently borrowed.
    pub fn outstanding(&self) -> usize {
        self.inner.outstanding.load(Ordering::Acquire)
    }

    /// Number of idle buffers held for reuse.
    pub fn pooled(&self) -> usize {
        self.inner.free.lock().len()
    }
}

/// A buffer borrowed from a [`BufferPool`].
#[derive(Debug)]
pub struct PooledBuffer {
    buf: Vec<u8>,
    pool: Arc<PoolInner>,
}

impl PooledBuffer {
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.buf
    }
}

impl io::Write for PooledBuffer {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.buf.extend_from_slice(data);
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let mut buf = std::mem::take(&mut self.buf);
        if buf.capacity() <= MAX_POOLED_CAPACITY {
            buf.clear();
            let mut free = self.pool.free.lock();
            if free.len() < MAX_POOLED_BUFFERS {
                free.push(buf);
            }
        }
        self.pool.outstanding.fetch_sub(1, Ordering::AcqRel);
    }
}
