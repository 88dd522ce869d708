//! Loanable byte buffers for packet headers and full-block payloads.
//!
//! Two lock-free free lists back the pool: one of header-sized buffers and
//! one of block-sized buffers. A `PooledBuffer` returns itself to the list it
//! came from on drop, so every exit path of the decode routine gives its
//! buffers back without explicit bookkeeping.

use crate::{BLOCK_SIZE, PACKET_HEADER_SIZE};
use crossbeam::queue::ArrayQueue;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

#[derive(Debug, Clone, Copy)]
pub struct BufferPoolConfig {
    /// Number of pre-allocated header buffers
    pub header_pool_size: usize,
    /// Number of pre-allocated block buffers
    pub block_pool_size: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self {
            header_pool_size: 1024,
            block_pool_size: 64,
        }
    }
}

pub struct BufferPool {
    headers: Arc<ArrayQueue<Vec<u8>>>,
    blocks: Arc<ArrayQueue<Vec<u8>>>,
}

impl BufferPool {
    #[must_use]
    pub fn new(config: BufferPoolConfig) -> Self {
        Self {
            headers: prefill(config.header_pool_size, PACKET_HEADER_SIZE),
            blocks: prefill(config.block_pool_size, BLOCK_SIZE),
        }
    }

    /// Borrow a zeroed buffer of exactly `PACKET_HEADER_SIZE` bytes.
    ///
    /// Falls back to a fresh allocation when the free list is empty; the
    /// fresh buffer is donated to the pool on drop.
    #[must_use]
    pub fn header(&self) -> PooledBuffer {
        loan(&self.headers, PACKET_HEADER_SIZE)
    }

    /// Borrow a zeroed buffer of exactly `BLOCK_SIZE` bytes.
    #[must_use]
    pub fn block(&self) -> PooledBuffer {
        loan(&self.blocks, BLOCK_SIZE)
    }

    #[inline]
    #[must_use]
    pub fn available_headers(&self) -> usize {
        self.headers.len()
    }

    #[inline]
    #[must_use]
    pub fn available_blocks(&self) -> usize {
        self.blocks.len()
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(BufferPoolConfig::default())
    }
}

fn prefill(count: usize, size: usize) -> Arc<ArrayQueue<Vec<u8>>> {
    let queue = Arc::new(ArrayQueue::new(count.max(1)));
    for _ in 0..count {
        let _ = queue.push(vec![0u8; size]);
    }
    queue
}

fn loan(queue: &Arc<ArrayQueue<Vec<u8>>>, size: usize) -> PooledBuffer {
    let mut buf = queue.pop().unwrap_or_default();
    buf.clear();
    buf.resize(size, 0);
    PooledBuffer {
        buf,
        home: Some(Arc::clone(queue)),
    }
}

/// A byte buffer that is either on loan from a `BufferPool` or owned outright.
///
/// Derefs to `[u8]`. Loaned buffers go back to their free list on drop; if
/// the list is already full the buffer is simply freed.
#[derive(Default)]
pub struct PooledBuffer {
    buf: Vec<u8>,
    home: Option<Arc<ArrayQueue<Vec<u8>>>>,
}

impl PooledBuffer {
    /// Wrap an owned allocation that never returns to a pool.
    #[must_use]
    pub fn detached(buf: Vec<u8>) -> Self {
        Self { buf, home: None }
    }

    /// Zero-filled owned buffer of `len` bytes.
    #[must_use]
    pub fn zeroed(len: usize) -> Self {
        Self::detached(vec![0u8; len])
    }

    #[inline]
    #[must_use]
    pub fn is_pooled(&self) -> bool {
        self.home.is_some()
    }

    /// Shrink or grow to `len` bytes (zero-filled when growing).
    #[inline]
    pub fn resize(&mut self, len: usize) {
        self.buf.resize(len, 0);
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.buf
    }
}

impl Deref for PooledBuffer {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &[u8] {
        &self.buf
    }
}

impl DerefMut for PooledBuffer {
    #[inline]
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }
}

impl AsRef<[u8]> for PooledBuffer {
    #[inline]
    fn as_ref(&self) -> &[u8] {
        &self.buf
    }
}

impl std::fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("len", &self.buf.len())
            .field("pooled", &self.home.is_some())
            .finish()
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(home) = self.home.take() {
            let buf = std::mem::take(&mut self.buf);
            // Best-effort return; a full free list just frees the buffer
            let _ = home.push(buf);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn small_pool() -> BufferPool {
        BufferPool::new(BufferPoolConfig {
            header_pool_size: 2,
            block_pool_size: 1,
        })
    }

    #[test]
    fn test_header_loan_and_return() {
        let pool = small_pool();
        assert_eq!(pool.available_headers(), 2);

        let h1 = pool.header();
        assert_eq!(h1.len(), PACKET_HEADER_SIZE);
        assert!(h1.is_pooled());
        assert_eq!(pool.available_headers(), 1);

        drop(h1);
        assert_eq!(pool.available_headers(), 2);
    }

    #[test]
    fn test_block_fallback_is_donated() {
        let pool = small_pool();
        let b1 = pool.block();
        assert_eq!(pool.available_blocks(), 0);

        // Free list empty: fresh allocation, still returnable
        let b2 = pool.block();
        assert_eq!(b2.len(), BLOCK_SIZE);
        assert!(b2.is_pooled());

        drop(b1);
        assert_eq!(pool.available_blocks(), 1);

        // Capacity 1: the excess buffer is freed
        drop(b2);
        assert_eq!(pool.available_blocks(), 1);
    }

    #[test]
    fn test_loaned_buffer_is_zeroed() {
        let pool = small_pool();
        let mut h = pool.header();
        h.as_mut_slice().fill(0xAB);
        drop(h);

        let h = pool.header();
        assert!(h.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_detached_never_returns() {
        let pool = small_pool();
        let _held = pool.header();
        let before = pool.available_headers();

        let mut owned = PooledBuffer::zeroed(16);
        owned.resize(8);
        assert_eq!(owned.len(), 8);
        assert!(!owned.is_pooled());
        drop(owned);

        assert_eq!(pool.available_headers(), before);
    }
}
