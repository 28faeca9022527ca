//! Fixed-size byte chunk pool for SQLGate frame buffers.
//!
//! Every in-flight backend exchange borrows exactly one chunk to stage
//! request bytes and reassemble response packets. The pool is the only
//! structure shared across reactor threads, so checkout and return are
//! guarded by a plain mutex; chunks themselves are exclusively owned by
//! one exchange from acquire to release.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A fixed-size reusable byte buffer obtained from a [`ChunkPool`].
#[derive(Debug)]
pub struct Chunk {
    data: Box<[u8]>,
}

impl Chunk {
    fn zeroed(size: usize) -> Self {
        Self {
            data: vec![0u8; size].into_boxed_slice(),
        }
    }

    /// The chunk capacity in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the chunk has zero capacity (never true for pooled chunks).
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The chunk contents.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// The chunk contents, mutable.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

/// Pool statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct PoolStats {
    /// Chunks currently sitting in the free list
    pub available: usize,
    /// Chunks allocated over the pool's lifetime
    pub allocated: usize,
    /// Chunks currently checked out
    pub in_use: usize,
}

/// A pool of fixed-size byte chunks.
///
/// `acquire` pops a free chunk or allocates a fresh one; `release` puts
/// it back for reuse. Share across threads behind an `Arc`.
#[derive(Debug)]
pub struct ChunkPool {
    chunk_size: usize,
    free: Mutex<Vec<Chunk>>,
    allocated: AtomicUsize,
    in_use: AtomicUsize,
}

impl ChunkPool {
    /// Default chunk size: enough for typical result-set packets while
    /// keeping per-connection memory bounded.
    pub const DEFAULT_CHUNK_SIZE: usize = 16 * 1024;

    /// Create a pool handing out chunks of `chunk_size` bytes.
    ///
    /// # Panics
    ///
    /// Panics if `chunk_size` is zero.
    pub fn new(chunk_size: usize) -> Self {
        assert!(chunk_size > 0, "chunk size must be non-zero");
        Self {
            chunk_size,
            free: Mutex::new(Vec::new()),
            allocated: AtomicUsize::new(0),
            in_use: AtomicUsize::new(0),
        }
    }

    /// Create a pool with `prealloc` chunks allocated up front.
    pub fn with_capacity(chunk_size: usize, prealloc: usize) -> Self {
        let pool = Self::new(chunk_size);
        {
            let mut free = pool.free.lock().expect("chunk pool poisoned");
            for _ in 0..prealloc {
                free.push(Chunk::zeroed(chunk_size));
            }
        }
        pool.allocated.store(prealloc, Ordering::Relaxed);
        pool
    }

    /// The size of every chunk handed out by this pool.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Check out a chunk, allocating if the free list is empty.
    pub fn acquire(&self) -> Chunk {
        let reused = self.free.lock().expect("chunk pool poisoned").pop();
        self.in_use.fetch_add(1, Ordering::Relaxed);
        match reused {
            Some(chunk) => chunk,
            None => {
                self.allocated.fetch_add(1, Ordering::Relaxed);
                Chunk::zeroed(self.chunk_size)
            }
        }
    }

    /// Return a chunk for reuse.
    ///
    /// Chunks from a different pool (wrong size) are dropped instead of
    /// being admitted to the free list.
    pub fn release(&self, chunk: Chunk) {
        self.in_use.fetch_sub(1, Ordering::Relaxed);
        if chunk.len() == self.chunk_size {
            self.free.lock().expect("chunk pool poisoned").push(chunk);
        }
    }

    /// Current pool statistics.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            available: self.free.lock().expect("chunk pool poisoned").len(),
            allocated: self.allocated.load(Ordering::Relaxed),
            in_use: self.in_use.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn acquire_and_release_round_trip() {
        let pool = ChunkPool::new(1024);
        let chunk = pool.acquire();
        assert_eq!(chunk.len(), 1024);
        assert_eq!(pool.stats().in_use, 1);

        pool.release(chunk);
        let stats = pool.stats();
        assert_eq!(stats.in_use, 0);
        assert_eq!(stats.available, 1);

        // The freed chunk is reused rather than reallocated.
        let _chunk = pool.acquire();
        assert_eq!(pool.stats().allocated, 1);
    }

    #[test]
    fn prealloc_fills_free_list() {
        let pool = ChunkPool::with_capacity(512, 4);
        let stats = pool.stats();
        assert_eq!(stats.available, 4);
        assert_eq!(stats.allocated, 4);
    }

    #[test]
    fn foreign_chunk_is_dropped() {
        let small = ChunkPool::new(64);
        let big = ChunkPool::new(128);
        let chunk = big.acquire();
        small.release(chunk);
        assert_eq!(small.stats().available, 0);
    }

    #[test]
    fn concurrent_checkout_return() {
        let pool = Arc::new(ChunkPool::new(256));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let pool = Arc::clone(&pool);
            handles.push(std::thread::spawn(move || {
                for _ in 0..100 {
                    let mut chunk = pool.acquire();
                    chunk.as_mut_slice()[0] = 0xAB;
                    pool.release(chunk);
                }
            }));
        }
        for h in handles {
            h.join().expect("worker thread");
        }
        assert_eq!(pool.stats().in_use, 0);
    }
}
