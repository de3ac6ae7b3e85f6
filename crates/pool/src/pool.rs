use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

fn default_initial_size() -> u64 {
    1024 * 1024
}
fn default_max_size() -> u64 {
    100 * 1024 * 1024
}
fn default_block_size() -> usize {
    4096
}
fn default_growth_factor() -> u32 {
    2
}
fn default_true() -> bool {
    true
}
fn default_preallocation_blocks() -> usize {
    1_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    #[serde(default = "default_initial_size")]
    pub initial_size: u64,
    /// Byte cap on pooled blocks; allocations beyond it fall through to the
    /// heap and count as misses.
    #[serde(default = "default_max_size")]
    pub max_size: u64,
    #[serde(default = "default_block_size")]
    pub block_size: usize,
    #[serde(default = "default_growth_factor")]
    pub growth_factor: u32,
    #[serde(default = "default_true")]
    pub enable_preallocation: bool,
    #[serde(default = "default_preallocation_blocks")]
    pub preallocation_blocks: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            initial_size: default_initial_size(),
            max_size: default_max_size(),
            block_size: default_block_size(),
            growth_factor: default_growth_factor(),
            enable_preallocation: true,
            preallocation_blocks: default_preallocation_blocks(),
        }
    }
}

struct PoolInner {
    config: PoolConfig,
    free: Mutex<Vec<Box<[u8]>>>,
    /// Bytes currently sitting in the free list.
    pooled_bytes: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    allocations: AtomicU64,
    deallocations: AtomicU64,
    current_bytes: AtomicU64,
    peak_bytes: AtomicU64,
}

/// Preallocated fixed-block allocator for message payload staging.
///
/// `allocate` serves requests up to `block_size` from the free list and
/// falls back to direct heap allocation above it. Blocks return to the free
/// list when their `PoolBlock` drops, until `max_size` is reached.
#[derive(Clone)]
pub struct MemoryPool {
    inner: Arc<PoolInner>,
}

impl MemoryPool {
    pub fn new(config: PoolConfig) -> Self {
        let inner = Arc::new(PoolInner {
            free: Mutex::new(Vec::new()),
            pooled_bytes: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            allocations: AtomicU64::new(0),
            deallocations: AtomicU64::new(0),
            current_bytes: AtomicU64::new(0),
            peak_bytes: AtomicU64::new(0),
            config,
        });
        let pool = MemoryPool { inner };
        if pool.inner.config.enable_preallocation {
            pool.prefill(pool.inner.config.preallocation_blocks);
        }
        pool
    }

    fn prefill(&self, blocks: usize) {
        let block_size = self.inner.config.block_size;
        let budget = self
            .inner
            .config
            .initial_size
            .min(self.inner.config.max_size);
        let count = blocks.min((budget as usize / block_size.max(1)).max(1));
        let mut free = self.inner.free.lock().unwrap();
        for _ in 0..count {
            free.push(vec![0u8; block_size].into_boxed_slice());
        }
        self.inner
            .pooled_bytes
            .store((count * block_size) as u64, Ordering::Relaxed);
    }

    /// Allocate a zeroed region of at least `size` bytes.
    pub fn allocate(&self, size: usize) -> PoolBlock {
        self.inner.allocations.fetch_add(1, Ordering::Relaxed);
        let current = self
            .inner
            .current_bytes
            .fetch_add(size as u64, Ordering::Relaxed)
            + size as u64;
        self.inner.peak_bytes.fetch_max(current, Ordering::Relaxed);

        if size <= self.inner.config.block_size {
            if let Some(block) = self.inner.free.lock().unwrap().pop() {
                self.inner.hits.fetch_add(1, Ordering::Relaxed);
                self.inner
                    .pooled_bytes
                    .fetch_sub(self.inner.config.block_size as u64, Ordering::Relaxed);
                return PoolBlock {
                    data: Some(block),
                    len: size,
                    pool: Some(Arc::clone(&self.inner)),
                };
            }
        }
        self.inner.misses.fetch_add(1, Ordering::Relaxed);
        let pooled = size <= self.inner.config.block_size;
        let data = vec![0u8; size.max(if pooled { self.inner.config.block_size } else { size })]
            .into_boxed_slice();
        PoolBlock {
            data: Some(data),
            len: size,
            pool: pooled.then(|| Arc::clone(&self.inner)),
        }
    }

    /// Drop every free block, shrinking the pool back to zero reserve.
    pub fn compact(&self) {
        let mut free = self.inner.free.lock().unwrap();
        let released = free.len() * self.inner.config.block_size;
        free.clear();
        free.shrink_to_fit();
        self.inner
            .pooled_bytes
            .fetch_sub(released as u64, Ordering::Relaxed);
        tracing::debug!(released_bytes = released, "compacted memory pool");
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// (hits, misses, allocations, deallocations, current bytes, peak bytes).
    pub fn counters(&self) -> (u64, u64, u64, u64, u64, u64) {
        (
            self.inner.hits.load(Ordering::Relaxed),
            self.inner.misses.load(Ordering::Relaxed),
            self.inner.allocations.load(Ordering::Relaxed),
            self.inner.deallocations.load(Ordering::Relaxed),
            self.inner.current_bytes.load(Ordering::Relaxed),
            self.inner.peak_bytes.load(Ordering::Relaxed),
        )
    }
}

/// A leased region. Dereferences to `[u8]` of the requested length; returns
/// its backing block to the pool on drop when pool-sized.
pub struct PoolBlock {
    data: Option<Box<[u8]>>,
    len: usize,
    pool: Option<Arc<PoolInner>>,
}

impl PoolBlock {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl std::ops::Deref for PoolBlock {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        &self.data.as_ref().expect("block present until drop")[..self.len]
    }
}

impl std::ops::DerefMut for PoolBlock {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data.as_mut().expect("block present until drop")[..self.len]
    }
}

impl Drop for PoolBlock {
    fn drop(&mut self) {
        let Some(data) = self.data.take() else {
            return;
        };
        let Some(pool) = self.pool.take() else {
            return;
        };
        pool.deallocations.fetch_add(1, Ordering::Relaxed);
        pool.current_bytes
            .fetch_sub(self.len as u64, Ordering::Relaxed);
        // Return to the free list unless the reserve is already at its cap.
        let block_size = pool.config.block_size as u64;
        let pooled = pool.pooled_bytes.load(Ordering::Relaxed);
        if pooled + block_size <= pool.config.max_size {
            pool.pooled_bytes.fetch_add(block_size, Ordering::Relaxed);
            pool.free.lock().unwrap().push(data);
        }
    }
}
