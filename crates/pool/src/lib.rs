//! Performance fast path: a fixed-block memory pool, zero-copy payload
//! buffers, and batch containers.
//!
//! The zero-copy buffer type is `message::ExternalBuf`; it is re-exported
//! here so fast-path callers have one import surface.

mod batch;
mod pool;

pub use batch::MessageBatch;
pub use message::ExternalBuf as ZeroCopyBuffer;
pub use pool::{MemoryPool, PoolBlock, PoolConfig};
