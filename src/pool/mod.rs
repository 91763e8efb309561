//! Reusable I/O resource pools
//!
//! Each worker owns one buffer pool and one pipe pool, both sized to its
//! ring depth. Pools are worker-private and need no locking.

mod buffer;
mod pipe;

pub use buffer::{BufferPool, BUFFER_ALIGN};
pub use pipe::{PipeHandle, PipePool};
