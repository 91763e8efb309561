//! Core copy pipeline
//!
//! The work queue, shared statistics, chunk-size sampler, per-file state
//! machine, and the ring worker that drives them. The synchronous
//! copy_file_range fallback lives here too.

mod context;
mod machine;
mod queue;
mod sampler;
mod stats;
mod sync_copy;
mod worker;

pub use context::{BufferSlot, ContextSlab, CopyStrategy, FileContext, FileState, OpKind, NO_FD};
pub use machine::{advance, CopyTuning};
pub use queue::WorkQueue;
pub use sampler::{SizeStats, DEFAULT_CHUNK_SIZE};
pub use stats::{Stats, StatsSnapshot};
pub use sync_copy::run_sync_worker;
pub use worker::Worker;
