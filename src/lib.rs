//! # ringsync - High-Throughput File-Tree Replication
//!
//! ringsync reproduces a source tree's regular files at a destination with
//! matching content and permission bits, driving all file I/O through
//! io_uring: opens, stats, reads, writes, splices, and closes are submitted
//! in batches and reaped as completions, with a per-file state machine
//! advancing each file through the pipeline.
//!
//! ## Architecture
//!
//! - **Work queue**: thread-safe FIFO of file jobs with a terminal done
//!   signal; the only point of contention between workers.
//! - **Workers**: each owns one ring, one pool of 4096-aligned buffers,
//!   and one pool of kernel pipes, all sized to the ring depth.
//! - **State machine**: per-file progression `open → stat → open-dst →
//!   {read↔write | splice-in↔splice-out} → close → close → done`, with at
//!   most one outstanding operation per file.
//! - **Network mode**: the same discipline with socket send/recv swapped
//!   in, plus a framed wire protocol and optional kernel TLS keyed from a
//!   pre-shared secret.
//!
//! ## Quick Start
//!
//! ```no_run
//! use ringsync::core::{CopyTuning, Stats, WorkQueue, Worker};
//! use ringsync::fs::scan_tree;
//! use std::path::Path;
//!
//! let outcome = scan_tree(Path::new("/source"), Path::new("/destination")).unwrap();
//! let queue = WorkQueue::new();
//! queue.push_bulk(outcome.jobs);
//! queue.set_done();
//!
//! let stats = Stats::new();
//! let tuning = CopyTuning { chunk_size: outcome.size_stats.pick_chunk_size(), use_splice: true };
//! let mut worker = Worker::new(64, tuning).unwrap();
//! worker.run(&queue, &stats).unwrap();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod core;
pub mod error;
pub mod fs;
pub mod net;
pub mod pool;
pub mod progress;
pub mod ring;

// Re-export commonly used types
pub use config::{CliArgs, Commands, CopyConfig};
pub use core::{Stats, StatsSnapshot, WorkQueue, Worker};
pub use error::{Result, RingSyncError};
pub use fs::FileJob;
pub use progress::ProgressReporter;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
