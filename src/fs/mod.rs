//! File system scanning
//!
//! Enumerates the source tree into a stream of copy jobs and builds the
//! destination directory skeleton.

mod scanner;

pub use scanner::{collect_relative, scan_tree, sort_by_locality, FileJob, ScanOutcome};
