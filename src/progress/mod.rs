//! Progress reporting
//!
//! Real-time progress bars fed from stats snapshots.

mod reporter;

pub use reporter::ProgressReporter;
