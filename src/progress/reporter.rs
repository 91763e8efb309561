//! Progress reporter implementation
//!
//! indicatif progress bars driven by snapshots of the shared stats: the
//! orchestrator polls [`crate::core::Stats`] and pushes the absolute
//! positions here, so workers never touch the terminal.

use crate::core::StatsSnapshot;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::Instant;

/// Progress bars for a running transfer
pub struct ProgressReporter {
    multi: MultiProgress,
    files_bar: ProgressBar,
    bytes_bar: ProgressBar,
    start_time: Instant,
    enabled: bool,
}

impl ProgressReporter {
    /// Create an enabled reporter
    pub fn new() -> Self {
        let multi = MultiProgress::new();

        let files_bar = multi.add(ProgressBar::new(0));
        files_bar.set_style(
            ProgressStyle::default_bar()
                .template("{prefix:.bold.dim} [{bar:40.cyan/blue}] {pos}/{len} files ({percent}%)")
                .expect("Invalid template")
                .progress_chars("=> "),
        );
        files_bar.set_prefix("Files");

        let bytes_bar = multi.add(ProgressBar::new(0));
        bytes_bar.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{prefix:.bold.dim} [{bar:40.green/white}] {bytes}/{total_bytes} ({bytes_per_sec}, ETA {eta})",
                )
                .expect("Invalid template")
                .progress_chars("=> "),
        );
        bytes_bar.set_prefix("Data ");

        Self {
            multi,
            files_bar,
            bytes_bar,
            start_time: Instant::now(),
            enabled: true,
        }
    }

    /// Create a hidden reporter (for quiet mode)
    pub fn disabled() -> Self {
        let reporter = Self::new();
        reporter.multi.set_draw_target(ProgressDrawTarget::hidden());
        Self {
            enabled: false,
            ..reporter
        }
    }

    /// Whether bars are drawn
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Record the totals once scanning completes
    pub fn set_totals(&self, files: u64, bytes: u64) {
        self.files_bar.set_length(files);
        self.bytes_bar.set_length(bytes);
    }

    /// Push the latest counters onto the bars
    pub fn update(&self, snapshot: &StatsSnapshot) {
        self.files_bar
            .set_position(snapshot.files_completed + snapshot.files_failed);
        self.files_bar.set_length(snapshot.files_total);
        self.bytes_bar.set_position(snapshot.bytes_copied);
        self.bytes_bar.set_length(snapshot.bytes_total);
    }

    /// Seconds since the reporter was created
    pub fn elapsed_secs(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64()
    }

    /// Complete the bars successfully
    pub fn finish(&self) {
        self.files_bar.finish();
        self.bytes_bar.finish();
    }

    /// Abandon the bars after a failure
    pub fn abandon(&self) {
        self.files_bar.abandon();
        self.bytes_bar.abandon();
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}
