//! Shared transfer statistics
//!
//! A single stats object owned by the orchestrator and updated by workers
//! through a narrow interface. Counters are relaxed atomics; readers take a
//! point-in-time snapshot for progress display. Counter wrap-around on u64
//! is accepted in practice.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters for an in-progress transfer
#[derive(Debug, Default)]
pub struct Stats {
    files_total: AtomicU64,
    files_completed: AtomicU64,
    files_failed: AtomicU64,
    bytes_total: AtomicU64,
    bytes_copied: AtomicU64,
    dirs_created: AtomicU64,
}

impl Stats {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the number of files discovered by the scanner
    pub fn set_files_total(&self, n: u64) {
        self.files_total.store(n, Ordering::Relaxed);
    }

    /// Add to the total byte count (called once a file's size is known)
    pub fn add_bytes_total(&self, n: u64) {
        self.bytes_total.fetch_add(n, Ordering::Relaxed);
    }

    /// Add to the copied byte count (called as write halves complete)
    pub fn add_bytes_copied(&self, n: u64) {
        self.bytes_copied.fetch_add(n, Ordering::Relaxed);
    }

    /// Record one file reaching its terminal Done state
    pub fn file_completed(&self) {
        self.files_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one file reaching its terminal Failed state
    pub fn file_failed(&self) {
        self.files_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one destination directory created
    pub fn dir_created(&self) {
        self.dirs_created.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a point-in-time snapshot of all counters
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            files_total: self.files_total.load(Ordering::Relaxed),
            files_completed: self.files_completed.load(Ordering::Relaxed),
            files_failed: self.files_failed.load(Ordering::Relaxed),
            bytes_total: self.bytes_total.load(Ordering::Relaxed),
            bytes_copied: self.bytes_copied.load(Ordering::Relaxed),
            dirs_created: self.dirs_created.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of the transfer counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Files discovered by the scanner
    pub files_total: u64,
    /// Files copied successfully
    pub files_completed: u64,
    /// Files that failed
    pub files_failed: u64,
    /// Total bytes discovered
    pub bytes_total: u64,
    /// Bytes written so far
    pub bytes_copied: u64,
    /// Destination directories created
    pub dirs_created: u64,
}

impl StatsSnapshot {
    /// True once every discovered file has reached a terminal state
    pub fn is_complete(&self) -> bool {
        self.files_completed + self.files_failed >= self.files_total
    }

    /// Byte completion as a percentage (0.0 when nothing is known yet)
    pub fn percent(&self) -> f64 {
        if self.bytes_total == 0 {
            0.0
        } else {
            100.0 * self.bytes_copied as f64 / self.bytes_total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_snapshot_reflects_updates() {
        let stats = Stats::new();
        stats.set_files_total(3);
        stats.add_bytes_total(100);
        stats.add_bytes_copied(40);
        stats.file_completed();
        stats.file_failed();

        let snap = stats.snapshot();
        assert_eq!(snap.files_total, 3);
        assert_eq!(snap.files_completed, 1);
        assert_eq!(snap.files_failed, 1);
        assert_eq!(snap.bytes_total, 100);
        assert_eq!(snap.bytes_copied, 40);
        assert!(!snap.is_complete());

        stats.file_completed();
        assert!(stats.snapshot().is_complete());
    }

    #[test]
    fn test_percent() {
        let stats = Stats::new();
        assert_eq!(stats.snapshot().percent(), 0.0);

        stats.add_bytes_total(200);
        stats.add_bytes_copied(50);
        assert!((stats.snapshot().percent() - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_concurrent_increments() {
        let stats = Arc::new(Stats::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let stats = Arc::clone(&stats);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        stats.add_bytes_copied(1);
                        stats.file_completed();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().expect("thread panicked");
        }

        let snap = stats.snapshot();
        assert_eq!(snap.bytes_copied, 8000);
        assert_eq!(snap.files_completed, 8000);
    }
}
