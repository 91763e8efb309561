//! File-size sampling and chunk-size auto-tuning
//!
//! The scanner feeds every file size through [`SizeStats`]. The first 20
//! sizes are all retained; after that every N-th file is sampled with
//! `N = max(1, count / 100)`, capped at 200 retained samples. The p90 of the
//! sample drives the chunk size used by the copy pipeline: trees full of
//! small files get small chunks (more files in flight per buffer pool),
//! trees of large files get large chunks (fewer syscalls per byte).

/// Chunk size used when no files were sampled
pub const DEFAULT_CHUNK_SIZE: usize = 128 * 1024;

/// Number of leading files retained unconditionally
const KEEP_ALL_THRESHOLD: u64 = 20;

/// Maximum number of retained samples
const MAX_SAMPLES: usize = 200;

/// Reservoir-like sample of scanned file sizes
#[derive(Debug, Clone, Default)]
pub struct SizeStats {
    samples: Vec<u64>,
    count: u64,
}

impl SizeStats {
    /// Create an empty sampler
    pub fn new() -> Self {
        Self::default()
    }

    /// Observe one scanned file's size
    pub fn observe(&mut self, size: u64) {
        self.count += 1;

        if self.count <= KEEP_ALL_THRESHOLD {
            self.samples.push(size);
            return;
        }

        let stride = (self.count / 100).max(1);
        if self.count % stride == 0 && self.samples.len() < MAX_SAMPLES {
            self.samples.push(size);
        }
    }

    /// Number of files observed (not retained)
    pub fn count(&self) -> u64 {
        self.count
    }

    /// True if nothing was observed
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Size at the given percentile of the retained sample, if any
    pub fn percentile(&self, pct: u32) -> Option<u64> {
        if self.samples.is_empty() {
            return None;
        }
        let mut sorted = self.samples.clone();
        sorted.sort_unstable();
        let idx = (sorted.len() * pct as usize / 100).min(sorted.len() - 1);
        Some(sorted[idx])
    }

    /// Pick a chunk size from the p90 of the sampled distribution
    pub fn pick_chunk_size(&self) -> usize {
        const KIB: u64 = 1024;
        const MIB: u64 = 1024 * 1024;

        match self.percentile(90) {
            None => DEFAULT_CHUNK_SIZE,
            Some(p90) if p90 <= 32 * KIB => 64 * 1024,
            Some(p90) if p90 <= 128 * KIB => 128 * 1024,
            Some(p90) if p90 <= 512 * KIB => 256 * 1024,
            Some(p90) if p90 <= 2 * MIB => 512 * 1024,
            Some(_) => 1024 * 1024,
        }
    }

    /// Log a short distribution summary at info level
    pub fn log_summary(&self) {
        tracing::info!(
            files = self.count,
            samples = self.samples.len(),
            p50 = self.percentile(50),
            p90 = self.percentile(90),
            p99 = self.percentile(99),
            "file size distribution"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_defaults() {
        let stats = SizeStats::new();
        assert!(stats.is_empty());
        assert_eq!(stats.percentile(90), None);
        assert_eq!(stats.pick_chunk_size(), DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn test_first_twenty_all_kept() {
        let mut stats = SizeStats::new();
        for i in 0..20 {
            stats.observe(i);
        }
        assert_eq!(stats.samples.len(), 20);
        assert_eq!(stats.count(), 20);
    }

    #[test]
    fn test_decimation_after_threshold() {
        let mut stats = SizeStats::new();
        for i in 0..1000 {
            stats.observe(i);
        }
        // Retained count must stay within the cap while the observation
        // count keeps growing.
        assert!(stats.samples.len() <= MAX_SAMPLES);
        assert!(stats.samples.len() > 20);
        assert_eq!(stats.count(), 1000);
    }

    #[test]
    fn test_cap_never_exceeded() {
        let mut stats = SizeStats::new();
        for i in 0..100_000 {
            stats.observe(i);
        }
        assert!(stats.samples.len() <= MAX_SAMPLES);
    }

    #[test]
    fn test_percentile_ordering() {
        let mut stats = SizeStats::new();
        for size in [5u64, 1, 9, 3, 7] {
            stats.observe(size);
        }
        assert_eq!(stats.percentile(0), Some(1));
        assert_eq!(stats.percentile(100), Some(9));
        let p50 = stats.percentile(50).expect("non-empty sample");
        assert!((1..=9).contains(&p50));
    }

    #[test]
    fn test_chunk_size_table() {
        let cases = [
            (16 * 1024, 64 * 1024),
            (32 * 1024, 64 * 1024),
            (100 * 1024, 128 * 1024),
            (400 * 1024, 256 * 1024),
            (1024 * 1024, 512 * 1024),
            (64 * 1024 * 1024, 1024 * 1024),
        ];
        for (size, expected) in cases {
            let mut stats = SizeStats::new();
            stats.observe(size);
            assert_eq!(stats.pick_chunk_size(), expected, "p90 = {size}");
        }
    }
}
