//! Source tree enumeration
//!
//! Walks the source, yields one [`FileJob`] per regular file, creates the
//! destination directory skeleton as it goes, and feeds every file size
//! through the chunk-size sampler. Metadata collection is parallelized
//! since a cold stat per file dominates large-tree scans.
//!
//! Jobs carry the source inode so the orchestrator can sort them into
//! approximate on-disk order; inode order tracks physical allocation order
//! closely enough to turn random reads into mostly-sequential ones.

use crate::core::SizeStats;
use crate::error::{IoResultExt, Result, RingSyncError};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// One file to replicate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileJob {
    /// Absolute source path
    pub src_path: PathBuf,
    /// Absolute destination path
    pub dst_path: PathBuf,
    /// Source inode, for locality ordering
    pub inode: u64,
    /// Size observed at scan time
    pub size: u64,
}

/// Result of scanning a source tree
#[derive(Debug, Default)]
pub struct ScanOutcome {
    /// Jobs for every regular file found
    pub jobs: Vec<FileJob>,
    /// Size sample for chunk auto-tuning
    pub size_stats: SizeStats,
    /// Destination directories created
    pub dirs_created: u64,
}

/// Enumerate `src` into jobs targeting `dst`.
///
/// A regular-file source produces a single job; a directory source is
/// walked recursively. Destination directories are created eagerly so the
/// copy pipeline only ever opens files.
pub fn scan_tree(src: &Path, dst: &Path) -> Result<ScanOutcome> {
    let meta = std::fs::metadata(src)
        .map_err(|e| RingSyncError::Scan(format!("cannot access '{}': {e}", src.display())))?;

    let mut outcome = ScanOutcome::default();

    if meta.is_file() {
        if let Some(parent) = dst.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).with_path(parent)?;
                outcome.dirs_created += 1;
            }
        }
        outcome.size_stats.observe(meta.len());
        outcome.jobs.push(FileJob {
            src_path: src.to_path_buf(),
            dst_path: dst.to_path_buf(),
            inode: meta.ino(),
            size: meta.len(),
        });
        return Ok(outcome);
    }

    if !meta.is_dir() {
        return Err(RingSyncError::Scan(format!(
            "'{}' is not a file or directory",
            src.display()
        )));
    }

    std::fs::create_dir_all(dst).with_path(dst)?;
    outcome.dirs_created += 1;

    // Collect paths single-threaded (directory iteration is cheap), then
    // stat in parallel.
    let mut files = Vec::new();
    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.map_err(|e| RingSyncError::Scan(e.to_string()))?;
        if entry.file_type().is_dir() {
            let rel = entry
                .path()
                .strip_prefix(src)
                .unwrap_or(entry.path());
            let dst_dir = dst.join(rel);
            if !dst_dir.exists() {
                std::fs::create_dir_all(&dst_dir).with_path(&dst_dir)?;
                outcome.dirs_created += 1;
            }
        } else if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
        // Symlinks and special files are skipped; this tool replicates
        // regular file content and modes only.
    }

    let jobs: Vec<FileJob> = files
        .into_par_iter()
        .filter_map(|path| {
            let meta = match std::fs::symlink_metadata(&path) {
                Ok(meta) => meta,
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "skipping unreadable file");
                    return None;
                }
            };
            let rel = path.strip_prefix(src).unwrap_or(&path).to_path_buf();
            Some(FileJob {
                dst_path: dst.join(&rel),
                src_path: path,
                inode: meta.ino(),
                size: meta.len(),
            })
        })
        .collect();

    for job in &jobs {
        outcome.size_stats.observe(job.size);
    }
    outcome.jobs = jobs;
    Ok(outcome)
}

/// Sort jobs by source inode to approximate on-disk order
pub fn sort_by_locality(jobs: &mut [FileJob]) {
    jobs.sort_by_key(|job| job.inode);
}

/// Enumerate relative file paths under `base`, inode-sorted, for the
/// network sender (which transmits paths relative to its source root).
pub fn collect_relative(base: &Path) -> Result<Vec<(PathBuf, String)>> {
    let meta = std::fs::metadata(base)
        .map_err(|e| RingSyncError::Scan(format!("cannot access '{}': {e}", base.display())))?;

    if meta.is_file() {
        let name = base
            .file_name()
            .ok_or_else(|| RingSyncError::Scan(format!("'{}' has no file name", base.display())))?
            .to_string_lossy()
            .into_owned();
        return Ok(vec![(base.to_path_buf(), name)]);
    }

    let mut entries = Vec::new();
    for entry in WalkDir::new(base).follow_links(false) {
        let entry = entry.map_err(|e| RingSyncError::Scan(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(base)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .into_owned();
        let inode = entry.metadata().map(|m| m.ino()).unwrap_or(0);
        entries.push((inode, entry.into_path(), rel));
    }

    entries.sort_by_key(|(inode, _, _)| *inode);
    Ok(entries
        .into_iter()
        .map(|(_, path, rel)| (path, rel))
        .collect())
}
