//! Synchronous copy_file_range fallback
//!
//! On network filesystems the ring's async batching buys nothing: the
//! round-trip dominates. This worker loops `copy_file_range` per file
//! instead, which stays entirely in the kernel and lets NFS/CIFS servers
//! do server-side copies where supported.

use crate::core::queue::WorkQueue;
use crate::core::stats::Stats;
use crate::error::{IoResultExt, Result};
use crate::fs::FileJob;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::{MetadataExt, OpenOptionsExt};
use std::os::unix::io::AsRawFd;

/// Pop jobs and copy them with copy_file_range until the queue drains
pub fn run_sync_worker(queue: &WorkQueue<FileJob>, stats: &Stats) {
    while let Some(job) = queue.wait_pop() {
        match copy_one(&job, stats) {
            Ok(()) => stats.file_completed(),
            Err(err) => {
                tracing::warn!(src = %job.src_path.display(), error = %err, "sync copy failed");
                stats.file_failed();
            }
        }
    }
    tracing::debug!("sync worker finished");
}

fn copy_one(job: &FileJob, stats: &Stats) -> Result<()> {
    let src = File::open(&job.src_path).with_path(&job.src_path)?;
    let src_fd = src.as_raw_fd();

    // Hint sequential access, as cp does.
    unsafe { libc::posix_fadvise(src_fd, 0, 0, libc::POSIX_FADV_SEQUENTIAL) };

    let meta = src.metadata().with_path(&job.src_path)?;
    let file_size = meta.len();
    stats.add_bytes_total(file_size);

    let dst = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(meta.mode() & 0o777)
        .open(&job.dst_path)
        .with_path(&job.dst_path)?;
    let dst_fd = dst.as_raw_fd();

    let mut off_in: libc::loff_t = 0;
    let mut off_out: libc::loff_t = 0;

    while (off_in as u64) < file_size {
        let remaining = file_size - off_in as u64;
        let copied = unsafe {
            libc::copy_file_range(
                src_fd,
                &mut off_in,
                dst_fd,
                &mut off_out,
                remaining as usize,
                0,
            )
        };
        if copied < 0 {
            return Err(crate::error::RingSyncError::io(
                &job.src_path,
                std::io::Error::last_os_error(),
            ));
        }
        if copied == 0 {
            // Source shrank underneath us; stop at what the kernel saw.
            break;
        }
        stats.add_bytes_copied(copied as u64);
    }

    Ok(())
}
