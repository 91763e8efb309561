//! Reusable kernel pipe pairs for splice-based zero-copy
//!
//! Splicing a file to another file (or a socket) moves pages through a pipe
//! without touching userspace. Creating a pipe per chunk would dominate the
//! cost for small files, so a fixed pool of pipes is created up front and
//! handed to file contexts for the duration of their splice loop. When a
//! target size is given, each pipe's kernel buffer is resized to match the
//! chunk size so one splice-in fills it exactly.
//!
//! The in-kernel pipe buffer is opaque: whatever a context splices in must
//! be spliced out before the pipe returns to the free list.

use crate::error::{Result, RingSyncError};
use std::os::unix::io::RawFd;

/// A pipe pair held by one file context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipeHandle {
    /// Read end of the pipe
    pub read_fd: RawFd,
    /// Write end of the pipe
    pub write_fd: RawFd,
    /// Slot in the owning pool
    pub index: usize,
}

/// Fixed-capacity pool of kernel pipes
pub struct PipePool {
    pipes: Vec<(RawFd, RawFd)>,
    free: Vec<usize>,
}

impl PipePool {
    /// Create `count` pipes, optionally resized to `pipe_size` bytes.
    ///
    /// The resize is best-effort: kernels cap pipe sizes via
    /// `/proc/sys/fs/pipe-max-size`, and a refused resize leaves the default
    /// 64 KiB buffer, which still works (splices just return short counts).
    pub fn new(count: usize, pipe_size: Option<usize>) -> Result<Self> {
        let mut pipes = Vec::with_capacity(count);
        for _ in 0..count {
            let mut fds = [0 as RawFd; 2];
            let rc = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) };
            if rc < 0 {
                let err = std::io::Error::last_os_error();
                for (r, w) in &pipes {
                    unsafe {
                        libc::close(*r);
                        libc::close(*w);
                    }
                }
                return Err(RingSyncError::Ring(err));
            }
            if let Some(size) = pipe_size {
                unsafe { libc::fcntl(fds[0], libc::F_SETPIPE_SZ, size as libc::c_int) };
            }
            pipes.push((fds[0], fds[1]));
        }

        let free = (0..count).rev().collect();
        Ok(Self { pipes, free })
    }

    /// Take a pipe, or `None` when all are held
    pub fn acquire(&mut self) -> Option<PipeHandle> {
        let index = self.free.pop()?;
        let (read_fd, write_fd) = self.pipes[index];
        Some(PipeHandle {
            read_fd,
            write_fd,
            index,
        })
    }

    /// Return a previously acquired pipe
    pub fn release(&mut self, index: usize) {
        debug_assert!(index < self.pipes.len());
        debug_assert!(!self.free.contains(&index), "double release of pipe {index}");
        self.free.push(index);
    }

    /// Pipes currently on the free list
    pub fn available_count(&self) -> usize {
        self.free.len()
    }

    /// Total number of pipes
    pub fn capacity(&self) -> usize {
        self.pipes.len()
    }
}

impl Drop for PipePool {
    fn drop(&mut self) {
        for (read_fd, write_fd) in &self.pipes {
            unsafe {
                libc::close(*read_fd);
                libc::close(*write_fd);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_release_bookkeeping() {
        let mut pool = PipePool::new(3, None).expect("pipe pool");
        assert_eq!(pool.capacity(), 3);
        assert_eq!(pool.available_count(), 3);

        let a = pool.acquire().expect("pipe");
        let b = pool.acquire().expect("pipe");
        assert_ne!(a.index, b.index);
        assert_eq!(pool.available_count(), 1);

        pool.release(a.index);
        pool.release(b.index);
        assert_eq!(pool.available_count(), 3);
    }

    #[test]
    fn test_exhaustion_is_non_blocking() {
        let mut pool = PipePool::new(1, None).expect("pipe pool");
        let held = pool.acquire().expect("pipe");
        assert!(pool.acquire().is_none());
        pool.release(held.index);
        assert!(pool.acquire().is_some());
    }

    #[test]
    fn test_pipes_carry_data() {
        let mut pool = PipePool::new(1, Some(64 * 1024)).expect("pipe pool");
        let pipe = pool.acquire().expect("pipe");

        let payload = b"through the kernel";
        let written = unsafe {
            libc::write(
                pipe.write_fd,
                payload.as_ptr() as *const libc::c_void,
                payload.len(),
            )
        };
        assert_eq!(written, payload.len() as isize);

        let mut out = [0u8; 32];
        let read = unsafe {
            libc::read(
                pipe.read_fd,
                out.as_mut_ptr() as *mut libc::c_void,
                out.len(),
            )
        };
        assert_eq!(read, payload.len() as isize);
        assert_eq!(&out[..payload.len()], payload);

        pool.release(pipe.index);
    }
}
