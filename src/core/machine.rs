//! Per-file state machine transitions
//!
//! [`advance`] is called once per ring completion and submits the next
//! operation for the owning context, so a context never has more than one
//! outstanding op. Any negative result moves the context to `Failed`;
//! `ECANCELED` (a linked op whose predecessor failed) is recorded silently
//! since the predecessor's error is already being handled.

use crate::core::context::{BufferSlot, CopyStrategy, FileContext, FileState, OpKind, NO_FD};
use crate::core::stats::Stats;
use crate::pool::{PipeHandle, PipePool};
use crate::ring::RingManager;

/// Immutable per-worker copy parameters
#[derive(Debug, Clone, Copy)]
pub struct CopyTuning {
    /// Maximum bytes per read/splice step
    pub chunk_size: usize,
    /// Prefer the splice path when a pipe is available
    pub use_splice: bool,
}

/// Empty C string for statx with `AT_EMPTY_PATH`
const EMPTY_PATH: &[u8] = b"\0";

fn empty_path_ptr() -> *const libc::c_char {
    EMPTY_PATH.as_ptr() as *const libc::c_char
}

fn fail(ctx: &mut FileContext, stats: &Stats) {
    if ctx.src_fd >= 0 {
        unsafe { libc::close(ctx.src_fd) };
        ctx.src_fd = NO_FD;
    }
    if ctx.dst_fd >= 0 {
        unsafe { libc::close(ctx.dst_fd) };
        ctx.dst_fd = NO_FD;
    }
    ctx.state = FileState::Failed;
    stats.file_failed();
}

fn issue_read(ctx: &mut FileContext, ring: &mut RingManager, tuning: &CopyTuning, buf: BufferSlot) {
    let len = ctx.remaining().min(tuning.chunk_size as u64) as u32;
    ctx.state = FileState::Reading;
    ctx.op = OpKind::Read;
    ring.prepare_read(ctx.src_fd, buf.ptr.as_ptr(), len, ctx.offset, ctx.user_data);
}

fn issue_splice_in(
    ctx: &mut FileContext,
    ring: &mut RingManager,
    tuning: &CopyTuning,
    pipe: PipeHandle,
) {
    let len = ctx.remaining().min(tuning.chunk_size as u64) as u32;
    ctx.state = FileState::SpliceIn;
    ctx.op = OpKind::SpliceIn;
    ring.prepare_splice(
        ctx.src_fd,
        ctx.offset as i64,
        pipe.write_fd,
        -1,
        len,
        libc::SPLICE_F_MOVE,
        ctx.user_data,
    );
}

fn issue_close_src(ctx: &mut FileContext, ring: &mut RingManager) {
    ctx.state = FileState::ClosingSrc;
    ctx.op = OpKind::CloseSrc;
    ring.prepare_close(ctx.src_fd, ctx.user_data);
}

/// Advance one context by the result of its completed operation
pub fn advance(
    ctx: &mut FileContext,
    result: i32,
    ring: &mut RingManager,
    pipes: &mut PipePool,
    stats: &Stats,
    tuning: &CopyTuning,
) {
    if result < 0 && !ctx.state.is_terminal() {
        let errno = -result;
        if errno != libc::ECANCELED {
            tracing::warn!(
                src = %ctx.src_path.display(),
                state = ?ctx.state,
                error = %std::io::Error::from_raw_os_error(errno),
                "file copy failed"
            );
        }
        fail(ctx, stats);
        return;
    }

    match ctx.state {
        FileState::OpeningSrc => {
            ctx.src_fd = result;
            ctx.state = FileState::Stating;
            ctx.op = OpKind::Statx;
            ring.prepare_statx(
                ctx.src_fd,
                empty_path_ptr(),
                libc::AT_EMPTY_PATH,
                libc::STATX_SIZE | libc::STATX_MODE,
                &mut ctx.stx,
                ctx.user_data,
            );
        }

        FileState::Stating => {
            ctx.file_size = ctx.stx.stx_size;
            ctx.mode = u32::from(ctx.stx.stx_mode);
            stats.add_bytes_total(ctx.file_size);

            ctx.strategy = if tuning.use_splice {
                CopyStrategy::SplicePipe
            } else {
                CopyStrategy::ReadWrite
            };

            ctx.state = FileState::OpeningDst;
            ctx.op = OpKind::OpenDst;
            ring.prepare_openat(
                libc::AT_FDCWD,
                ctx.dst_c.as_ptr(),
                libc::O_WRONLY | libc::O_CREAT | libc::O_TRUNC,
                ctx.mode & 0o777,
                ctx.user_data,
            );
        }

        FileState::OpeningDst => {
            ctx.dst_fd = result;

            if ctx.file_size == 0 {
                issue_close_src(ctx, ring);
            } else if ctx.strategy == CopyStrategy::SplicePipe {
                if let Some(pipe) = pipes.acquire() {
                    ctx.pipe = Some(pipe);
                    issue_splice_in(ctx, ring, tuning, pipe);
                } else {
                    // No pipe free right now; this file takes the buffer path.
                    ctx.strategy = CopyStrategy::ReadWrite;
                    match ctx.buffer {
                        Some(buf) => issue_read(ctx, ring, tuning, buf),
                        None => fail(ctx, stats),
                    }
                }
            } else {
                match ctx.buffer {
                    Some(buf) => issue_read(ctx, ring, tuning, buf),
                    None => fail(ctx, stats),
                }
            }
        }

        FileState::Reading => {
            if result == 0 && ctx.remaining() > 0 {
                // Source shrank after statx; stop at what the kernel saw.
                ctx.file_size = ctx.offset;
                issue_close_src(ctx, ring);
                return;
            }
            ctx.last_io = result as u32;
            ctx.state = FileState::Writing;
            ctx.op = OpKind::Write;
            match ctx.buffer {
                Some(buf) => ring.prepare_write(
                    ctx.dst_fd,
                    buf.ptr.as_ptr(),
                    result as u32,
                    ctx.offset,
                    ctx.user_data,
                ),
                None => fail(ctx, stats),
            }
        }

        FileState::Writing => {
            // The write half advances the offset, never the read half.
            ctx.offset += u64::from(ctx.last_io);
            stats.add_bytes_copied(u64::from(ctx.last_io));

            if ctx.offset >= ctx.file_size {
                issue_close_src(ctx, ring);
            } else {
                match ctx.buffer {
                    Some(buf) => issue_read(ctx, ring, tuning, buf),
                    None => fail(ctx, stats),
                }
            }
        }

        FileState::SpliceIn => {
            if result == 0 && ctx.remaining() > 0 {
                ctx.file_size = ctx.offset;
                issue_close_src(ctx, ring);
                return;
            }
            // result bytes now sit in the pipe; drain exactly that many.
            ctx.last_io = result as u32;
            match ctx.pipe {
                Some(pipe) => {
                    ctx.state = FileState::SpliceOut;
                    ctx.op = OpKind::SpliceOut;
                    ring.prepare_splice(
                        pipe.read_fd,
                        -1,
                        ctx.dst_fd,
                        ctx.offset as i64,
                        result as u32,
                        libc::SPLICE_F_MOVE,
                        ctx.user_data,
                    );
                }
                None => fail(ctx, stats),
            }
        }

        FileState::SpliceOut => {
            ctx.offset += result as u64;
            stats.add_bytes_copied(result as u64);

            if ctx.offset >= ctx.file_size {
                issue_close_src(ctx, ring);
            } else {
                match ctx.pipe {
                    Some(pipe) => issue_splice_in(ctx, ring, tuning, pipe),
                    None => fail(ctx, stats),
                }
            }
        }

        FileState::ClosingSrc => {
            ctx.src_fd = NO_FD;
            ctx.state = FileState::ClosingDst;
            ctx.op = OpKind::CloseDst;
            ring.prepare_close(ctx.dst_fd, ctx.user_data);
        }

        FileState::ClosingDst => {
            ctx.dst_fd = NO_FD;
            ctx.state = FileState::Done;
            stats.file_completed();
        }

        FileState::Queued | FileState::Done | FileState::Failed => {}
    }
}
