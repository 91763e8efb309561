//! Per-file copy state
//!
//! A [`FileContext`] tracks one file through the async pipeline: its fds,
//! its position, the pooled resources it holds, and which ring operation is
//! currently outstanding. Contexts live in a [`ContextSlab`]; the slab index
//! travels through the ring as the completion's user-data, so dispatch never
//! touches a raw pointer and a stale handle can at worst hit a recycled
//! slot, never freed memory.

use crate::pool::PipeHandle;
use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::RawFd;
use std::path::PathBuf;
use std::ptr::NonNull;

/// Sentinel for "no fd held"
pub const NO_FD: RawFd = -1;

/// Position of a file in the copy pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    /// In the work queue, not started
    Queued,
    /// Source open submitted
    OpeningSrc,
    /// statx submitted on the source fd
    Stating,
    /// Destination open submitted
    OpeningDst,
    /// Read of the next chunk submitted
    Reading,
    /// Write of the last read chunk submitted
    Writing,
    /// Splice source→pipe submitted
    SpliceIn,
    /// Splice pipe→destination submitted
    SpliceOut,
    /// Source close submitted
    ClosingSrc,
    /// Destination close submitted
    ClosingDst,
    /// Copied successfully
    Done,
    /// Copy failed
    Failed,
}

impl FileState {
    /// True for the two terminal states
    pub fn is_terminal(&self) -> bool {
        matches!(self, FileState::Done | FileState::Failed)
    }
}

/// Kind of the single outstanding ring operation for a context.
///
/// One context issues several distinct op kinds over its lifetime; the
/// completion dispatcher reads this tag to route the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    /// openat on the source
    OpenSrc,
    /// statx on the source fd
    Statx,
    /// openat on the destination
    OpenDst,
    /// read into the pooled buffer
    Read,
    /// write from the pooled buffer
    Write,
    /// splice source→pipe
    SpliceIn,
    /// splice pipe→destination
    SpliceOut,
    /// close of the source fd
    CloseSrc,
    /// close of the destination fd
    CloseDst,
}

/// How a file's bytes move from source to destination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyStrategy {
    /// read into a pooled buffer, then write
    ReadWrite,
    /// splice through a pooled pipe, never touching userspace
    SplicePipe,
    /// synchronous copy_file_range loop (fallback mode)
    KernelCopyFileRange,
}

/// A pooled buffer held by a context
#[derive(Debug, Clone, Copy)]
pub struct BufferSlot {
    /// Start of the buffer
    pub ptr: NonNull<u8>,
    /// Slot in the owning pool
    pub index: usize,
}

/// Everything the state machine needs to drive one file
pub struct FileContext {
    /// Source path
    pub src_path: PathBuf,
    /// Destination path
    pub dst_path: PathBuf,
    /// Source path as a C string (must outlive the openat submission)
    pub src_c: CString,
    /// Destination path as a C string
    pub dst_c: CString,
    /// Source fd, or [`NO_FD`]
    pub src_fd: RawFd,
    /// Destination fd, or [`NO_FD`]
    pub dst_fd: RawFd,
    /// Current pipeline state
    pub state: FileState,
    /// Kind of the outstanding ring op
    pub op: OpKind,
    /// Total size, set after statx
    pub file_size: u64,
    /// Bytes landed at the destination so far
    pub offset: u64,
    /// Mode bits from statx
    pub mode: u32,
    /// Pooled buffer (read/write path)
    pub buffer: Option<BufferSlot>,
    /// Pooled pipe (splice path)
    pub pipe: Option<PipeHandle>,
    /// Byte count of the most recent read/splice-in, consumed by the write half
    pub last_io: u32,
    /// statx result storage; the kernel writes here asynchronously
    pub stx: libc::statx,
    /// Chosen transfer strategy
    pub strategy: CopyStrategy,
    /// This context's slab handle, echoed through ring user-data
    pub user_data: u64,
}

impl FileContext {
    /// Build a context for one queued job with its pooled buffer attached
    pub fn new(
        src_path: PathBuf,
        dst_path: PathBuf,
        buffer: BufferSlot,
    ) -> std::io::Result<Self> {
        let src_c = CString::new(src_path.as_os_str().as_bytes())
            .map_err(|_| std::io::Error::from_raw_os_error(libc::EINVAL))?;
        let dst_c = CString::new(dst_path.as_os_str().as_bytes())
            .map_err(|_| std::io::Error::from_raw_os_error(libc::EINVAL))?;

        Ok(Self {
            src_path,
            dst_path,
            src_c,
            dst_c,
            src_fd: NO_FD,
            dst_fd: NO_FD,
            state: FileState::Queued,
            op: OpKind::OpenSrc,
            file_size: 0,
            offset: 0,
            mode: 0o644,
            buffer: Some(buffer),
            pipe: None,
            last_io: 0,
            stx: unsafe { std::mem::zeroed() },
            strategy: CopyStrategy::ReadWrite,
            user_data: 0,
        })
    }

    /// Bytes remaining to transfer
    pub fn remaining(&self) -> u64 {
        self.file_size.saturating_sub(self.offset)
    }
}

/// Fixed-capacity arena of in-flight contexts.
///
/// Contexts are boxed so the statx buffer and C-string paths the kernel
/// reads from stay at stable addresses while a slot's `Option` moves.
pub struct ContextSlab {
    slots: Vec<Option<Box<FileContext>>>,
    free: Vec<usize>,
    len: usize,
}

impl ContextSlab {
    /// Create a slab with `capacity` slots
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            free: (0..capacity).rev().collect(),
            len: 0,
        }
    }

    /// Insert a context, returning its handle, or `None` when full
    pub fn insert(&mut self, ctx: FileContext) -> Option<usize> {
        let slot = self.free.pop()?;
        self.slots[slot] = Some(Box::new(ctx));
        self.len += 1;
        Some(slot)
    }

    /// Look up a context by handle
    pub fn get_mut(&mut self, slot: usize) -> Option<&mut FileContext> {
        self.slots.get_mut(slot)?.as_deref_mut()
    }

    /// Remove a context, freeing its slot for reuse
    pub fn remove(&mut self, slot: usize) -> Option<Box<FileContext>> {
        let ctx = self.slots.get_mut(slot)?.take()?;
        self.free.push(slot);
        self.len -= 1;
        Some(ctx)
    }

    /// Number of live contexts
    pub fn len(&self) -> usize {
        self.len
    }

    /// True if no contexts are live
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Total slot count
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}
