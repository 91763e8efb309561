//! io_uring network endpoints
//!
//! The async sender pipelines file opens and stats through the ring while
//! the socket carries exactly one file at a time: FILE_HDR for file N goes
//! out before any byte of N, and all of N's bytes precede the header of
//! N+1. Sends are synchronous with MSG_MORE while more of the same file is
//! pending; reads, opens, stats, and closes are ring operations.
//!
//! The async receiver reads frames and file content synchronously off the
//! socket (TCP ordering leaves no choice) and pushes opens, writes, and
//! closes through the ring, so the close of one file overlaps the next
//! file's bytes arriving.
//!
//! Neither variant installs transport encryption; the CLI rejects
//! `--tls` together with `--uring`.

use crate::core::{BufferSlot, ContextSlab, FileContext, FileState, OpKind};
use crate::error::{Result, RingSyncError};
use crate::fs::collect_relative;
use crate::net::protocol::{is_safe_path, Message, MsgType, NONCE_SIZE, PROTOCOL_VERSION};
use crate::net::{recv_all, recv_frame, send_all, send_message};
use crate::pool::BufferPool;
use crate::ring::RingManager;
use std::ffi::CString;
use std::net::TcpStream;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};

const EMPTY_PATH: &[u8] = b"\0";

fn empty_path_ptr() -> *const libc::c_char {
    EMPTY_PATH.as_ptr() as *const libc::c_char
}

// ============================================================
// Sender
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SendState {
    Opening,
    Stating,
    /// Opened and stated, waiting for its turn on the wire
    Ready,
    Reading,
    Closing,
    Done,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SendOp {
    Open,
    Statx,
    Read,
    Close,
}

struct SendFile {
    src_path: PathBuf,
    rel_path: String,
    c_path: CString,
    state: SendState,
    op: SendOp,
    fd: RawFd,
    stx: libc::statx,
    file_size: u64,
    offset: u64,
    mode: u32,
    buffer: Option<BufferSlot>,
}

impl SendFile {
    fn new(src_path: PathBuf, rel_path: String) -> Result<Self> {
        let c_path = CString::new(src_path.as_os_str().as_bytes())
            .map_err(|_| RingSyncError::Scan(format!("NUL in path '{}'", src_path.display())))?;
        Ok(Self {
            src_path,
            rel_path,
            c_path,
            state: SendState::Opening,
            op: SendOp::Open,
            fd: -1,
            stx: unsafe { std::mem::zeroed() },
            file_size: 0,
            offset: 0,
            mode: 0o644,
            buffer: None,
        })
    }
}

struct UringSender {
    sockfd: RawFd,
    ring: RingManager,
    buffers: BufferPool,
    files: Vec<Box<SendFile>>,
    chunk_size: usize,
}

impl UringSender {
    fn new(sockfd: RawFd, src: &Path, queue_depth: u32, chunk_size: usize) -> Result<Self> {
        let mut files = Vec::new();
        for (path, rel) in collect_relative(src)? {
            files.push(Box::new(SendFile::new(path, rel)?));
        }
        Ok(Self {
            sockfd,
            ring: RingManager::new(queue_depth)?,
            buffers: BufferPool::new(queue_depth as usize, chunk_size),
            files,
            chunk_size,
        })
    }

    fn run(&mut self) -> Result<(u64, u64)> {
        let total = self.files.len();
        let mut next_to_open = 0usize;
        let mut next_to_send = 0usize;
        let mut in_flight = 0usize;
        let mut completed = 0usize;
        let mut failed = 0u64;
        let mut sending_active = false;

        tracing::info!(files = total, "sending");

        while completed < total {
            // Prefetch: open and stat ahead while buffers last.
            while next_to_open < total {
                let Some((ptr, index)) = self.buffers.acquire() else {
                    break;
                };
                let file = self.files[next_to_open].as_mut();
                file.buffer = Some(BufferSlot { ptr, index });
                file.state = SendState::Opening;
                file.op = SendOp::Open;
                self.ring.prepare_openat(
                    libc::AT_FDCWD,
                    file.c_path.as_ptr(),
                    libc::O_RDONLY,
                    0,
                    next_to_open as u64,
                );
                next_to_open += 1;
                in_flight += 1;
            }

            // The wire carries one file at a time, in header order. A
            // failure past this point is fatal to the session: the header
            // promises a byte count the stream must deliver before the
            // next header, so the error propagates instead of skipping.
            if !sending_active
                && next_to_send < total
                && self.files[next_to_send].state == SendState::Ready
            {
                self.start_sending(next_to_send)?;
                sending_active = true;
            }

            self.ring.submit()?;
            if in_flight == 0 {
                break;
            }

            for completion in self.ring.wait_and_drain()? {
                let idx = completion.user_data as usize;
                let op = self.files[idx].op;
                match op {
                    SendOp::Read => self.continue_sending(idx, completion.result)?,
                    _ => {
                        // Open/stat failures happen before the header is
                        // written, so the file can be skipped with the
                        // stream still consistent.
                        if !self.advance_open(idx, completion.result) {
                            self.fail_file(idx);
                        }
                    }
                }

                let file = self.files[idx].as_mut();
                if matches!(file.state, SendState::Done | SendState::Failed) {
                    if file.state == SendState::Failed {
                        failed += 1;
                    }
                    completed += 1;
                    in_flight -= 1;
                    if let Some(buffer) = file.buffer.take() {
                        self.buffers.release(buffer.index);
                    }
                    if idx == next_to_send {
                        sending_active = false;
                        next_to_send += 1;
                    }
                    if completed % 1000 == 0 {
                        tracing::info!(completed, total, "progress");
                    }
                }
            }
        }

        send_message(self.sockfd, &Message::AllDone, false)?;
        let sent = completed as u64 - failed;
        tracing::info!(sent, failed, "transfer complete");
        Ok((sent, failed))
    }

    fn fail_file(&mut self, idx: usize) {
        let file = self.files[idx].as_mut();
        file.state = SendState::Failed;
        if file.fd >= 0 {
            unsafe { libc::close(file.fd) };
            file.fd = -1;
        }
    }

    fn advance_open(&mut self, idx: usize, result: i32) -> bool {
        if result < 0 {
            tracing::warn!(
                src = %self.files[idx].src_path.display(),
                error = %std::io::Error::from_raw_os_error(-result),
                "send failed"
            );
            return false;
        }

        let Self { ring, files, .. } = self;
        let file = files[idx].as_mut();
        match file.state {
            SendState::Opening => {
                file.fd = result;
                file.state = SendState::Stating;
                file.op = SendOp::Statx;
                ring.prepare_statx(
                    file.fd,
                    empty_path_ptr(),
                    libc::AT_EMPTY_PATH,
                    libc::STATX_SIZE | libc::STATX_MODE,
                    &mut file.stx,
                    idx as u64,
                );
                true
            }
            SendState::Stating => {
                file.file_size = file.stx.stx_size;
                file.mode = u32::from(file.stx.stx_mode);
                file.state = SendState::Ready;
                true
            }
            SendState::Closing => {
                file.fd = -1;
                file.state = SendState::Done;
                true
            }
            _ => false,
        }
    }

    /// Emit FILE_HDR and submit the first read (or the close, for an
    /// empty file).
    ///
    /// A header send failure means the socket is gone; the error aborts
    /// the session since nothing useful can follow.
    fn start_sending(&mut self, idx: usize) -> Result<()> {
        let Self {
            ring,
            files,
            sockfd,
            chunk_size,
            ..
        } = self;
        let file = files[idx].as_mut();
        debug_assert_eq!(file.state, SendState::Ready);

        let hdr = Message::FileHdr {
            size: file.file_size,
            mode: file.mode & 0o777,
            path: file.rel_path.clone(),
        }
        .encode();
        let flags = if file.file_size > 0 { libc::MSG_MORE } else { 0 };
        send_all(*sockfd, &hdr, flags)
            .map_err(|e| RingSyncError::protocol(format!("connection lost: {e}")))?;

        if file.file_size == 0 {
            file.state = SendState::Closing;
            file.op = SendOp::Close;
            ring.prepare_close(file.fd, idx as u64);
        } else {
            let Some(buffer) = file.buffer else {
                return Err(RingSyncError::protocol("sender context lost its buffer"));
            };
            let to_read = file.file_size.min(*chunk_size as u64) as u32;
            file.state = SendState::Reading;
            file.op = SendOp::Read;
            ring.prepare_read(file.fd, buffer.ptr.as_ptr(), to_read, 0, idx as u64);
        }
        Ok(())
    }

    /// A read completed: push its bytes onto the wire, then read more or
    /// close.
    ///
    /// The header for this file is already out, so any failure here —
    /// read error, truncated source, dead socket — leaves the stream
    /// unrecoverable and tears the session down.
    fn continue_sending(&mut self, idx: usize, result: i32) -> Result<()> {
        if result < 0 {
            return Err(RingSyncError::io(
                &self.files[idx].src_path,
                std::io::Error::from_raw_os_error(-result),
            ));
        }

        let Self {
            ring,
            files,
            sockfd,
            chunk_size,
            ..
        } = self;
        let file = files[idx].as_mut();
        let n = result as usize;
        if n == 0 && file.offset < file.file_size {
            // Source shrank after FILE_HDR went out; the promised byte
            // count can no longer be delivered.
            return Err(RingSyncError::io(
                &file.src_path,
                std::io::ErrorKind::UnexpectedEof.into(),
            ));
        }

        let Some(buffer) = file.buffer else {
            return Err(RingSyncError::protocol("sender context lost its buffer"));
        };
        let data = unsafe { std::slice::from_raw_parts(buffer.ptr.as_ptr(), n) };
        let flags = if (file.offset + n as u64) < file.file_size {
            libc::MSG_MORE
        } else {
            0
        };
        send_all(*sockfd, data, flags)
            .map_err(|e| RingSyncError::protocol(format!("connection lost: {e}")))?;

        file.offset += n as u64;
        if file.offset >= file.file_size {
            file.state = SendState::Closing;
            file.op = SendOp::Close;
            ring.prepare_close(file.fd, idx as u64);
        } else {
            let to_read = (file.file_size - file.offset).min(*chunk_size as u64) as u32;
            file.op = SendOp::Read;
            ring.prepare_read(
                file.fd,
                buffer.ptr.as_ptr(),
                to_read,
                file.offset,
                idx as u64,
            );
        }
        Ok(())
    }
}

// ============================================================
// Receiver
// ============================================================

struct UringReceiver {
    sockfd: RawFd,
    dst: PathBuf,
    ring: RingManager,
    buffers: BufferPool,
    slab: ContextSlab,
    chunk_size: usize,
}

impl UringReceiver {
    fn new(sockfd: RawFd, dst: &Path, queue_depth: u32, chunk_size: usize) -> Result<Self> {
        Ok(Self {
            sockfd,
            dst: dst.to_path_buf(),
            ring: RingManager::new(queue_depth)?,
            buffers: BufferPool::new(queue_depth as usize, chunk_size),
            slab: ContextSlab::new(queue_depth as usize),
            chunk_size,
        })
    }

    fn run(&mut self) -> Result<u64> {
        let mut files_completed = 0u64;
        let mut active: Option<usize> = None;
        let mut done = false;

        while !done || !self.slab.is_empty() {
            // The stream is free once the active file's bytes are all
            // consumed; closes of earlier files keep draining meanwhile.
            if !done && active.is_none() && self.slab.len() < self.slab.capacity() {
                match self.read_next_header()? {
                    Some(slot) => active = Some(slot),
                    None => {
                        done = true;
                        if self.slab.is_empty() {
                            break;
                        }
                    }
                }
            }

            self.ring.submit()?;
            if self.slab.is_empty() {
                continue;
            }

            for completion in self.ring.wait_and_drain()? {
                let slot = completion.user_data as usize;
                self.advance_recv(slot, completion.result, &mut active)?;

                let Self { slab, buffers, .. } = self;
                let Some(ctx) = slab.get_mut(slot) else {
                    continue;
                };
                if ctx.state.is_terminal() {
                    files_completed += 1;
                    if let Some(buffer) = ctx.buffer.take() {
                        buffers.release(buffer.index);
                    }
                    slab.remove(slot);
                    if active == Some(slot) {
                        active = None;
                    }
                }
            }
        }

        tracing::info!(files = files_completed, "transfer complete");
        Ok(files_completed)
    }

    /// Read the next frame; returns the slab slot of the new file, or
    /// `None` on ALL_DONE
    fn read_next_header(&mut self) -> Result<Option<usize>> {
        let (msg_type, payload) = recv_frame(self.sockfd)?;
        let (size, mode, path) = match msg_type {
            MsgType::AllDone => return Ok(None),
            MsgType::FileHdr => match Message::decode(msg_type, &payload)? {
                Message::FileHdr { size, mode, path } => (size, mode, path),
                _ => unreachable!("decode honors the frame type"),
            },
            other => {
                return Err(RingSyncError::protocol(format!(
                    "expected FILE_HDR or ALL_DONE, got {other:?}"
                )));
            }
        };

        if !is_safe_path(&path) {
            return Err(RingSyncError::protocol(format!(
                "unsafe path rejected: '{path}'"
            )));
        }

        let full = self.dst.join(&path);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).map_err(|e| RingSyncError::io(parent, e))?;
        }

        let (ptr, index) = self
            .buffers
            .acquire()
            .ok_or_else(|| RingSyncError::protocol("receiver buffer pool exhausted"))?;
        let buffer = BufferSlot { ptr, index };

        let mut ctx = FileContext::new(PathBuf::new(), full, buffer)
            .map_err(|e| RingSyncError::protocol(format!("bad destination path: {e}")))?;
        ctx.file_size = size;
        ctx.mode = mode;

        let slot = self
            .slab
            .insert(ctx)
            .ok_or_else(|| RingSyncError::protocol("receiver context slab exhausted"))?;
        let ctx = self.slab.get_mut(slot).expect("slot was just inserted");
        ctx.user_data = slot as u64;
        ctx.state = FileState::OpeningDst;
        ctx.op = OpKind::OpenDst;

        let (dst_ptr, mode, user_data) = (ctx.dst_c.as_ptr(), ctx.mode, ctx.user_data);
        self.ring.prepare_openat(
            libc::AT_FDCWD,
            dst_ptr,
            libc::O_WRONLY | libc::O_CREAT | libc::O_TRUNC,
            mode & 0o777,
            user_data,
        );
        Ok(Some(slot))
    }

    /// Drive one context by a completion; sync-recv the next chunk and
    /// submit its write, or submit the close
    fn advance_recv(
        &mut self,
        slot: usize,
        result: i32,
        active: &mut Option<usize>,
    ) -> Result<()> {
        let Self {
            ring,
            slab,
            sockfd,
            chunk_size,
            ..
        } = self;
        let Some(ctx) = slab.get_mut(slot) else {
            return Ok(());
        };

        if result < 0 {
            let err = std::io::Error::from_raw_os_error(-result);
            if ctx.dst_fd >= 0 {
                unsafe { libc::close(ctx.dst_fd) };
                ctx.dst_fd = -1;
            }
            ctx.state = FileState::Failed;
            // Once a file fails the raw byte stream cannot be resynced.
            return Err(RingSyncError::io(&ctx.dst_path, err));
        }

        match ctx.state {
            FileState::OpeningDst => {
                ctx.dst_fd = result;
                if ctx.file_size == 0 {
                    ctx.state = FileState::ClosingDst;
                    ctx.op = OpKind::CloseDst;
                    ring.prepare_close(ctx.dst_fd, ctx.user_data);
                    if *active == Some(slot) {
                        *active = None;
                    }
                } else {
                    recv_chunk_and_write(ctx, ring, *sockfd, *chunk_size, active, slot)?;
                }
            }

            FileState::Writing => {
                ctx.offset += u64::from(ctx.last_io);
                if ctx.offset >= ctx.file_size {
                    ctx.state = FileState::ClosingDst;
                    ctx.op = OpKind::CloseDst;
                    ring.prepare_close(ctx.dst_fd, ctx.user_data);
                } else {
                    recv_chunk_and_write(ctx, ring, *sockfd, *chunk_size, active, slot)?;
                }
            }

            FileState::ClosingDst => {
                ctx.dst_fd = -1;
                ctx.state = FileState::Done;
            }

            _ => {
                return Err(RingSyncError::protocol(format!(
                    "receiver context in unexpected state {:?}",
                    ctx.state
                )));
            }
        }
        Ok(())
    }
}

fn recv_chunk_and_write(
    ctx: &mut FileContext,
    ring: &mut RingManager,
    sockfd: RawFd,
    chunk_size: usize,
    active: &mut Option<usize>,
    slot: usize,
) -> Result<()> {
    let Some(buffer) = ctx.buffer else {
        return Err(RingSyncError::protocol("receiver context lost its buffer"));
    };
    let to_recv = ctx.remaining().min(chunk_size as u64) as usize;
    let buf = unsafe { std::slice::from_raw_parts_mut(buffer.ptr.as_ptr(), to_recv) };
    recv_all(sockfd, buf)
        .map_err(|e| RingSyncError::protocol(format!("connection lost: {e}")))?;

    ctx.last_io = to_recv as u32;
    ctx.state = FileState::Writing;
    ctx.op = OpKind::Write;
    ring.prepare_write(
        ctx.dst_fd,
        buffer.ptr.as_ptr(),
        to_recv as u32,
        ctx.offset,
        ctx.user_data,
    );

    // Once the last chunk is off the socket the stream belongs to the
    // next file, even though this write is still in flight.
    if ctx.offset + to_recv as u64 >= ctx.file_size && *active == Some(slot) {
        *active = None;
    }
    Ok(())
}

// ============================================================
// Entry points
// ============================================================

/// Connect, authenticate, and stream `src` with the async sender
pub fn run_sender_uring(
    src: &Path,
    host: &str,
    port: u16,
    secret: Option<&str>,
    queue_depth: u32,
    chunk_size: usize,
) -> Result<u64> {
    let peer = format!("{host}:{port}");
    tracing::info!(peer = %peer, "connecting (io_uring mode)");

    let stream = TcpStream::connect((host, port))
        .map_err(|e| RingSyncError::connection(&peer, e.to_string()))?;
    let fd = stream.as_raw_fd();

    // No kTLS in this mode, so the nonce is never used for derivation.
    send_message(
        fd,
        &Message::Hello {
            version: PROTOCOL_VERSION,
            secret: secret.unwrap_or("").as_bytes().to_vec(),
            nonce: [0u8; NONCE_SIZE],
        },
        false,
    )?;

    let (msg_type, payload) = recv_frame(fd)?;
    match Message::decode(msg_type, &payload)? {
        Message::HelloOk { .. } => {}
        Message::HelloFail { reason } => {
            return Err(RingSyncError::Auth(format!(
                "receiver rejected handshake (reason {reason})"
            )));
        }
        other => {
            return Err(RingSyncError::protocol(format!(
                "expected HELLO_OK, got {:?}",
                other.msg_type()
            )));
        }
    }

    let mut sender = UringSender::new(fd, src, queue_depth, chunk_size)?;
    let (sent, failed) = sender.run()?;
    drop(stream);
    if failed > 0 {
        return Err(RingSyncError::protocol(format!(
            "{failed} of {} files failed to send",
            sent + failed
        )));
    }
    Ok(sent)
}

/// Accept one connection and receive the tree with the async receiver
pub fn run_receiver_uring(
    dst: &Path,
    port: u16,
    secret: Option<&str>,
    queue_depth: u32,
    chunk_size: usize,
) -> Result<u64> {
    let opts = super::ReceiverOptions {
        secret: secret.map(String::from),
        use_tls: false,
        chunk_size,
    };
    let receiver = super::Receiver::bind(dst, port, opts)?;
    if let Ok(addr) = receiver.local_addr() {
        tracing::info!(addr = %addr, "listening (io_uring mode)");
    }
    receiver.run_uring(queue_depth)
}

impl super::Receiver {
    /// Accept one connection and receive with the async pipeline instead
    /// of the inline writes of [`super::Receiver::run`]
    pub fn run_uring(self, queue_depth: u32) -> Result<u64> {
        let (stream, dst_root, opts) = self.accept_and_handshake()?;
        let mut uring =
            UringReceiver::new(stream.as_raw_fd(), &dst_root, queue_depth, opts.chunk_size)?;
        let count = uring.run()?;
        drop(stream);
        Ok(count)
    }
}
