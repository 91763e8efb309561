//! Synchronous network sender
//!
//! Connects, authenticates, optionally turns on kernel TLS, then streams
//! every file under the source root: a FILE_HDR frame, then exactly `size`
//! raw bytes. Content moves either through a pooled buffer (read + send
//! with MSG_MORE while more is pending) or through a pooled pipe with
//! splice on both ends, never entering userspace.

use crate::error::{IoResultExt, Result, RingSyncError};
use crate::fs::collect_relative;
use crate::net::protocol::{Message, PROTOCOL_VERSION};
use crate::net::{ktls, recv_frame, send_all, send_message};
use crate::pool::{BufferPool, PipeHandle, PipePool};
use std::fs::File;
use std::net::TcpStream;
use std::os::unix::fs::MetadataExt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::Path;

/// Sender-side options
#[derive(Debug, Clone)]
pub struct SenderOptions {
    /// Pre-shared secret, if the receiver requires one
    pub secret: Option<String>,
    /// Use the splice pipeline instead of read/send
    pub use_splice: bool,
    /// Derive keys and enable kernel TLS after the handshake
    pub use_tls: bool,
    /// Bytes per read/splice step
    pub chunk_size: usize,
}

/// Connect to `host:port` and stream the tree under `src`
pub fn run_sender(src: &Path, host: &str, port: u16, opts: &SenderOptions) -> Result<u64> {
    let peer = format!("{host}:{port}");
    tracing::info!(peer = %peer, splice = opts.use_splice, tls = opts.use_tls, "connecting");

    let stream = TcpStream::connect((host, port))
        .map_err(|e| RingSyncError::connection(&peer, e.to_string()))?;
    let fd = stream.as_raw_fd();

    let secret = opts.secret.as_deref().unwrap_or("");
    let nonce_sender = ktls::generate_nonce();
    send_message(
        fd,
        &Message::Hello {
            version: PROTOCOL_VERSION,
            secret: secret.as_bytes().to_vec(),
            nonce: nonce_sender,
        },
        false,
    )?;

    let (msg_type, payload) = recv_frame(fd)?;
    let nonce_receiver = match Message::decode(msg_type, &payload)? {
        Message::HelloOk { nonce } => nonce,
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
    };

    if opts.use_tls {
        let keys = ktls::derive_keys(secret.as_bytes(), &nonce_sender, &nonce_receiver)?;
        ktls::enable_sender(fd, &keys)?;
        tracing::info!("kernel TLS enabled (AES-128-GCM)");
    }

    let files = collect_relative(src)?;
    tracing::info!(files = files.len(), "authenticated, sending");

    let mut buffers = BufferPool::new(1, opts.chunk_size);
    let (_, buf_index) = buffers
        .acquire()
        .ok_or_else(|| RingSyncError::protocol("sender buffer pool empty"))?;

    let mut pipes = if opts.use_splice {
        Some(PipePool::new(1, Some(opts.chunk_size))?)
    } else {
        None
    };
    let pipe = pipes.as_mut().and_then(|pool| pool.acquire());

    let mut sent = 0u64;
    for (path, rel) in &files {
        send_file(fd, path, rel, buffers.slice_mut(buf_index), pipe)?;
        sent += 1;
        if sent % 1000 == 0 {
            tracing::info!(sent, total = files.len(), "progress");
        }
    }

    if let (Some(pool), Some(pipe)) = (pipes.as_mut(), pipe) {
        pool.release(pipe.index);
    }
    buffers.release(buf_index);

    send_message(fd, &Message::AllDone, false)?;
    tracing::info!(files = sent, "transfer complete");
    Ok(sent)
}

fn send_file(
    sockfd: RawFd,
    path: &Path,
    rel_path: &str,
    buffer: &mut [u8],
    pipe: Option<PipeHandle>,
) -> Result<()> {
    use std::io::Read;

    let mut file = File::open(path).with_path(path)?;
    let meta = file.metadata().with_path(path)?;
    let file_size = meta.len();

    send_message(
        sockfd,
        &Message::FileHdr {
            size: file_size,
            mode: meta.mode() & 0o777,
            path: rel_path.to_string(),
        },
        file_size > 0,
    )?;

    let mut remaining = file_size;
    let mut offset: libc::loff_t = 0;

    while remaining > 0 {
        let chunk = remaining.min(buffer.len() as u64) as usize;

        if let Some(pipe) = pipe {
            let spliced = unsafe {
                libc::splice(
                    file.as_raw_fd(),
                    &mut offset,
                    pipe.write_fd,
                    std::ptr::null_mut(),
                    chunk,
                    libc::SPLICE_F_MOVE,
                )
            };
            if spliced <= 0 {
                return Err(RingSyncError::io(path, std::io::Error::last_os_error()));
            }
            splice_to_socket(pipe.read_fd, sockfd, spliced as usize)
                .map_err(|e| RingSyncError::protocol(format!("connection lost: {e}")))?;
            remaining -= spliced as u64;
        } else {
            let n = file.read(&mut buffer[..chunk]).with_path(path)?;
            if n == 0 {
                return Err(RingSyncError::io(
                    path,
                    std::io::ErrorKind::UnexpectedEof.into(),
                ));
            }
            let flags = if (n as u64) < remaining {
                libc::MSG_MORE
            } else {
                0
            };
            send_all(sockfd, &buffer[..n], flags)
                .map_err(|e| RingSyncError::protocol(format!("connection lost: {e}")))?;
            remaining -= n as u64;
        }
    }

    Ok(())
}

/// Drain `len` bytes from a pipe into a socket, retrying short splices
fn splice_to_socket(pipe_read_fd: RawFd, sockfd: RawFd, len: usize) -> std::io::Result<()> {
    let mut remaining = len;
    while remaining > 0 {
        let n = unsafe {
            libc::splice(
                pipe_read_fd,
                std::ptr::null_mut(),
                sockfd,
                std::ptr::null_mut(),
                remaining,
                libc::SPLICE_F_MOVE | libc::SPLICE_F_MORE,
            )
        };
        if n < 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EAGAIN) {
                continue;
            }
            return Err(err);
        }
        if n == 0 {
            return Err(std::io::ErrorKind::WriteZero.into());
        }
        remaining -= n as usize;
    }
    Ok(())
}
