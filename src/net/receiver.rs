//! Network receiver
//!
//! Binds a dual-stack listener, accepts one connection, verifies the
//! pre-shared secret, optionally turns on kernel TLS (with the key pair
//! swapped relative to the sender), then reproduces the advertised tree:
//! each FILE_HDR is validated, parent directories are created, and exactly
//! `size` raw bytes are read off the stream into the destination file.
//!
//! The synchronous variant writes inline; the io_uring variant in
//! [`super::uring`] reuses the same bind/handshake and pushes opens,
//! writes, and closes through a ring.

use crate::error::{IoResultExt, Result, RingSyncError};
use crate::net::protocol::{is_safe_path, Message, MsgType, PROTOCOL_VERSION};
use crate::net::{ktls, recv_all, recv_frame, send_message};
use crate::pool::BufferPool;
use std::io::Write;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};
use std::path::{Path, PathBuf};

/// Receiver-side options
#[derive(Debug, Clone)]
pub struct ReceiverOptions {
    /// Required pre-shared secret; `None` accepts any sender
    pub secret: Option<String>,
    /// Derive keys and enable kernel TLS after the handshake
    pub use_tls: bool,
    /// Bytes per recv/write step
    pub chunk_size: usize,
}

/// A bound receiver, ready to accept one connection
pub struct Receiver {
    listener: TcpListener,
    dst: PathBuf,
    opts: ReceiverOptions,
}

impl Receiver {
    /// Create the destination root and bind the listener.
    ///
    /// Prefers a dual-stack IPv6 socket (`IPV6_V6ONLY = 0`) and falls back
    /// to IPv4-only if IPv6 is unavailable. Port 0 binds an ephemeral port.
    pub fn bind(dst: &Path, port: u16, opts: ReceiverOptions) -> Result<Self> {
        std::fs::create_dir_all(dst).with_path(dst)?;
        let listener = listen_dual_stack(port)?;
        Ok(Self {
            listener,
            dst: dst.to_path_buf(),
            opts,
        })
    }

    /// The bound address (useful with port 0)
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| RingSyncError::connection("listener", e.to_string()))
    }

    /// Accept one connection, run the handshake, and hand back the
    /// authenticated stream with the destination root and options
    pub(super) fn accept_and_handshake(self) -> Result<(TcpStream, PathBuf, ReceiverOptions)> {
        let (stream, peer) = self
            .listener
            .accept()
            .map_err(|e| RingSyncError::connection("listener", e.to_string()))?;
        tracing::info!(peer = %peer, "connection accepted");
        let fd = stream.as_raw_fd();

        let (msg_type, payload) = recv_frame(fd)?;
        if msg_type != MsgType::Hello {
            return Err(RingSyncError::protocol(format!(
                "expected HELLO, got {msg_type:?}"
            )));
        }
        let (version, peer_secret, nonce_sender) = match Message::decode(msg_type, &payload)? {
            Message::Hello {
                version,
                secret,
                nonce,
            } => (version, secret, nonce),
            _ => unreachable!("decode honors the frame type"),
        };
        if version != PROTOCOL_VERSION {
            tracing::warn!(version, "peer speaks a different protocol version");
        }

        if let Some(expected) = &self.opts.secret {
            if peer_secret != expected.as_bytes() {
                send_message(fd, &Message::HelloFail { reason: 1 }, false)?;
                return Err(RingSyncError::Auth("secret mismatch".to_string()));
            }
        }

        let nonce_receiver = ktls::generate_nonce();
        send_message(
            fd,
            &Message::HelloOk {
                nonce: nonce_receiver,
            },
            false,
        )?;

        if self.opts.use_tls {
            let secret = self.opts.secret.as_deref().unwrap_or("");
            let keys = ktls::derive_keys(secret.as_bytes(), &nonce_sender, &nonce_receiver)?;
            ktls::enable_receiver(fd, &keys)?;
            tracing::info!("kernel TLS enabled (AES-128-GCM)");
        }

        tracing::info!("authenticated, receiving");
        Ok((stream, self.dst, self.opts))
    }

    /// Accept one connection and receive the tree; returns files received
    pub fn run(self) -> Result<u64> {
        let (stream, dst, opts) = self.accept_and_handshake()?;
        let fd = stream.as_raw_fd();

        let mut buffers = BufferPool::new(1, opts.chunk_size);
        let (_, buf_index) = buffers
            .acquire()
            .ok_or_else(|| RingSyncError::protocol("receiver buffer pool empty"))?;

        let mut files_received = 0u64;
        loop {
            let (msg_type, payload) = recv_frame(fd)?;
            match msg_type {
                MsgType::AllDone => break,
                MsgType::FileHdr => {
                    let (size, mode, path) = match Message::decode(msg_type, &payload)? {
                        Message::FileHdr { size, mode, path } => (size, mode, path),
                        _ => unreachable!("decode honors the frame type"),
                    };
                    receive_file(fd, &dst, size, mode, &path, buffers.slice_mut(buf_index))?;
                    files_received += 1;
                    if files_received % 1000 == 0 {
                        tracing::info!(files_received, "progress");
                    }
                }
                other => {
                    return Err(RingSyncError::protocol(format!(
                        "expected FILE_HDR or ALL_DONE, got {other:?}"
                    )));
                }
            }
        }

        buffers.release(buf_index);
        tracing::info!(files = files_received, "transfer complete");
        Ok(files_received)
    }
}

fn receive_file(
    sockfd: RawFd,
    dst: &Path,
    size: u64,
    mode: u32,
    rel_path: &str,
    buffer: &mut [u8],
) -> Result<()> {
    if !is_safe_path(rel_path) {
        return Err(RingSyncError::protocol(format!(
            "unsafe path rejected: '{rel_path}'"
        )));
    }

    let path = dst.join(rel_path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).with_path(parent)?;
    }

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(mode & 0o777)
        .open(&path)
        .with_path(&path)?;

    let mut remaining = size;
    while remaining > 0 {
        let chunk = remaining.min(buffer.len() as u64) as usize;
        recv_all(sockfd, &mut buffer[..chunk])
            .map_err(|e| RingSyncError::protocol(format!("connection lost: {e}")))?;
        file.write_all(&buffer[..chunk]).with_path(&path)?;
        remaining -= chunk as u64;
    }

    Ok(())
}

/// Bind and receive in one call
pub fn run_receiver(dst: &Path, port: u16, opts: ReceiverOptions) -> Result<u64> {
    let receiver = Receiver::bind(dst, port, opts)?;
    if let Ok(addr) = receiver.local_addr() {
        tracing::info!(addr = %addr, "listening");
    }
    receiver.run()
}

fn listen_dual_stack(port: u16) -> Result<TcpListener> {
    // IPv6 socket with V6ONLY off serves both families on one fd.
    unsafe {
        let fd = libc::socket(libc::AF_INET6, libc::SOCK_STREAM, 0);
        if fd >= 0 {
            let one: libc::c_int = 1;
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_REUSEADDR,
                &one as *const _ as *const libc::c_void,
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            );
            let zero: libc::c_int = 0;
            libc::setsockopt(
                fd,
                libc::IPPROTO_IPV6,
                libc::IPV6_V6ONLY,
                &zero as *const _ as *const libc::c_void,
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            );

            let mut addr: libc::sockaddr_in6 = std::mem::zeroed();
            addr.sin6_family = libc::AF_INET6 as libc::sa_family_t;
            addr.sin6_port = port.to_be();
            // in6addr_any is all zeroes, which zeroed() already gave us.

            if libc::bind(
                fd,
                &addr as *const _ as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t,
            ) == 0
                && libc::listen(fd, 5) == 0
            {
                return Ok(TcpListener::from_raw_fd(fd));
            }
            libc::close(fd);
        }

        // IPv4-only fallback.
        let fd = libc::socket(libc::AF_INET, libc::SOCK_STREAM, 0);
        if fd < 0 {
            return Err(RingSyncError::connection(
                format!("port {port}"),
                std::io::Error::last_os_error().to_string(),
            ));
        }
        let one: libc::c_int = 1;
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_REUSEADDR,
            &one as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        );

        let mut addr: libc::sockaddr_in = std::mem::zeroed();
        addr.sin_family = libc::AF_INET as libc::sa_family_t;
        addr.sin_port = port.to_be();
        addr.sin_addr.s_addr = libc::INADDR_ANY;

        if libc::bind(
            fd,
            &addr as *const _ as *const libc::sockaddr,
            std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
        ) != 0
            || libc::listen(fd, 5) != 0
        {
            let err = std::io::Error::last_os_error();
            libc::close(fd);
            return Err(RingSyncError::connection(
                format!("port {port}"),
                err.to_string(),
            ));
        }
        Ok(TcpListener::from_raw_fd(fd))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dual_stack_listener_binds_ephemeral() {
        let listener = listen_dual_stack(0).expect("bind");
        let addr = listener.local_addr().expect("addr");
        assert_ne!(addr.port(), 0);
    }

    #[test]
    fn test_bind_creates_destination_root() {
        let dir = tempfile::tempdir().expect("tempdir");
        let dst = dir.path().join("incoming/tree");
        let receiver = Receiver::bind(
            &dst,
            0,
            ReceiverOptions {
                secret: None,
                use_tls: false,
                chunk_size: 64 * 1024,
            },
        )
        .expect("bind");
        assert!(dst.is_dir());
        drop(receiver);
    }
}
