//! Network transfer
//!
//! A sender connects, authenticates with a pre-shared secret, then streams
//! each file as a FILE_HDR frame followed by raw content. The receiver
//! validates paths and reproduces the tree. Optional kernel TLS encrypts
//! the stream using keys derived from the secret plus one nonce per side.
//!
//! Two variants share the wire format: the synchronous endpoints (kTLS
//! capable, splice capable) and the io_uring endpoints, which pipeline file
//! opens and stats through the ring while keeping the byte stream strictly
//! ordered.

pub mod ktls;
pub mod protocol;

mod receiver;
mod sender;
mod uring;

pub use receiver::{run_receiver, Receiver, ReceiverOptions};
pub use sender::{run_sender, SenderOptions};
pub use uring::{run_receiver_uring, run_sender_uring};

use crate::error::{Result, RingSyncError};
use protocol::{parse_header, Message, MsgType, MSG_HEADER_SIZE};
use std::os::unix::io::RawFd;

/// Send an entire buffer over a socket, honoring partial writes
pub(crate) fn send_all(fd: RawFd, buf: &[u8], flags: libc::c_int) -> std::io::Result<()> {
    let mut sent = 0;
    while sent < buf.len() {
        let n = unsafe {
            libc::send(
                fd,
                buf[sent..].as_ptr() as *const libc::c_void,
                buf.len() - sent,
                flags,
            )
        };
        if n < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
        if n == 0 {
            return Err(std::io::ErrorKind::WriteZero.into());
        }
        sent += n as usize;
    }
    Ok(())
}

/// Receive exactly `buf.len()` bytes from a socket
pub(crate) fn recv_all(fd: RawFd, buf: &mut [u8]) -> std::io::Result<()> {
    let mut received = 0;
    while received < buf.len() {
        let n = unsafe {
            libc::recv(
                fd,
                buf[received..].as_mut_ptr() as *mut libc::c_void,
                buf.len() - received,
                0,
            )
        };
        if n < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
        if n == 0 {
            return Err(std::io::ErrorKind::UnexpectedEof.into());
        }
        received += n as usize;
    }
    Ok(())
}

/// Encode and send one message; `more` sets MSG_MORE for frames that will
/// be followed immediately by further data
pub(crate) fn send_message(fd: RawFd, msg: &Message, more: bool) -> Result<()> {
    let frame = msg.encode();
    let flags = if more { libc::MSG_MORE } else { 0 };
    send_all(fd, &frame, flags)
        .map_err(|e| RingSyncError::protocol(format!("connection lost: {e}")))
}

/// Receive one frame: header, then a bounded payload
pub(crate) fn recv_frame(fd: RawFd) -> Result<(MsgType, Vec<u8>)> {
    let mut header = [0u8; MSG_HEADER_SIZE];
    recv_all(fd, &mut header)
        .map_err(|e| RingSyncError::protocol(format!("connection lost: {e}")))?;
    let (msg_type, payload_len) = parse_header(&header)?;

    let mut payload = vec![0u8; payload_len as usize];
    recv_all(fd, &mut payload)
        .map_err(|e| RingSyncError::protocol(format!("connection lost: {e}")))?;
    Ok((msg_type, payload))
}

/// Split a `host:port` string, using the last colon so IPv6 literals work
pub fn parse_host_port(s: &str) -> Result<(String, u16)> {
    let colon = s
        .rfind(':')
        .ok_or_else(|| RingSyncError::config(format!("invalid host:port '{s}'")))?;
    let host = s[..colon].to_string();
    let port: u16 = s[colon + 1..]
        .parse()
        .map_err(|_| RingSyncError::config(format!("invalid port in '{s}'")))?;
    if host.is_empty() || port == 0 {
        return Err(RingSyncError::config(format!("invalid host:port '{s}'")));
    }
    Ok((host, port))
}
