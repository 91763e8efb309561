//! Wire protocol for network transfer
//!
//! Binary, little-endian, framed: a one-byte type, a four-byte payload
//! length, then the payload. File content is not wrapped in per-chunk
//! frames: after a `FileHdr`, exactly `size` raw bytes follow on the
//! stream. The `FileData`/`FileEnd` types are reserved for a future
//! chunked mode; the codec round-trips them but the endpoints never emit
//! or accept them.

use crate::error::{Result, RingSyncError};

/// Current protocol version.
///
/// Version 1 was the original plaintext protocol; version 2 added handshake
/// nonces for the kTLS key derivation.
pub const PROTOCOL_VERSION: u8 = 2;

/// Frame header size: type (1) + payload length (4)
pub const MSG_HEADER_SIZE: usize = 5;

/// Nonce length carried in HELLO/HELLO_OK
pub const NONCE_SIZE: usize = 16;

/// Maximum pre-shared secret length
pub const MAX_SECRET_LEN: usize = 64;

/// Maximum relative path length
pub const MAX_PATH_LEN: usize = 4096;

/// Maximum error message length
pub const MAX_ERROR_MSG_LEN: usize = 256;

/// Upper bound on any legal payload, used to reject hostile lengths
/// before allocating (the largest frame is a FILE_HDR with a maximal path).
pub const MAX_FRAME_PAYLOAD: usize = 8 + 4 + 2 + MAX_PATH_LEN;

/// Frame type tags
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgType {
    /// Sender → receiver: version + secret + sender nonce
    Hello = 0x01,
    /// Receiver → sender: accepted, receiver nonce
    HelloOk = 0x02,
    /// Receiver → sender: rejected
    HelloFail = 0x03,
    /// File metadata; raw content follows on the stream
    FileHdr = 0x10,
    /// Reserved for chunked content
    FileData = 0x11,
    /// Reserved for chunked content
    FileEnd = 0x12,
    /// All files transferred
    AllDone = 0x20,
    /// Fatal error with message
    Error = 0xFF,
}

impl MsgType {
    /// Decode a wire tag
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Hello),
            0x02 => Some(Self::HelloOk),
            0x03 => Some(Self::HelloFail),
            0x10 => Some(Self::FileHdr),
            0x11 => Some(Self::FileData),
            0x12 => Some(Self::FileEnd),
            0x20 => Some(Self::AllDone),
            0xFF => Some(Self::Error),
            _ => None,
        }
    }
}

/// One protocol message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Handshake open
    Hello {
        /// Protocol version
        version: u8,
        /// Pre-shared secret bytes (clamped to [`MAX_SECRET_LEN`])
        secret: Vec<u8>,
        /// Sender nonce for key derivation
        nonce: [u8; NONCE_SIZE],
    },
    /// Handshake accept
    HelloOk {
        /// Receiver nonce for key derivation
        nonce: [u8; NONCE_SIZE],
    },
    /// Handshake reject
    HelloFail {
        /// Rejection reason (1 = secret mismatch)
        reason: u8,
    },
    /// File metadata; exactly `size` raw bytes follow the frame
    FileHdr {
        /// File size in bytes
        size: u64,
        /// Mode bits (low nine are applied)
        mode: u32,
        /// Relative destination path
        path: String,
    },
    /// Reserved: chunked file content
    FileData {
        /// Chunk bytes
        data: Vec<u8>,
    },
    /// Reserved: end of chunked content
    FileEnd,
    /// All files transferred
    AllDone,
    /// Fatal error
    Error {
        /// Error code
        code: u8,
        /// Human-readable message (clamped to [`MAX_ERROR_MSG_LEN`])
        message: String,
    },
}

fn put_u16(buf: &mut Vec<u8>, val: u16) {
    buf.extend_from_slice(&val.to_le_bytes());
}

fn put_u32(buf: &mut Vec<u8>, val: u32) {
    buf.extend_from_slice(&val.to_le_bytes());
}

fn put_u64(buf: &mut Vec<u8>, val: u64) {
    buf.extend_from_slice(&val.to_le_bytes());
}

fn get_u16(buf: &[u8]) -> u16 {
    u16::from_le_bytes([buf[0], buf[1]])
}

fn get_u32(buf: &[u8]) -> u32 {
    u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]])
}

fn get_u64(buf: &[u8]) -> u64 {
    u64::from_le_bytes([
        buf[0], buf[1], buf[2], buf[3], buf[4], buf[5], buf[6], buf[7],
    ])
}

impl Message {
    /// Wire tag of this message
    pub fn msg_type(&self) -> MsgType {
        match self {
            Message::Hello { .. } => MsgType::Hello,
            Message::HelloOk { .. } => MsgType::HelloOk,
            Message::HelloFail { .. } => MsgType::HelloFail,
            Message::FileHdr { .. } => MsgType::FileHdr,
            Message::FileData { .. } => MsgType::FileData,
            Message::FileEnd => MsgType::FileEnd,
            Message::AllDone => MsgType::AllDone,
            Message::Error { .. } => MsgType::Error,
        }
    }

    /// Encode into a complete frame (header + payload).
    ///
    /// Variable-length fields are clamped to their documented maxima, so
    /// encoding is total for any input.
    pub fn encode(&self) -> Vec<u8> {
        let mut payload = Vec::new();
        match self {
            Message::Hello {
                version,
                secret,
                nonce,
            } => {
                let secret = &secret[..secret.len().min(MAX_SECRET_LEN)];
                payload.push(*version);
                payload.push(secret.len() as u8);
                payload.extend_from_slice(secret);
                payload.extend_from_slice(nonce);
            }
            Message::HelloOk { nonce } => payload.extend_from_slice(nonce),
            Message::HelloFail { reason } => payload.push(*reason),
            Message::FileHdr { size, mode, path } => {
                let path = &path.as_bytes()[..path.len().min(MAX_PATH_LEN)];
                put_u64(&mut payload, *size);
                put_u32(&mut payload, *mode);
                put_u16(&mut payload, path.len() as u16);
                payload.extend_from_slice(path);
            }
            Message::FileData { data } => payload.extend_from_slice(data),
            Message::FileEnd | Message::AllDone => {}
            Message::Error { code, message } => {
                let message = &message.as_bytes()[..message.len().min(MAX_ERROR_MSG_LEN)];
                payload.push(*code);
                put_u16(&mut payload, message.len() as u16);
                payload.extend_from_slice(message);
            }
        }

        let mut frame = Vec::with_capacity(MSG_HEADER_SIZE + payload.len());
        frame.push(self.msg_type() as u8);
        put_u32(&mut frame, payload.len() as u32);
        frame.extend_from_slice(&payload);
        frame
    }

    /// Decode a payload of the given type
    pub fn decode(msg_type: MsgType, payload: &[u8]) -> Result<Message> {
        match msg_type {
            MsgType::Hello => {
                if payload.len() < 2 {
                    return Err(RingSyncError::protocol("HELLO payload too short"));
                }
                let version = payload[0];
                let secret_len = payload[1] as usize;
                if payload.len() < 2 + secret_len + NONCE_SIZE {
                    return Err(RingSyncError::protocol("HELLO payload too short"));
                }
                let secret = payload[2..2 + secret_len].to_vec();
                let mut nonce = [0u8; NONCE_SIZE];
                nonce.copy_from_slice(&payload[2 + secret_len..2 + secret_len + NONCE_SIZE]);
                Ok(Message::Hello {
                    version,
                    secret,
                    nonce,
                })
            }
            MsgType::HelloOk => {
                if payload.len() < NONCE_SIZE {
                    return Err(RingSyncError::protocol("HELLO_OK payload too short"));
                }
                let mut nonce = [0u8; NONCE_SIZE];
                nonce.copy_from_slice(&payload[..NONCE_SIZE]);
                Ok(Message::HelloOk { nonce })
            }
            MsgType::HelloFail => {
                if payload.is_empty() {
                    return Err(RingSyncError::protocol("HELLO_FAIL payload too short"));
                }
                Ok(Message::HelloFail { reason: payload[0] })
            }
            MsgType::FileHdr => {
                if payload.len() < 14 {
                    return Err(RingSyncError::protocol("FILE_HDR payload too short"));
                }
                let size = get_u64(payload);
                let mode = get_u32(&payload[8..]);
                let path_len = get_u16(&payload[12..]) as usize;
                if payload.len() < 14 + path_len {
                    return Err(RingSyncError::protocol("FILE_HDR path truncated"));
                }
                let path = std::str::from_utf8(&payload[14..14 + path_len])
                    .map_err(|_| RingSyncError::protocol("FILE_HDR path is not UTF-8"))?
                    .to_string();
                Ok(Message::FileHdr { size, mode, path })
            }
            MsgType::FileData => Ok(Message::FileData {
                data: payload.to_vec(),
            }),
            MsgType::FileEnd => Ok(Message::FileEnd),
            MsgType::AllDone => Ok(Message::AllDone),
            MsgType::Error => {
                if payload.len() < 3 {
                    return Err(RingSyncError::protocol("ERROR payload too short"));
                }
                let code = payload[0];
                let msg_len = get_u16(&payload[1..]) as usize;
                if payload.len() < 3 + msg_len {
                    return Err(RingSyncError::protocol("ERROR message truncated"));
                }
                let message = String::from_utf8_lossy(&payload[3..3 + msg_len]).into_owned();
                Ok(Message::Error { code, message })
            }
        }
    }
}

/// Parse a 5-byte frame header into (type, payload length)
pub fn parse_header(header: &[u8; MSG_HEADER_SIZE]) -> Result<(MsgType, u32)> {
    let msg_type = MsgType::from_u8(header[0])
        .ok_or_else(|| RingSyncError::protocol(format!("unknown frame type 0x{:02x}", header[0])))?;
    let payload_len = get_u32(&header[1..]);
    if payload_len as usize > MAX_FRAME_PAYLOAD {
        return Err(RingSyncError::protocol(format!(
            "frame payload of {payload_len} bytes exceeds limit"
        )));
    }
    Ok((msg_type, payload_len))
}

/// Reject paths that could escape the destination root.
///
/// Empty paths, absolute paths, any `..` occurrence, and NUL bytes are all
/// refused.
pub fn is_safe_path(path: &str) -> bool {
    !path.is_empty()
        && !path.starts_with('/')
        && !path.contains("..")
        && !path.contains('\0')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(msg: Message) {
        let frame = msg.encode();
        let mut header = [0u8; MSG_HEADER_SIZE];
        header.copy_from_slice(&frame[..MSG_HEADER_SIZE]);
        let (msg_type, payload_len) = parse_header(&header).expect("header");
        assert_eq!(msg_type, msg.msg_type());
        assert_eq!(payload_len as usize, frame.len() - MSG_HEADER_SIZE);
        let decoded =
            Message::decode(msg_type, &frame[MSG_HEADER_SIZE..]).expect("decode");
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_round_trip_all_variants() {
        round_trip(Message::Hello {
            version: PROTOCOL_VERSION,
            secret: b"abc123".to_vec(),
            nonce: [0x11; NONCE_SIZE],
        });
        round_trip(Message::HelloOk {
            nonce: [0x22; NONCE_SIZE],
        });
        round_trip(Message::HelloFail { reason: 1 });
        round_trip(Message::FileHdr {
            size: 327_680,
            mode: 0o640,
            path: "sub/dir/file.bin".to_string(),
        });
        round_trip(Message::FileData {
            data: vec![0xAB; 77],
        });
        round_trip(Message::FileEnd);
        round_trip(Message::AllDone);
        round_trip(Message::Error {
            code: 3,
            message: "open failed".to_string(),
        });
    }

    #[test]
    fn test_header_layout() {
        let frame = Message::AllDone.encode();
        assert_eq!(frame, vec![0x20, 0, 0, 0, 0]);

        let frame = Message::HelloFail { reason: 1 }.encode();
        assert_eq!(frame, vec![0x03, 1, 0, 0, 0, 1]);
    }

    #[test]
    fn test_file_hdr_layout() {
        let frame = Message::FileHdr {
            size: 0x0102030405060708,
            mode: 0o644,
            path: "ab".to_string(),
        }
        .encode();
        // type + len
        assert_eq!(frame[0], 0x10);
        assert_eq!(get_u32(&frame[1..]), 8 + 4 + 2 + 2);
        // little-endian size
        assert_eq!(&frame[5..13], &[8, 7, 6, 5, 4, 3, 2, 1]);
        // mode, path_len, path
        assert_eq!(get_u32(&frame[13..]), 0o644);
        assert_eq!(get_u16(&frame[17..]), 2);
        assert_eq!(&frame[19..21], b"ab");
    }

    #[test]
    fn test_oversize_inputs_clamped() {
        let frame = Message::Hello {
            version: 2,
            secret: vec![b'x'; 500],
            nonce: [0; NONCE_SIZE],
        }
        .encode();
        // secret_len byte reflects the clamp
        assert_eq!(frame[6] as usize, MAX_SECRET_LEN);

        let frame = Message::Error {
            code: 1,
            message: "e".repeat(10_000),
        }
        .encode();
        let payload_len = get_u32(&frame[1..]) as usize;
        assert_eq!(payload_len, 1 + 2 + MAX_ERROR_MSG_LEN);
    }

    #[test]
    fn test_truncated_payloads_rejected() {
        assert!(Message::decode(MsgType::Hello, &[2]).is_err());
        assert!(Message::decode(MsgType::HelloOk, &[0; 8]).is_err());
        assert!(Message::decode(MsgType::FileHdr, &[0; 10]).is_err());
        assert!(Message::decode(MsgType::Error, &[1, 50, 0, b'x']).is_err());
    }

    #[test]
    fn test_header_rejects_unknown_type_and_huge_payload() {
        let header = [0x42u8, 0, 0, 0, 0];
        assert!(parse_header(&header).is_err());

        let mut header = [0x10u8, 0, 0, 0, 0];
        header[1..].copy_from_slice(&(u32::MAX).to_le_bytes());
        assert!(parse_header(&header).is_err());
    }

    #[test]
    fn test_path_safety() {
        assert!(is_safe_path("file.txt"));
        assert!(is_safe_path("a/b/c.bin"));
        assert!(is_safe_path("dotted.name.ext"));

        assert!(!is_safe_path(""));
        assert!(!is_safe_path("/etc/passwd"));
        assert!(!is_safe_path("../escape"));
        assert!(!is_safe_path("a/../b"));
        assert!(!is_safe_path("trailing/.."));
        assert!(!is_safe_path("nul\0byte"));
    }
}
