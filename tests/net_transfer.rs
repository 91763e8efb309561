//! Loopback network transfer scenarios
//!
//! These run sender and receiver in-process over 127.0.0.1 without kTLS
//! (key installation needs the kernel tls module; the key schedule itself
//! is covered by unit tests).

use ringsync::net::{run_sender, run_sender_uring, Receiver, ReceiverOptions, SenderOptions};
use ringsync::RingSyncError;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::thread;

const CHUNK: usize = 64 * 1024;

fn patterned(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i.wrapping_mul(131) % 253) as u8).collect()
}

fn build_tree(root: &Path) {
    std::fs::create_dir_all(root.join("sub/deep")).expect("mkdir");
    std::fs::write(root.join("empty.bin"), b"").expect("write");
    std::fs::set_permissions(
        root.join("empty.bin"),
        std::fs::Permissions::from_mode(0o640),
    )
    .expect("chmod");
    std::fs::write(root.join("hello.txt"), b"Hello io_uring!").expect("write");
    std::fs::write(root.join("big.bin"), patterned(100 * 1024)).expect("write");
    std::fs::set_permissions(root.join("big.bin"), std::fs::Permissions::from_mode(0o600))
        .expect("chmod");
    std::fs::write(root.join("sub/deep/nested.dat"), patterned(3000)).expect("write");
}

fn assert_tree_matches(src: &Path, dst: &Path) {
    for rel in ["empty.bin", "hello.txt", "big.bin", "sub/deep/nested.dat"] {
        let src_file = src.join(rel);
        let dst_file = dst.join(rel);
        assert!(dst_file.exists(), "missing {rel}");
        assert_eq!(
            std::fs::read(&src_file).expect("read src"),
            std::fs::read(&dst_file).expect("read dst"),
            "content mismatch for {rel}"
        );
        let src_mode = std::fs::metadata(&src_file).expect("stat").permissions().mode() & 0o777;
        let dst_mode = std::fs::metadata(&dst_file).expect("stat").permissions().mode() & 0o777;
        assert_eq!(src_mode, dst_mode, "mode mismatch for {rel}");
    }
}

fn receiver_opts(secret: &str) -> ReceiverOptions {
    ReceiverOptions {
        secret: Some(secret.to_string()),
        use_tls: false,
        chunk_size: CHUNK,
    }
}

#[test]
fn sync_transfer_round_trip() {
    let dir = tempfile::tempdir().expect("tempdir");
    let src = dir.path().join("src");
    let dst = dir.path().join("dst");
    build_tree(&src);

    let receiver = Receiver::bind(&dst, 0, receiver_opts("abc123")).expect("bind");
    let port = receiver.local_addr().expect("addr").port();
    let server = thread::spawn(move || receiver.run());

    let sent = run_sender(
        &src,
        "127.0.0.1",
        port,
        &SenderOptions {
            secret: Some("abc123".to_string()),
            use_splice: false,
            use_tls: false,
            chunk_size: CHUNK,
        },
    )
    .expect("sender");
    let received = server.join().expect("receiver thread").expect("receiver");

    assert_eq!(sent, 4);
    assert_eq!(received, 4);
    assert_tree_matches(&src, &dst);
}

#[test]
fn sync_transfer_with_splice() {
    let dir = tempfile::tempdir().expect("tempdir");
    let src = dir.path().join("src");
    let dst = dir.path().join("dst");
    build_tree(&src);

    let receiver = Receiver::bind(&dst, 0, receiver_opts("abc123")).expect("bind");
    let port = receiver.local_addr().expect("addr").port();
    let server = thread::spawn(move || receiver.run());

    run_sender(
        &src,
        "127.0.0.1",
        port,
        &SenderOptions {
            secret: Some("abc123".to_string()),
            use_splice: true,
            use_tls: false,
            chunk_size: CHUNK,
        },
    )
    .expect("sender");
    server.join().expect("receiver thread").expect("receiver");

    assert_tree_matches(&src, &dst);
}

#[test]
fn uring_transfer_round_trip() {
    let dir = tempfile::tempdir().expect("tempdir");
    let src = dir.path().join("src");
    let dst = dir.path().join("dst");
    build_tree(&src);

    let receiver = Receiver::bind(&dst, 0, receiver_opts("abc123")).expect("bind");
    let port = receiver.local_addr().expect("addr").port();
    let server = thread::spawn(move || receiver.run_uring(16));

    let sent =
        run_sender_uring(&src, "127.0.0.1", port, Some("abc123"), 16, CHUNK).expect("sender");
    let received = server.join().expect("receiver thread").expect("receiver");

    assert_eq!(sent, 4);
    assert_eq!(received, 4);
    assert_tree_matches(&src, &dst);
}

#[test]
fn secret_mismatch_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let src = dir.path().join("src");
    let dst = dir.path().join("dst");
    build_tree(&src);

    let receiver = Receiver::bind(&dst, 0, receiver_opts("good")).expect("bind");
    let port = receiver.local_addr().expect("addr").port();
    let server = thread::spawn(move || receiver.run());

    let sender_result = run_sender(
        &src,
        "127.0.0.1",
        port,
        &SenderOptions {
            secret: Some("bad".to_string()),
            use_splice: false,
            use_tls: false,
            chunk_size: CHUNK,
        },
    );
    let receiver_result = server.join().expect("receiver thread");

    assert!(matches!(sender_result, Err(RingSyncError::Auth(_))));
    assert!(matches!(receiver_result, Err(RingSyncError::Auth(_))));

    // The destination root exists but must contain no files.
    let file_count = walkdir::WalkDir::new(&dst)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .count();
    assert_eq!(file_count, 0);
}

#[test]
fn uring_sender_aborts_when_receiver_dies_mid_transfer() {
    use ringsync::net::protocol::{Message, MSG_HEADER_SIZE, NONCE_SIZE};
    use std::io::{Read, Write};
    use std::net::TcpListener;

    let dir = tempfile::tempdir().expect("tempdir");
    let src = dir.path().join("src");
    std::fs::create_dir_all(&src).expect("mkdir");
    // The big file is created first so inode ordering sends it first; it
    // far exceeds the loopback socket buffers, so the sender is still
    // mid-file when the peer disappears.
    std::fs::write(src.join("a_big.bin"), vec![0xAB; 16 * 1024 * 1024]).expect("write");
    std::fs::write(src.join("b_small.bin"), b"must never be sent").expect("write");

    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("addr").port();

    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept");

        // Handshake: consume HELLO, answer HELLO_OK.
        let mut header = [0u8; MSG_HEADER_SIZE];
        stream.read_exact(&mut header).expect("hello header");
        let payload_len =
            u32::from_le_bytes([header[1], header[2], header[3], header[4]]) as usize;
        let mut payload = vec![0u8; payload_len];
        stream.read_exact(&mut payload).expect("hello payload");
        stream
            .write_all(
                &Message::HelloOk {
                    nonce: [0u8; NONCE_SIZE],
                }
                .encode(),
            )
            .expect("hello ok");

        // Take a sip of the first file's stream, then die. Unread bytes
        // make the close an abortive RST, so the sender's next send
        // fails instead of blocking.
        let mut sink = [0u8; 64 * 1024];
        let _ = stream.read_exact(&mut sink);
    });

    let result = run_sender_uring(&src, "127.0.0.1", port, None, 16, CHUNK);
    server.join().expect("receiver thread");

    // A mid-file failure must tear the session down, not skip to the
    // next file's FILE_HDR on a desynced stream.
    assert!(
        result.is_err(),
        "sender kept going after the connection died: {result:?}"
    );
    assert!(!matches!(result, Err(RingSyncError::Auth(_))));
}

#[test]
fn single_file_source() {
    let dir = tempfile::tempdir().expect("tempdir");
    let src = dir.path().join("only.bin");
    std::fs::write(&src, patterned(10_000)).expect("write");
    let dst = dir.path().join("dst");

    let receiver = Receiver::bind(
        &dst,
        0,
        ReceiverOptions {
            secret: None,
            use_tls: false,
            chunk_size: CHUNK,
        },
    )
    .expect("bind");
    let port = receiver.local_addr().expect("addr").port();
    let server = thread::spawn(move || receiver.run());

    run_sender(
        &src,
        "127.0.0.1",
        port,
        &SenderOptions {
            secret: None,
            use_splice: false,
            use_tls: false,
            chunk_size: CHUNK,
        },
    )
    .expect("sender");
    let received = server.join().expect("receiver thread").expect("receiver");

    assert_eq!(received, 1);
    assert_eq!(
        std::fs::read(dst.join("only.bin")).expect("read dest"),
        patterned(10_000)
    );
}
