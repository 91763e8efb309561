//! Thin wrapper over the io_uring submission/completion ring
//!
//! Every preparation call records an opaque u64 user-data value that
//! identifies the owning context (a slab handle, not a pointer — dispatch is
//! an O(1) index lookup and handle reuse is bounded by the ring depth). The
//! context itself records which kind of operation is outstanding, since one
//! context issues several distinct op kinds over its lifetime.
//!
//! If the submission queue is full when preparing, the manager submits
//! implicitly and retries once. A second failure means more operations were
//! prepared than the ring depth allows, which the workers' in-flight
//! accounting rules out; it panics as a programming error.

use crate::error::{Result, RingSyncError};
use io_uring::{opcode, squeue, types, IoUring};
use std::os::unix::io::RawFd;

/// One reaped completion event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    /// Slab handle of the owning context
    pub user_data: u64,
    /// Kernel result code (negative errno on failure)
    pub result: i32,
}

/// Owner of one io_uring instance of fixed depth
pub struct RingManager {
    ring: IoUring,
    depth: u32,
}

impl RingManager {
    /// Initialize a ring with `depth` submission entries
    pub fn new(depth: u32) -> Result<Self> {
        let ring = IoUring::new(depth).map_err(RingSyncError::Ring)?;
        Ok(Self { ring, depth })
    }

    /// Configured submission queue depth
    pub fn depth(&self) -> u32 {
        self.depth
    }

    fn push(&mut self, entry: squeue::Entry) {
        if unsafe { self.ring.submission().push(&entry) }.is_ok() {
            return;
        }
        // SQ full: flush and retry once.
        self.ring
            .submit()
            .expect("io_uring submit failed while draining a full submission queue");
        if unsafe { self.ring.submission().push(&entry) }.is_err() {
            panic!("io_uring submission queue still full after implicit submit");
        }
    }

    /// Prepare an openat
    pub fn prepare_openat(
        &mut self,
        dirfd: RawFd,
        path: *const libc::c_char,
        flags: i32,
        mode: u32,
        user_data: u64,
    ) {
        let entry = opcode::OpenAt::new(types::Fd(dirfd), path)
            .flags(flags)
            .mode(mode)
            .build()
            .user_data(user_data);
        self.push(entry);
    }

    /// Prepare a statx; `statxbuf` must stay valid until completion
    pub fn prepare_statx(
        &mut self,
        dirfd: RawFd,
        path: *const libc::c_char,
        flags: i32,
        mask: u32,
        statxbuf: *mut libc::statx,
        user_data: u64,
    ) {
        let entry = opcode::Statx::new(types::Fd(dirfd), path, statxbuf as *mut _)
            .flags(flags)
            .mask(mask)
            .build()
            .user_data(user_data);
        self.push(entry);
    }

    /// Prepare a close
    pub fn prepare_close(&mut self, fd: RawFd, user_data: u64) {
        let entry = opcode::Close::new(types::Fd(fd))
            .build()
            .user_data(user_data);
        self.push(entry);
    }

    /// Prepare a positioned read into `buf`
    pub fn prepare_read(
        &mut self,
        fd: RawFd,
        buf: *mut u8,
        len: u32,
        offset: u64,
        user_data: u64,
    ) {
        let entry = opcode::Read::new(types::Fd(fd), buf, len)
            .offset(offset)
            .build()
            .user_data(user_data);
        self.push(entry);
    }

    /// Prepare a positioned write from `buf`
    pub fn prepare_write(
        &mut self,
        fd: RawFd,
        buf: *const u8,
        len: u32,
        offset: u64,
        user_data: u64,
    ) {
        let entry = opcode::Write::new(types::Fd(fd), buf, len)
            .offset(offset)
            .build()
            .user_data(user_data);
        self.push(entry);
    }

    /// Prepare a read into a registered buffer
    pub fn prepare_read_fixed(
        &mut self,
        fd: RawFd,
        buf: *mut u8,
        len: u32,
        offset: u64,
        buf_index: u16,
        user_data: u64,
    ) {
        let entry = opcode::ReadFixed::new(types::Fd(fd), buf, len, buf_index)
            .offset(offset)
            .build()
            .user_data(user_data);
        self.push(entry);
    }

    /// Prepare a write from a registered buffer
    pub fn prepare_write_fixed(
        &mut self,
        fd: RawFd,
        buf: *const u8,
        len: u32,
        offset: u64,
        buf_index: u16,
        user_data: u64,
    ) {
        let entry = opcode::WriteFixed::new(types::Fd(fd), buf, len, buf_index)
            .offset(offset)
            .build()
            .user_data(user_data);
        self.push(entry);
    }

    /// Prepare a splice.
    ///
    /// A pipe end must pass `-1` for its offset (the kernel rejects offsets
    /// on pipes); a file end names its position explicitly.
    pub fn prepare_splice(
        &mut self,
        fd_in: RawFd,
        off_in: i64,
        fd_out: RawFd,
        off_out: i64,
        len: u32,
        flags: u32,
        user_data: u64,
    ) {
        let entry = opcode::Splice::new(types::Fd(fd_in), off_in, types::Fd(fd_out), off_out, len)
            .flags(flags)
            .build()
            .user_data(user_data);
        self.push(entry);
    }

    /// Prepare a mkdirat
    pub fn prepare_mkdirat(
        &mut self,
        dirfd: RawFd,
        path: *const libc::c_char,
        mode: u32,
        user_data: u64,
    ) {
        let entry = opcode::MkDirAt::new(types::Fd(dirfd), path)
            .mode(mode)
            .build()
            .user_data(user_data);
        self.push(entry);
    }

    /// Prepare a connect; `addr` must stay valid until completion
    pub fn prepare_connect(
        &mut self,
        fd: RawFd,
        addr: *const libc::sockaddr,
        addrlen: libc::socklen_t,
        user_data: u64,
    ) {
        let entry = opcode::Connect::new(types::Fd(fd), addr, addrlen)
            .build()
            .user_data(user_data);
        self.push(entry);
    }

    /// Prepare an accept; `addr`/`addrlen` must stay valid until completion
    pub fn prepare_accept(
        &mut self,
        fd: RawFd,
        addr: *mut libc::sockaddr,
        addrlen: *mut libc::socklen_t,
        user_data: u64,
    ) {
        let entry = opcode::Accept::new(types::Fd(fd), addr, addrlen)
            .build()
            .user_data(user_data);
        self.push(entry);
    }

    /// Prepare a socket send
    pub fn prepare_send(
        &mut self,
        fd: RawFd,
        buf: *const u8,
        len: u32,
        flags: i32,
        user_data: u64,
    ) {
        let entry = opcode::Send::new(types::Fd(fd), buf, len)
            .flags(flags)
            .build()
            .user_data(user_data);
        self.push(entry);
    }

    /// Prepare a socket recv
    pub fn prepare_recv(
        &mut self,
        fd: RawFd,
        buf: *mut u8,
        len: u32,
        flags: i32,
        user_data: u64,
    ) {
        let entry = opcode::Recv::new(types::Fd(fd), buf, len)
            .flags(flags)
            .build()
            .user_data(user_data);
        self.push(entry);
    }

    /// Prepare a socket shutdown
    pub fn prepare_shutdown(&mut self, fd: RawFd, how: i32, user_data: u64) {
        let entry = opcode::Shutdown::new(types::Fd(fd), how)
            .build()
            .user_data(user_data);
        self.push(entry);
    }

    /// Register a buffer pool's memory with the kernel (one-shot).
    ///
    /// The iovecs must describe memory that outlives the ring.
    pub fn register_buffers(&mut self, iovecs: &[libc::iovec]) -> Result<()> {
        unsafe { self.ring.submitter().register_buffers(iovecs) }.map_err(RingSyncError::Ring)
    }

    /// Submit all prepared entries
    pub fn submit(&mut self) -> Result<usize> {
        self.ring.submit().map_err(RingSyncError::Ring)
    }

    /// Block for one completion and return it
    pub fn wait_one(&mut self) -> Result<Completion> {
        self.ring.submit_and_wait(1).map_err(RingSyncError::Ring)?;
        let cqe = self
            .ring
            .completion()
            .next()
            .ok_or_else(|| RingSyncError::Ring(std::io::Error::other("completion missing")))?;
        Ok(Completion {
            user_data: cqe.user_data(),
            result: cqe.result(),
        })
    }

    /// Drain all ready completions without blocking
    pub fn drain_completions(&mut self) -> Vec<Completion> {
        self.ring
            .completion()
            .map(|cqe| Completion {
                user_data: cqe.user_data(),
                result: cqe.result(),
            })
            .collect()
    }

    /// Block for at least one completion, then drain everything ready
    pub fn wait_and_drain(&mut self) -> Result<Vec<Completion>> {
        self.ring.submit_and_wait(1).map_err(RingSyncError::Ring)?;
        Ok(self.drain_completions())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;
    use std::io::Write;
    use std::os::unix::io::AsRawFd;

    #[test]
    fn test_read_write_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let src_path = dir.path().join("src.bin");
        std::fs::write(&src_path, b"ring round trip").expect("write source");

        let src = std::fs::File::open(&src_path).expect("open source");
        let dst_path = dir.path().join("dst.bin");
        let dst = std::fs::File::create(&dst_path).expect("create dest");

        let mut ring = RingManager::new(8).expect("ring");
        let mut buf = [0u8; 64];

        ring.prepare_read(src.as_raw_fd(), buf.as_mut_ptr(), buf.len() as u32, 0, 1);
        let comp = ring.wait_one().expect("read completion");
        assert_eq!(comp.user_data, 1);
        assert_eq!(comp.result, 15);

        ring.prepare_write(dst.as_raw_fd(), buf.as_ptr(), comp.result as u32, 0, 2);
        let comp = ring.wait_one().expect("write completion");
        assert_eq!(comp.user_data, 2);
        assert_eq!(comp.result, 15);

        drop(dst);
        assert_eq!(
            std::fs::read(&dst_path).expect("read dest"),
            b"ring round trip"
        );
    }

    #[test]
    fn test_openat_statx_close() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("stat_me");
        std::fs::write(&path, vec![7u8; 1234]).expect("write file");

        let c_path = CString::new(path.to_str().expect("utf8 path")).expect("cstring");
        let mut ring = RingManager::new(8).expect("ring");

        ring.prepare_openat(libc::AT_FDCWD, c_path.as_ptr(), libc::O_RDONLY, 0, 1);
        let comp = ring.wait_one().expect("open completion");
        assert!(comp.result >= 0, "openat failed: {}", comp.result);
        let fd = comp.result;

        let mut stx: libc::statx = unsafe { std::mem::zeroed() };
        let empty = CString::new("").expect("cstring");
        ring.prepare_statx(
            fd,
            empty.as_ptr(),
            libc::AT_EMPTY_PATH,
            libc::STATX_SIZE | libc::STATX_MODE,
            &mut stx,
            2,
        );
        let comp = ring.wait_one().expect("statx completion");
        assert_eq!(comp.result, 0, "statx failed: {}", comp.result);
        assert_eq!(stx.stx_size, 1234);

        ring.prepare_close(fd, 3);
        let comp = ring.wait_one().expect("close completion");
        assert_eq!(comp.result, 0);
    }

    #[test]
    fn test_mkdirat() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("made_by_ring");
        let c_path = CString::new(path.to_str().expect("utf8 path")).expect("cstring");

        let mut ring = RingManager::new(4).expect("ring");
        ring.prepare_mkdirat(libc::AT_FDCWD, c_path.as_ptr(), 0o755, 1);
        let comp = ring.wait_one().expect("mkdirat completion");
        assert_eq!(comp.result, 0, "mkdirat failed: {}", comp.result);
        assert!(path.is_dir());
    }

    #[test]
    fn test_fixed_buffers() {
        let dir = tempfile::tempdir().expect("tempdir");
        let src_path = dir.path().join("fixed_src");
        std::fs::write(&src_path, b"registered buffer data").expect("write source");
        let src = std::fs::File::open(&src_path).expect("open source");
        let dst = std::fs::File::create(dir.path().join("fixed_dst")).expect("create dest");

        let mut buf = vec![0u8; 4096];
        let iovecs = [libc::iovec {
            iov_base: buf.as_mut_ptr() as *mut libc::c_void,
            iov_len: buf.len(),
        }];

        let mut ring = RingManager::new(4).expect("ring");
        ring.register_buffers(&iovecs).expect("register buffers");

        ring.prepare_read_fixed(src.as_raw_fd(), buf.as_mut_ptr(), 4096, 0, 0, 1);
        let comp = ring.wait_one().expect("read_fixed completion");
        assert_eq!(comp.result, 22);

        ring.prepare_write_fixed(dst.as_raw_fd(), buf.as_ptr(), comp.result as u32, 0, 0, 2);
        let comp = ring.wait_one().expect("write_fixed completion");
        assert_eq!(comp.result, 22);
    }

    #[test]
    fn test_send_recv_shutdown_over_socketpair() {
        let mut fds = [0 as RawFd; 2];
        let rc = unsafe {
            libc::socketpair(libc::AF_UNIX, libc::SOCK_STREAM, 0, fds.as_mut_ptr())
        };
        assert_eq!(rc, 0);
        let (a, b) = (fds[0], fds[1]);

        let mut ring = RingManager::new(8).expect("ring");
        let payload = b"over the wire";
        ring.prepare_send(a, payload.as_ptr(), payload.len() as u32, 0, 1);
        let comp = ring.wait_one().expect("send completion");
        assert_eq!(comp.result, payload.len() as i32);

        let mut incoming = [0u8; 64];
        ring.prepare_recv(b, incoming.as_mut_ptr(), incoming.len() as u32, 0, 2);
        let comp = ring.wait_one().expect("recv completion");
        assert_eq!(comp.result, payload.len() as i32);
        assert_eq!(&incoming[..payload.len()], payload);

        ring.prepare_shutdown(a, libc::SHUT_WR, 3);
        let comp = ring.wait_one().expect("shutdown completion");
        assert_eq!(comp.result, 0);

        // Peer sees EOF after the shutdown.
        ring.prepare_recv(b, incoming.as_mut_ptr(), incoming.len() as u32, 0, 4);
        let comp = ring.wait_one().expect("eof recv completion");
        assert_eq!(comp.result, 0);

        unsafe {
            libc::close(a);
            libc::close(b);
        }
    }

    #[test]
    fn test_connect_accept_over_loopback() {
        unsafe {
            let listen_fd = libc::socket(libc::AF_INET, libc::SOCK_STREAM, 0);
            assert!(listen_fd >= 0);

            let mut addr: libc::sockaddr_in = std::mem::zeroed();
            addr.sin_family = libc::AF_INET as libc::sa_family_t;
            addr.sin_addr.s_addr = u32::from_be_bytes([127, 0, 0, 1]).to_be();
            let addr_len = std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
            assert_eq!(
                libc::bind(listen_fd, &addr as *const _ as *const libc::sockaddr, addr_len),
                0
            );
            let mut bound_len = addr_len;
            assert_eq!(
                libc::getsockname(
                    listen_fd,
                    &mut addr as *mut _ as *mut libc::sockaddr,
                    &mut bound_len,
                ),
                0
            );
            assert_eq!(libc::listen(listen_fd, 1), 0);

            let client_fd = libc::socket(libc::AF_INET, libc::SOCK_STREAM, 0);
            assert!(client_fd >= 0);

            let mut ring = RingManager::new(8).expect("ring");
            ring.prepare_accept(listen_fd, std::ptr::null_mut(), std::ptr::null_mut(), 1);
            ring.prepare_connect(client_fd, &addr as *const _ as *const libc::sockaddr, addr_len, 2);
            ring.submit().expect("submit");

            let mut accepted_fd = -1;
            let mut seen = 0;
            while seen < 2 {
                let comp = ring.wait_one().expect("completion");
                assert!(comp.result >= 0, "op {} failed: {}", comp.user_data, comp.result);
                if comp.user_data == 1 {
                    accepted_fd = comp.result;
                }
                seen += 1;
            }
            assert!(accepted_fd >= 0);

            libc::close(accepted_fd);
            libc::close(client_fd);
            libc::close(listen_fd);
        }
    }

    #[test]
    fn test_batched_drain() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("many");
        let mut f = std::fs::File::create(&path).expect("create");
        f.write_all(&[9u8; 4096]).expect("fill");
        drop(f);
        let f = std::fs::File::open(&path).expect("open");

        let mut ring = RingManager::new(8).expect("ring");
        let mut bufs = vec![[0u8; 512]; 4];
        for (i, buf) in bufs.iter_mut().enumerate() {
            ring.prepare_read(
                f.as_raw_fd(),
                buf.as_mut_ptr(),
                512,
                (i * 512) as u64,
                i as u64,
            );
        }
        ring.submit().expect("submit");

        let mut seen = 0;
        while seen < 4 {
            let comps = ring.wait_and_drain().expect("drain");
            assert!(!comps.is_empty());
            for comp in comps {
                assert_eq!(comp.result, 512);
                seen += 1;
            }
        }
    }
}
