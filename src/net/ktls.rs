//! PSK-derived kernel TLS
//!
//! Both endpoints know a pre-shared secret. The HELLO exchange carries one
//! fresh 16-byte nonce in each direction; from `secret` and the two nonces
//! both sides derive identical AES-128-GCM key material with
//! HKDF-SHA-256 and install it into the kernel's TLS ULP, after which the
//! TCP socket encrypts transparently — splice and sendfile keep working
//! because the cipher runs below the socket API.
//!
//! The 56 bytes of output split into two (key, iv, record-sequence)
//! triples: the first is the sender→receiver direction, the second the
//! reverse. The receiver installs them swapped. Confidentiality starts
//! with the first byte sent after both sides have installed keys; the
//! handshake itself is in the clear.

use crate::error::{Result, RingSyncError};
use crate::net::protocol::NONCE_SIZE;
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use std::os::unix::io::RawFd;
use zeroize::Zeroize;

/// AES-128 key length
pub const KEY_SIZE: usize = 16;
/// Implicit IV length carried in the crypto info
pub const IV_SIZE: usize = 4;
/// Record sequence number length
pub const REC_SEQ_SIZE: usize = 8;

/// Domain-separation label for the HKDF expand step
const HKDF_INFO: &[u8] = b"uring-sync-ktls-v1";

// Kernel TLS ULP constants (linux/tls.h); defined locally since libc does
// not export the full set on every target.
const SOL_TLS: libc::c_int = 282;
const TCP_ULP: libc::c_int = 31;
const TLS_TX: libc::c_int = 1;
const TLS_RX: libc::c_int = 2;
const TLS_1_2_VERSION: u16 = 0x0303;
const TLS_CIPHER_AES_GCM_128: u16 = 51;

/// Mirror of the kernel's `tls_crypto_info`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct TlsCryptoInfo {
    version: u16,
    cipher_type: u16,
}

/// Mirror of the kernel's `tls12_crypto_info_aes_gcm_128`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct Tls12CryptoInfoAesGcm128 {
    info: TlsCryptoInfo,
    iv: [u8; 8],
    key: [u8; KEY_SIZE],
    salt: [u8; 4],
    rec_seq: [u8; REC_SEQ_SIZE],
}

impl Tls12CryptoInfoAesGcm128 {
    fn from_material(material: &[u8]) -> Self {
        let mut out = Self {
            info: TlsCryptoInfo {
                version: TLS_1_2_VERSION,
                cipher_type: TLS_CIPHER_AES_GCM_128,
            },
            ..Self::default()
        };
        out.key.copy_from_slice(&material[..KEY_SIZE]);
        // The 4-byte IV occupies the head of the kernel's 8-byte iv field.
        out.iv[..IV_SIZE].copy_from_slice(&material[KEY_SIZE..KEY_SIZE + IV_SIZE]);
        out.rec_seq
            .copy_from_slice(&material[KEY_SIZE + IV_SIZE..KEY_SIZE + IV_SIZE + REC_SEQ_SIZE]);
        out
    }
}

/// Both directions' derived crypto info
pub struct KtlsKeys {
    /// Sender→receiver direction (sender TX, receiver RX)
    pub tx: Tls12CryptoInfoAesGcm128,
    /// Receiver→sender direction (sender RX, receiver TX)
    pub rx: Tls12CryptoInfoAesGcm128,
}

impl Drop for KtlsKeys {
    fn drop(&mut self) {
        self.tx.key.zeroize();
        self.tx.iv.zeroize();
        self.tx.rec_seq.zeroize();
        self.rx.key.zeroize();
        self.rx.iv.zeroize();
        self.rx.rec_seq.zeroize();
    }
}

/// Generate a random handshake nonce
pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Derive both direction keys from the shared secret and the two nonces.
///
/// Deterministic: both endpoints call this with the same arguments and get
/// byte-identical output. The intermediate key material is zeroized before
/// returning.
pub fn derive_keys(
    secret: &[u8],
    nonce_sender: &[u8; NONCE_SIZE],
    nonce_receiver: &[u8; NONCE_SIZE],
) -> Result<KtlsKeys> {
    let mut salt = [0u8; NONCE_SIZE * 2];
    salt[..NONCE_SIZE].copy_from_slice(nonce_sender);
    salt[NONCE_SIZE..].copy_from_slice(nonce_receiver);

    // tx(key+iv+seq) + rx(key+iv+seq) = 2 * 28 bytes
    let mut material = [0u8; 56];
    let hk = Hkdf::<Sha256>::new(Some(&salt[..]), secret);
    hk.expand(HKDF_INFO, &mut material)
        .map_err(|e| RingSyncError::Crypto(format!("HKDF expand failed: {e}")))?;

    let keys = KtlsKeys {
        tx: Tls12CryptoInfoAesGcm128::from_material(&material[..28]),
        rx: Tls12CryptoInfoAesGcm128::from_material(&material[28..]),
    };
    material.zeroize();
    Ok(keys)
}

fn set_ulp(fd: RawFd) -> Result<()> {
    let ulp = b"tls\0";
    let rc = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_TCP,
            TCP_ULP,
            ulp.as_ptr() as *const libc::c_void,
            ulp.len() as libc::socklen_t,
        )
    };
    if rc < 0 {
        return Err(RingSyncError::Crypto(format!(
            "cannot enable TLS ULP: {}",
            std::io::Error::last_os_error()
        )));
    }
    Ok(())
}

fn install(fd: RawFd, direction: libc::c_int, info: &Tls12CryptoInfoAesGcm128) -> Result<()> {
    let rc = unsafe {
        libc::setsockopt(
            fd,
            SOL_TLS,
            direction,
            info as *const _ as *const libc::c_void,
            std::mem::size_of::<Tls12CryptoInfoAesGcm128>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        let which = if direction == TLS_TX { "TLS_TX" } else { "TLS_RX" };
        return Err(RingSyncError::Crypto(format!(
            "cannot install {which} key: {}",
            std::io::Error::last_os_error()
        )));
    }
    Ok(())
}

/// Install keys on the sender's socket: tx outbound, rx inbound
pub fn enable_sender(fd: RawFd, keys: &KtlsKeys) -> Result<()> {
    set_ulp(fd)?;
    install(fd, TLS_TX, &keys.tx)?;
    install(fd, TLS_RX, &keys.rx)?;
    Ok(())
}

/// Install keys on the receiver's socket, swapped: rx outbound, tx inbound
pub fn enable_receiver(fd: RawFd, keys: &KtlsKeys) -> Result<()> {
    set_ulp(fd)?;
    install(fd, TLS_TX, &keys.rx)?;
    install(fd, TLS_RX, &keys.tx)?;
    Ok(())
}

/// Probe whether this kernel has the TLS ULP loaded
pub fn is_available() -> bool {
    let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_STREAM, 0) };
    if fd < 0 {
        return false;
    }
    let ulp = b"tls\0";
    let rc = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_TCP,
            TCP_ULP,
            ulp.as_ptr() as *const libc::c_void,
            ulp.len() as libc::socklen_t,
        )
    };
    let err = std::io::Error::last_os_error().raw_os_error();
    unsafe { libc::close(fd) };
    rc == 0 || err != Some(libc::ENOPROTOOPT)
}
