// src/wire/mod.rs
// Wire session layer: length framing, session crypto, key exchange

use thiserror::Error;

pub mod crypto;
pub mod frame;
pub mod handshake;

pub use crypto::{NONCE_LEN, SessionCipher, TAG_LEN};
pub use frame::{MAX_FRAME_LEN, read_frame, write_frame};
pub use handshake::establish;

/// Errors of the framed, encrypted transport. All of these are fatal to the
/// session that raised them.
#[derive(Error, Debug)]
pub enum WireError {
    #[error("connection closed")]
    Closed,

    #[error("frame of {0} bytes exceeds the frame limit")]
    FrameTooLarge(usize),

    #[error("encrypted frame of {0} bytes is shorter than nonce and tag")]
    TruncatedFrame(usize),

    #[error("authentication tag verification failed")]
    TagFailure,

    #[error("encryption failed")]
    SealFailure,

    #[error("session key of {0} bytes is not a valid AES key")]
    KeyLength(usize),

    #[error("key exchange incomplete: {0} bytes after {1} reads")]
    ShortKeyExchange(usize, usize),

    #[error("handshake timed out")]
    HandshakeTimeout,

    #[error("RSA key exchange failed: {0}")]
    Rsa(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
