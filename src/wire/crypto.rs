// src/wire/crypto.rs
// Per-frame authenticated encryption with the negotiated AES session key

use aes_gcm::AesGcm;
use aes_gcm::aead::consts::U16;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::aes::{Aes128, Aes192, Aes256};
use rand::RngCore;
use rand::rngs::OsRng;

use super::WireError;

/// The protocol uses a fixed 16-byte nonce, wider than GCM's 96-bit default.
pub const NONCE_LEN: usize = 16;
pub const TAG_LEN: usize = 16;

type Gcm<C> = AesGcm<C, U16>;

/// AES-GCM cipher for one session, keyed by whichever key width the client
/// wrapped during the handshake.
pub enum SessionCipher {
    Aes128(Gcm<Aes128>),
    Aes192(Gcm<Aes192>),
    Aes256(Gcm<Aes256>),
}

impl SessionCipher {
    pub fn new(key: &[u8]) -> Result<Self, WireError> {
        match key.len() {
            16 => Ok(Self::Aes128(Gcm::new(GenericArray::from_slice(key)))),
            24 => Ok(Self::Aes192(Gcm::new(GenericArray::from_slice(key)))),
            32 => Ok(Self::Aes256(Gcm::new(GenericArray::from_slice(key)))),
            n => Err(WireError::KeyLength(n)),
        }
    }

    pub fn key_bits(&self) -> usize {
        match self {
            Self::Aes128(_) => 128,
            Self::Aes192(_) => 192,
            Self::Aes256(_) => 256,
        }
    }

    /// Encrypt one frame body: fresh random nonce, then `nonce ‖ ciphertext ‖ tag`.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, WireError> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let nonce_ref = GenericArray::from_slice(&nonce);

        let ciphertext = match self {
            Self::Aes128(cipher) => cipher.encrypt(nonce_ref, plaintext),
            Self::Aes192(cipher) => cipher.encrypt(nonce_ref, plaintext),
            Self::Aes256(cipher) => cipher.encrypt(nonce_ref, plaintext),
        }
        .map_err(|_| WireError::SealFailure)?;

        let mut body = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        body.extend_from_slice(&nonce);
        body.extend_from_slice(&ciphertext);
        Ok(body)
    }

    /// Decrypt one frame body and verify its tag. Tag failure is fatal to
    /// the session.
    pub fn open(&self, body: &[u8]) -> Result<Vec<u8>, WireError> {
        if body.len() < NONCE_LEN + TAG_LEN {
            return Err(WireError::TruncatedFrame(body.len()));
        }
        let (nonce, sealed) = body.split_at(NONCE_LEN);
        let nonce_ref = GenericArray::from_slice(nonce);

        match self {
            Self::Aes128(cipher) => cipher.decrypt(nonce_ref, sealed),
            Self::Aes192(cipher) => cipher.decrypt(nonce_ref, sealed),
            Self::Aes256(cipher) => cipher.decrypt(nonce_ref, sealed),
        }
        .map_err(|_| WireError::TagFailure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn random_key(len: usize) -> Vec<u8> {
        let mut key = vec![0u8; len];
        OsRng.fill_bytes(&mut key);
        key
    }

    #[test]
    fn round_trip_for_every_key_width() {
        let mut payload = vec![0u8; 1024];
        OsRng.fill_bytes(&mut payload);

        for key_len in [16, 24, 32] {
            let cipher = SessionCipher::new(&random_key(key_len)).unwrap();
            let sealed = cipher.seal(&payload).unwrap();
            assert_eq!(sealed.len(), NONCE_LEN + payload.len() + TAG_LEN);
            assert_eq!(cipher.open(&sealed).unwrap(), payload);
        }
    }

    #[test]
    fn nonces_are_fresh_per_frame() {
        let cipher = SessionCipher::new(&random_key(32)).unwrap();
        let a = cipher.seal(b"same plaintext").unwrap();
        let b = cipher.seal(b"same plaintext").unwrap();
        assert_ne!(a[..NONCE_LEN], b[..NONCE_LEN]);
        assert_ne!(a, b);
    }

    #[test]
    fn tampered_frame_fails_the_tag() {
        let cipher = SessionCipher::new(&random_key(32)).unwrap();
        let mut sealed = cipher.seal(b"payload under test").unwrap();
        let flip_at = NONCE_LEN + 3;
        sealed[flip_at] ^= 0x01;
        assert!(matches!(cipher.open(&sealed), Err(WireError::TagFailure)));
    }

    #[test]
    fn wrong_key_fails_the_tag() {
        let sealer = SessionCipher::new(&random_key(32)).unwrap();
        let opener = SessionCipher::new(&random_key(32)).unwrap();
        let sealed = sealer.seal(b"payload").unwrap();
        assert!(matches!(opener.open(&sealed), Err(WireError::TagFailure)));
    }

    #[test]
    fn invalid_key_lengths_rejected() {
        assert!(matches!(
            SessionCipher::new(&[0u8; 15]),
            Err(WireError::KeyLength(15))
        ));
        assert!(matches!(
            SessionCipher::new(&[]),
            Err(WireError::KeyLength(0))
        ));
    }

    #[test]
    fn truncated_body_rejected_before_decrypt() {
        let cipher = SessionCipher::new(&random_key(16)).unwrap();
        assert!(matches!(
            cipher.open(&[0u8; NONCE_LEN + TAG_LEN - 1]),
            Err(WireError::TruncatedFrame(_))
        ));
    }
}
