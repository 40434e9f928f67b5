// src/wire/handshake.rs
// Server-driven key exchange: RSA-OAEP key transport, then AES-GCM frames

use std::time::Duration;

use rand::RngCore;
use rand::rngs::OsRng;
use rsa::pkcs8::{EncodePublicKey, LineEnding};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

use super::frame::{read_frame, write_frame};
use super::{NONCE_LEN, SessionCipher, WireError};

/// Reads block at most this long until the key exchange completes; after it,
/// the session read loop blocks indefinitely.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

const RSA_BITS: usize = 2048;
/// Size of the RSA-OAEP ciphertext wrapping the session key (2048-bit modulus).
const WRAPPED_KEY_LEN: usize = 256;
/// How many reads to attempt before giving up on a short key exchange.
const MAX_KEY_READS: usize = 5;

/// Run the server side of the handshake on a fresh connection. Any failure
/// here is fatal; the caller closes the socket without a reply.
pub async fn establish<S>(stream: &mut S) -> Result<SessionCipher, WireError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    // Keygen is CPU-bound; keep it off the reactor threads.
    let private_key = tokio::task::spawn_blocking(|| RsaPrivateKey::new(&mut OsRng, RSA_BITS))
        .await
        .map_err(|e| WireError::Rsa(e.to_string()))?
        .map_err(|e| WireError::Rsa(e.to_string()))?;

    let public_pem = RsaPublicKey::from(&private_key)
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| WireError::Rsa(e.to_string()))?;
    write_frame(stream, public_pem.as_bytes()).await?;

    // The client answers with a 256-byte OAEP ciphertext of the raw AES key.
    // Short reads are retried a bounded number of times, accumulating.
    let mut wrapped = Vec::with_capacity(WRAPPED_KEY_LEN);
    for _ in 0..MAX_KEY_READS {
        let chunk = timeout(HANDSHAKE_TIMEOUT, read_frame(stream))
            .await
            .map_err(|_| WireError::HandshakeTimeout)??;
        wrapped.extend_from_slice(&chunk);
        if wrapped.len() >= WRAPPED_KEY_LEN {
            break;
        }
    }
    if wrapped.len() < WRAPPED_KEY_LEN {
        return Err(WireError::ShortKeyExchange(wrapped.len(), MAX_KEY_READS));
    }

    let session_key = private_key
        .decrypt(Oaep::new::<Sha1>(), &wrapped[..WRAPPED_KEY_LEN])
        .map_err(|e| WireError::Rsa(e.to_string()))?;
    let cipher = SessionCipher::new(&session_key)?;

    // Nonce announcement, written raw: existing clients read these twenty
    // bytes directly rather than as an encrypted frame. It carries no keying
    // material; the session key above is what secures the session.
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    stream.write_all(&(NONCE_LEN as u32).to_be_bytes()).await?;
    stream.write_all(&nonce).await?;
    stream.flush().await?;

    Ok(cipher)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::pkcs8::DecodePublicKey;
    use tokio::io::AsyncReadExt;

    /// Client half of the exchange, as the wire protocol defines it.
    async fn client_handshake<S>(stream: &mut S, session_key: &[u8]) -> SessionCipher
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let pem_body = read_frame(stream).await.unwrap();
        let pem = String::from_utf8(pem_body).unwrap();
        assert!(pem.starts_with("-----BEGIN PUBLIC KEY-----"));

        let public_key = RsaPublicKey::from_public_key_pem(&pem).unwrap();
        let wrapped = public_key
            .encrypt(&mut OsRng, Oaep::new::<Sha1>(), session_key)
            .unwrap();
        assert_eq!(wrapped.len(), WRAPPED_KEY_LEN);
        write_frame(stream, &wrapped).await.unwrap();

        // The nonce announcement arrives raw.
        let mut header = [0u8; 4];
        stream.read_exact(&mut header).await.unwrap();
        assert_eq!(u32::from_be_bytes(header) as usize, NONCE_LEN);
        let mut nonce = [0u8; NONCE_LEN];
        stream.read_exact(&mut nonce).await.unwrap();

        SessionCipher::new(session_key).unwrap()
    }

    #[tokio::test]
    async fn establishes_a_shared_cipher() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let key = [7u8; 32];

        let server_task = tokio::spawn(async move {
            let cipher = establish(&mut server).await.unwrap();
            // Server → client frame decrypts on the client side.
            let sealed = cipher.seal(b"post-handshake frame").unwrap();
            write_frame(&mut server, &sealed).await.unwrap();
            cipher
        });

        let client_cipher = client_handshake(&mut client, &key).await;
        let body = read_frame(&mut client).await.unwrap();
        assert_eq!(
            client_cipher.open(&body).unwrap(),
            b"post-handshake frame"
        );

        let server_cipher = server_task.await.unwrap();
        assert_eq!(server_cipher.key_bits(), 256);
    }

    #[tokio::test]
    async fn short_key_exchange_fails_after_bounded_reads() {
        let (mut client, mut server) = tokio::io::duplex(4096);

        let server_task = tokio::spawn(async move { establish(&mut server).await });

        let _pem = read_frame(&mut client).await.unwrap();
        // Five undersized frames instead of the 256-byte ciphertext.
        for _ in 0..5 {
            write_frame(&mut client, &[0u8; 10]).await.unwrap();
        }

        assert!(matches!(
            server_task.await.unwrap(),
            Err(WireError::ShortKeyExchange(50, _))
        ));
    }

    #[tokio::test]
    async fn garbage_ciphertext_fails_decryption() {
        let (mut client, mut server) = tokio::io::duplex(4096);

        let server_task = tokio::spawn(async move { establish(&mut server).await });

        let _pem = read_frame(&mut client).await.unwrap();
        write_frame(&mut client, &[0xAB; WRAPPED_KEY_LEN]).await.unwrap();

        assert!(matches!(
            server_task.await.unwrap(),
            Err(WireError::Rsa(_))
        ));
    }
}
