// src/wire/frame.rs
// u32 big-endian length-prefixed frames over any async byte stream

use std::io::ErrorKind;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::WireError;

/// Upper bound on a single frame body. Anything larger is treated as a
/// corrupted header.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Read one frame body. A clean EOF at a frame boundary, or a zero-length
/// frame, is reported as [`WireError::Closed`].
pub async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>, WireError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    if let Err(e) = reader.read_exact(&mut header).await {
        return Err(match e.kind() {
            ErrorKind::UnexpectedEof => WireError::Closed,
            _ => e.into(),
        });
    }

    let len = u32::from_be_bytes(header) as usize;
    if len == 0 {
        return Err(WireError::Closed);
    }
    if len > MAX_FRAME_LEN {
        return Err(WireError::FrameTooLarge(len));
    }

    let mut body = vec![0u8; len];
    if let Err(e) = reader.read_exact(&mut body).await {
        return Err(match e.kind() {
            ErrorKind::UnexpectedEof => WireError::Closed,
            _ => e.into(),
        });
    }
    Ok(body)
}

/// Write one frame: length header followed by the body.
pub async fn write_frame<W>(writer: &mut W, body: &[u8]) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&(body.len() as u32).to_be_bytes()).await?;
    writer.write_all(body).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frame_round_trip() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        write_frame(&mut client, b"hello frame").await.unwrap();
        let body = read_frame(&mut server).await.unwrap();
        assert_eq!(body, b"hello frame");
    }

    #[tokio::test]
    async fn eof_is_reported_as_closed() {
        let (client, mut server) = tokio::io::duplex(64);
        drop(client);
        assert!(matches!(
            read_frame(&mut server).await,
            Err(WireError::Closed)
        ));
    }

    #[tokio::test]
    async fn zero_length_frame_is_closed() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&0u32.to_be_bytes()).await.unwrap();
        assert!(matches!(
            read_frame(&mut server).await,
            Err(WireError::Closed)
        ));
    }

    #[tokio::test]
    async fn oversized_header_is_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client
            .write_all(&(u32::MAX).to_be_bytes())
            .await
            .unwrap();
        assert!(matches!(
            read_frame(&mut server).await,
            Err(WireError::FrameTooLarge(_))
        ));
    }
}
