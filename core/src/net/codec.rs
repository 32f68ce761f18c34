//! Length-prefixed envelope framing
//!
//! Each frame is a big-endian u32 byte length followed by the bincode
//! encoding of one [`Envelope`]. Oversized frames are rejected before any
//! allocation.

use super::message::Envelope;
use super::NetError;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a single frame, including large snapshots
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Read one envelope from the stream. Returns `Closed` on clean EOF at a
/// frame boundary.
pub async fn read_frame<R>(reader: &mut R) -> Result<Envelope, NetError>
where
    R: AsyncRead + Unpin,
{
    let mut length_bytes = [0u8; 4];
    match reader.read_exact(&mut length_bytes).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(NetError::Closed);
        }
        Err(e) => return Err(NetError::Io(e)),
    }

    let length = u32::from_be_bytes(length_bytes) as usize;
    if length > MAX_FRAME_SIZE {
        return Err(NetError::FrameTooLarge(length));
    }

    let mut payload = vec![0u8; length];
    reader.read_exact(&mut payload).await?;
    bincode::deserialize(&payload).map_err(|e| NetError::Codec(e.to_string()))
}

/// Write one envelope to the stream and flush it
pub async fn write_frame<W>(writer: &mut W, envelope: &Envelope) -> Result<(), NetError>
where
    W: AsyncWrite + Unpin,
{
    let payload = bincode::serialize(envelope).map_err(|e| NetError::Codec(e.to_string()))?;
    if payload.len() > MAX_FRAME_SIZE {
        return Err(NetError::FrameTooLarge(payload.len()));
    }
    writer.write_all(&(payload.len() as u32).to_be_bytes()).await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::message::Payload;

    #[tokio::test]
    async fn test_frame_round_trip() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let envelope = Envelope::rq(7, Payload::RqPing);

        write_frame(&mut client, &envelope).await.unwrap();
        let decoded = read_frame(&mut server).await.unwrap();
        assert_eq!(decoded, envelope);
    }

    #[tokio::test]
    async fn test_eof_reports_closed() {
        let (client, mut server) = tokio::io::duplex(1024);
        drop(client);
        assert!(matches!(read_frame(&mut server).await, Err(NetError::Closed)));
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let length = (MAX_FRAME_SIZE as u32 + 1).to_be_bytes();
        tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            let _ = client.write_all(&length).await;
        });
        assert!(matches!(
            read_frame(&mut server).await,
            Err(NetError::FrameTooLarge(_))
        ));
    }
}
