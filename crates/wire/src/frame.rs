use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Frames above this size are rejected outright; large JSON stream events are
/// common but nothing the protocol carries is expected to exceed this.
pub const MAX_FRAME_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("connection closed while reading frame header")]
    ShortHeader,
    #[error("connection closed while reading frame payload")]
    ShortPayload,
    #[error("frame length is zero")]
    EmptyFrame,
    #[error("frame length {0} exceeds maximum of {max}", max = MAX_FRAME_BYTES)]
    FrameTooLarge(usize),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Reads one 4-byte big-endian length-prefixed frame from `reader`.
///
/// Distinguishes a clean EOF before any header bytes (treated the same as a
/// mid-header short read by callers that loop until this errors) from a
/// truncated payload.
pub async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    reader
        .read_exact(&mut len_buf)
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => FrameError::ShortHeader,
            _ => FrameError::Io(e),
        })?;

    let len = u32::from_be_bytes(len_buf) as usize;
    if len == 0 {
        return Err(FrameError::EmptyFrame);
    }
    if len > MAX_FRAME_BYTES {
        return Err(FrameError::FrameTooLarge(len));
    }

    let mut payload = vec![0u8; len];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => FrameError::ShortPayload,
            _ => FrameError::Io(e),
        })?;

    Ok(payload)
}

/// Writes one length-prefixed frame as a single underlying write.
///
/// This is a contract, not an optimization: concurrent writers on the same
/// connection (a reply racing a pushed event) must never interleave a header
/// from one frame with the payload of another, and `write_all` on a
/// concatenated buffer is the only way to guarantee that at this layer.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > MAX_FRAME_BYTES {
        return Err(FrameError::FrameTooLarge(payload.len()));
    }
    let mut buf = Vec::with_capacity(4 + payload.len());
    buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(payload);
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn round_trips_small_payload() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"hello").await.unwrap();
        let mut cursor = Cursor::new(buf);
        let payload = read_frame(&mut cursor).await.unwrap();
        assert_eq!(payload, b"hello");
    }

    #[tokio::test]
    async fn round_trips_empty_wire_payload_via_non_empty_json() {
        // An empty *frame* is illegal, but a frame carrying the JSON literal
        // `null` (1 byte) is the smallest legal payload.
        let mut buf = Vec::new();
        write_frame(&mut buf, b"null").await.unwrap();
        let mut cursor = Cursor::new(buf);
        let payload = read_frame(&mut cursor).await.unwrap();
        assert_eq!(payload, b"null");
    }

    #[tokio::test]
    async fn rejects_zero_length_frame() {
        let buf = 0u32.to_be_bytes().to_vec();
        let mut cursor = Cursor::new(buf);
        let err = read_frame(&mut cursor).await.unwrap_err();
        assert!(matches!(err, FrameError::EmptyFrame));
    }

    #[tokio::test]
    async fn rejects_oversized_frame() {
        let buf = ((MAX_FRAME_BYTES as u32) + 1).to_be_bytes().to_vec();
        let mut cursor = Cursor::new(buf);
        let err = read_frame(&mut cursor).await.unwrap_err();
        assert!(matches!(err, FrameError::FrameTooLarge(_)));
    }

    #[tokio::test]
    async fn rejects_short_header() {
        let mut cursor = Cursor::new(vec![0u8, 1]);
        let err = read_frame(&mut cursor).await.unwrap_err();
        assert!(matches!(err, FrameError::ShortHeader));
    }

    #[tokio::test]
    async fn rejects_truncated_payload() {
        let mut buf = 5u32.to_be_bytes().to_vec();
        buf.extend_from_slice(b"ab");
        let mut cursor = Cursor::new(buf);
        let err = read_frame(&mut cursor).await.unwrap_err();
        assert!(matches!(err, FrameError::ShortPayload));
    }

    #[tokio::test]
    async fn write_frame_rejects_oversized_payload() {
        let mut buf = Vec::new();
        let big = vec![0u8; MAX_FRAME_BYTES + 1];
        let err = write_frame(&mut buf, &big).await.unwrap_err();
        assert!(matches!(err, FrameError::FrameTooLarge(_)));
    }

    #[tokio::test]
    async fn concurrent_writers_never_interleave() {
        use std::sync::Arc;
        use tokio::sync::Mutex as AsyncMutex;

        let sink: Arc<AsyncMutex<Vec<u8>>> = Arc::new(AsyncMutex::new(Vec::new()));
        let mut handles = Vec::new();
        for i in 0..16u8 {
            let sink = Arc::clone(&sink);
            handles.push(tokio::spawn(async move {
                let payload = vec![i; 4096];
                let mut guard = sink.lock().await;
                write_frame(&mut *guard, &payload).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let bytes = sink.lock().await.clone();
        let mut cursor = Cursor::new(bytes);
        let mut frames = Vec::new();
        loop {
            match read_frame(&mut cursor).await {
                Ok(p) => frames.push(p),
                Err(FrameError::ShortHeader) => break,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(frames.len(), 16);
        for frame in &frames {
            assert!(frame.iter().all(|b| *b == frame[0]));
        }
    }
}
