//! Async frame reader and writer.
//!
//! The length prefix is read and validated before the payload buffer is
//! allocated, so a hostile prefix never costs more than 4 bytes of reading.

use std::time::Duration;

use bytes::Bytes;
use havoc_proto::{Frame, ProtocolError};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::TransportError;

/// Read bytes until `buf` is full or the peer closes. Returns bytes read.
async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Read one frame.
///
/// Returns `Ok(None)` if the peer closed the stream cleanly before sending
/// any byte of a new frame.
///
/// # Errors
///
/// - [`TransportError::Frame`] with [`ProtocolError::EmptyFrame`] or
///   [`ProtocolError::FrameTooLarge`] for an invalid prefix (the payload is
///   not read)
/// - [`TransportError::Frame`] with [`ProtocolError::FrameTooShort`] or
///   [`ProtocolError::FrameTruncated`] if the stream ends mid-frame
/// - [`TransportError::Io`] on socket errors
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Frame>, TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; Frame::PREFIX_SIZE];
    let got = read_full(reader, &mut prefix).await?;
    if got == 0 {
        return Ok(None);
    }
    if got < Frame::PREFIX_SIZE {
        return Err(ProtocolError::FrameTooShort { expected: Frame::PREFIX_SIZE, actual: got }.into());
    }

    let len = Frame::parse_prefix(prefix)?;

    let mut payload = vec![0u8; len];
    let got = read_full(reader, &mut payload).await?;
    if got < len {
        return Err(ProtocolError::FrameTruncated { expected: len, actual: got }.into());
    }

    Ok(Some(Frame::new(Bytes::from(payload))))
}

/// Read one frame, failing if the peer stays silent longer than `timeout`.
///
/// # Errors
///
/// Same as [`read_frame`], plus [`TransportError::ReadTimeout`].
pub async fn read_frame_timeout<R>(
    reader: &mut R,
    timeout: Duration,
) -> Result<Option<Frame>, TransportError>
where
    R: AsyncRead + Unpin,
{
    tokio::time::timeout(timeout, read_frame(reader))
        .await
        .map_err(|_| TransportError::ReadTimeout(timeout))?
}

/// Write one frame and flush.
///
/// # Errors
///
/// - [`TransportError::Frame`] if the payload is empty or too large (nothing
///   is written)
/// - [`TransportError::Io`] on socket errors
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    let prefix = frame.prefix()?;
    writer.write_all(&prefix).await?;
    writer.write_all(&frame.payload).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use proptest::prelude::*;

    use super::*;

    fn wire(frames: &[&[u8]]) -> Vec<u8> {
        let mut out = Vec::new();
        for payload in frames {
            Frame::new(payload.to_vec()).encode(&mut out).expect("encode");
        }
        out
    }

    #[tokio::test]
    async fn reads_consecutive_frames_then_clean_eof() {
        let mut reader = Cursor::new(wire(&[b"first", b"second\n"]));

        let a = read_frame(&mut reader).await.expect("read").expect("frame");
        let b = read_frame(&mut reader).await.expect("read").expect("frame");
        assert_eq!(&a.payload[..], b"first");
        assert_eq!(&b.payload[..], b"second\n");

        assert!(read_frame(&mut reader).await.expect("clean eof").is_none());
    }

    #[tokio::test]
    async fn oversized_prefix_rejected_without_reading_payload() {
        let mut bytes = (Frame::MAX_PAYLOAD_SIZE + 1).to_be_bytes().to_vec();
        bytes.extend_from_slice(&[0xAA; 64]);
        let mut reader = Cursor::new(bytes);

        let result = read_frame(&mut reader).await;
        assert!(matches!(
            result,
            Err(TransportError::Frame(ProtocolError::FrameTooLarge { size, .. }))
                if size == Frame::MAX_PAYLOAD_SIZE as usize + 1
        ));
        assert_eq!(reader.position(), Frame::PREFIX_SIZE as u64);
    }

    #[tokio::test]
    async fn zero_prefix_rejected() {
        let mut reader = Cursor::new(vec![0, 0, 0, 0, b'x']);
        let result = read_frame(&mut reader).await;
        assert!(matches!(result, Err(TransportError::Frame(ProtocolError::EmptyFrame))));
        assert_eq!(reader.position(), 4, "payload after an empty prefix is left unread");
    }

    #[tokio::test]
    async fn eof_inside_prefix_is_an_error() {
        let mut reader = Cursor::new(vec![0, 0]);
        let result = read_frame(&mut reader).await;
        assert!(matches!(
            result,
            Err(TransportError::Frame(ProtocolError::FrameTooShort { expected: 4, actual: 2 }))
        ));
    }

    #[tokio::test]
    async fn eof_inside_payload_is_truncation() {
        let mut bytes = 10u32.to_be_bytes().to_vec();
        bytes.extend_from_slice(b"abc");
        let mut reader = Cursor::new(bytes);

        let result = read_frame(&mut reader).await;
        assert!(matches!(
            result,
            Err(TransportError::Frame(ProtocolError::FrameTruncated { expected: 10, actual: 3 }))
        ));
    }

    #[tokio::test]
    async fn write_then_read_through_duplex() {
        let (mut client, mut server) = tokio::io::duplex(64);

        let writer = tokio::spawn(async move {
            write_frame(&mut client, &Frame::new(&b"over the pipe"[..])).await.expect("write");
        });

        let frame = read_frame(&mut server).await.expect("read").expect("frame");
        assert_eq!(&frame.payload[..], b"over the pipe");
        writer.await.expect("writer task");
    }

    #[tokio::test]
    async fn write_rejects_empty_payload() {
        let mut out = Vec::new();
        let result = write_frame(&mut out, &Frame::new(Bytes::new())).await;
        assert!(matches!(result, Err(TransportError::Frame(ProtocolError::EmptyFrame))));
        assert!(out.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn silent_peer_times_out() {
        let (_client, mut server) = tokio::io::duplex(64);

        let result = read_frame_timeout(&mut server, Duration::from_secs(30)).await;
        assert!(matches!(result, Err(TransportError::ReadTimeout(d)) if d == Duration::from_secs(30)));
    }

    proptest! {
        #[test]
        fn arbitrary_chunking_reassembles(
            payload in prop::collection::vec(any::<u8>(), 1..512),
            chunk in 1usize..17,
        ) {
            let rt = tokio::runtime::Builder::new_current_thread().build().expect("runtime");
            let bytes = wire(&[&payload]);

            let frame = rt.block_on(async {
                let (mut tx, mut rx) = tokio::io::duplex(chunk);
                let writer = tokio::spawn(async move {
                    for piece in bytes.chunks(chunk) {
                        tx.write_all(piece).await.expect("write");
                    }
                });
                let frame = read_frame(&mut rx).await;
                writer.await.expect("writer task");
                frame
            });

            let frame = frame.expect("read").expect("frame");
            prop_assert_eq!(&frame.payload[..], &payload[..]);
        }
    }
}
