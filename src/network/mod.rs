//! Network Module
//!
//! Framed TCP request/reply used by the membership service, the node
//! admin endpoints and the pub/sub hub.

mod server;
mod client;

pub use server::{RpcServer, RequestHandler};
pub use client::{RpcClient, PeerTransport};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::protocol::{CodecChain, Envelope, FrameHeader};
use crate::error::{Error, Result};

/// Read one frame body from a reader
///
/// A checksum mismatch is reported as `InvalidPayload` after the whole
/// body has been consumed, so the stream stays aligned on frames. An
/// oversized length leaves the stream unaligned and yields `FrameTooLarge`.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>> {
    let mut header_bytes = [0u8; FrameHeader::SIZE];
    reader.read_exact(&mut header_bytes).await?;
    let header = FrameHeader::from_bytes(&header_bytes);

    if header.length > FrameHeader::MAX_BODY {
        return Err(Error::FrameTooLarge {
            length: header.length,
            limit: FrameHeader::MAX_BODY,
        });
    }

    let mut body = vec![0u8; header.length as usize];
    reader.read_exact(&mut body).await?;

    if !header.verify(&body) {
        return Err(Error::InvalidPayload("frame checksum mismatch".into()));
    }

    Ok(body)
}

/// Write one frame body to a writer
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, body: &[u8]) -> Result<()> {
    let header = FrameHeader::new(body);

    writer.write_all(&header.to_bytes()).await?;
    writer.write_all(body).await?;
    writer.flush().await?;

    Ok(())
}

/// Read and decode one envelope
pub async fn read_envelope<R: AsyncRead + Unpin>(
    reader: &mut R,
    codecs: &CodecChain,
) -> Result<Envelope> {
    let body = read_frame(reader).await?;
    codecs.decode(&body)
}

/// Encode and write one envelope
pub async fn write_envelope<W: AsyncWrite + Unpin>(
    writer: &mut W,
    codecs: &CodecChain,
    envelope: &Envelope,
) -> Result<()> {
    let body = codecs.encode(envelope)?;
    write_frame(writer, &body).await
}

/// True when an error just means the peer hung up
pub(crate) fn is_disconnect(err: &Error) -> bool {
    matches!(
        err,
        Error::Io(e) if matches!(
            e.kind(),
            std::io::ErrorKind::UnexpectedEof
                | std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::BrokenPipe
        )
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frame_roundtrip_over_duplex() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        write_frame(&mut a, b"hello").await.unwrap();
        let body = read_frame(&mut b).await.unwrap();
        assert_eq!(body, b"hello");
    }

    #[tokio::test]
    async fn test_corrupted_frame_keeps_stream_aligned() {
        let (mut a, mut b) = tokio::io::duplex(1024);

        // Header claims a checksum the body does not have
        let mut header = FrameHeader::new(b"good");
        header.checksum ^= 1;
        a.write_all(&header.to_bytes()).await.unwrap();
        a.write_all(b"good").await.unwrap();
        write_frame(&mut a, b"next").await.unwrap();

        assert!(matches!(
            read_frame(&mut b).await,
            Err(Error::InvalidPayload(_))
        ));
        assert_eq!(read_frame(&mut b).await.unwrap(), b"next");
    }

    #[tokio::test]
    async fn test_unframed_text_is_too_large() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        a.write_all(br#"{"service":"list","data":{}}"#).await.unwrap();

        let err = read_frame(&mut b).await.unwrap_err();
        assert!(matches!(err, Error::FrameTooLarge { limit, .. } if limit == FrameHeader::MAX_BODY));
        assert!(!is_disconnect(&err));
    }

    #[tokio::test]
    async fn test_eof_is_disconnect() {
        let (a, mut b) = tokio::io::duplex(64);
        drop(a);
        let err = read_frame(&mut b).await.unwrap_err();
        assert!(is_disconnect(&err));
    }
}
