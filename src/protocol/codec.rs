//! Newline-delimited JSON framing
//!
//! Each signaling message is one JSON document followed by `\n`. Frames larger
//! than the configured limit are rejected before they are fully buffered.

use bytes::{BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::ProtocolError;

/// Default upper bound for one frame
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Default signaling port
pub const DEFAULT_PORT: u16 = 3000;

/// Encode a message as one frame, trailing newline included
pub fn encode<T: Serialize>(message: &T) -> Result<Bytes, ProtocolError> {
    let mut buf = BytesMut::with_capacity(256);
    serde_json::to_writer((&mut buf).writer(), message)?;
    buf.put_u8(b'\n');
    Ok(buf.freeze())
}

/// Decode one frame (with or without its trailing newline)
pub fn decode<T: DeserializeOwned>(frame: &[u8]) -> Result<T, ProtocolError> {
    let end = frame
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(0, |i| i + 1);
    Ok(serde_json::from_slice(&frame[..end])?)
}

/// Reads newline-delimited frames from a byte stream
///
/// Cancel safe: bytes read by an interrupted `next_frame` stay buffered and
/// the next call continues the same frame.
pub struct FrameReader<R> {
    inner: BufReader<R>,
    buf: Vec<u8>,
    max_frame_size: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R, max_frame_size: usize) -> Self {
        Self {
            inner: BufReader::new(inner),
            buf: Vec::with_capacity(1024),
            max_frame_size,
        }
    }

    /// Next non-empty frame, or `None` at end of stream
    pub async fn next_frame(&mut self) -> Result<Option<Bytes>, ProtocolError> {
        loop {
            let limit = (self.max_frame_size + 1).saturating_sub(self.buf.len()) as u64;
            let read = (&mut self.inner)
                .take(limit)
                .read_until(b'\n', &mut self.buf)
                .await?;

            let complete = self.buf.last() == Some(&b'\n');
            if !complete && self.buf.len() > self.max_frame_size {
                let size = self.buf.len();
                self.buf.clear();
                return Err(ProtocolError::FrameTooLarge {
                    size,
                    max: self.max_frame_size,
                });
            }

            if read == 0 && !complete {
                if self.buf.iter().all(u8::is_ascii_whitespace) {
                    self.buf.clear();
                    return Ok(None);
                }
                // final frame without trailing newline
                let frame = Bytes::from(std::mem::take(&mut self.buf));
                return Ok(Some(frame));
            }

            if !complete {
                continue;
            }

            let frame = std::mem::take(&mut self.buf);
            if frame.iter().all(u8::is_ascii_whitespace) {
                // keepalive
                continue;
            }
            return Ok(Some(Bytes::from(frame)));
        }
    }
}

/// Writes frames to a byte stream
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub async fn send<T: Serialize>(&mut self, message: &T) -> Result<(), ProtocolError> {
        let frame = encode(message)?;
        self.send_frame(&frame).await
    }

    pub async fn send_frame(&mut self, frame: &[u8]) -> Result<(), ProtocolError> {
        self.inner.write_all(frame).await?;
        self.inner.flush().await?;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), ProtocolError> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::message::{ClientMessage, Request};

    #[tokio::test]
    async fn test_reads_frames_and_skips_blank_lines() {
        let input: &[u8] = b"{\"id\":1,\"request\":{\"method\":\"get-capabilities\"}}\n\n  \n{\"id\":2,\"request\":{\"method\":\"get-existing-producers\"}}";
        let mut reader = FrameReader::new(input, MAX_FRAME_SIZE);

        let first: ClientMessage = decode(&reader.next_frame().await.unwrap().unwrap()).unwrap();
        assert_eq!(first.request, Request::GetCapabilities);

        let second: ClientMessage = decode(&reader.next_frame().await.unwrap().unwrap()).unwrap();
        assert_eq!(second.id, 2);

        assert!(reader.next_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rejects_oversized_frame() {
        let mut input = vec![b'x'; 64];
        input.push(b'\n');
        let mut reader = FrameReader::new(&input[..], 16);

        assert!(matches!(
            reader.next_frame().await,
            Err(ProtocolError::FrameTooLarge { max: 16, .. })
        ));
    }

    #[tokio::test]
    async fn test_writer_appends_newline() {
        let mut out = Vec::new();
        {
            let mut writer = FrameWriter::new(&mut out);
            writer
                .send(&ClientMessage {
                    id: 5,
                    request: Request::GetCapabilities,
                })
                .await
                .unwrap();
        }

        assert_eq!(out.last(), Some(&b'\n'));
        let back: ClientMessage = decode(&out).unwrap();
        assert_eq!(back.id, 5);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            decode::<ClientMessage>(b"{not json"),
            Err(ProtocolError::Json(_))
        ));
    }
}
