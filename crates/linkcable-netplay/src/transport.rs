//! Framed I/O over a byte stream.
//!
//! Message boundaries exist only here: a 12-byte header, then exactly
//! `body_size` body bytes. Reads and writes move at most `CHUNK_SIZE` bytes
//! at a time.

use bytes::{Bytes, BytesMut};
use linkcable_netproto::{
    codec::Frame,
    constants::{CHUNK_SIZE, HEADER_LEN},
    header::Header,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::error::NetplayError;

pub struct FrameReader<R> {
    inner: R,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Wait for the next complete header.
    pub async fn receive_header(&mut self) -> Result<Header, NetplayError> {
        let mut buf = [0u8; HEADER_LEN];
        self.read_exact(&mut buf, "header").await?;
        Ok(Header::decode(&buf)?)
    }

    /// Read exactly `size` body bytes.
    ///
    /// A size at or above the receive limit is refused before anything is
    /// allocated; the stream cannot be resynchronized after that, so callers
    /// treat it as a lost connection.
    pub async fn receive_body(&mut self, size: u32) -> Result<Bytes, NetplayError> {
        let declared = Header {
            kind: 0,
            body_size: size,
            flags: 0,
        };
        if !declared.body_size_allowed() {
            return Err(NetplayError::BodyTooLarge(size as usize));
        }

        let size = size as usize;
        let mut body = BytesMut::zeroed(size);
        for chunk in body.chunks_mut(CHUNK_SIZE) {
            self.read_exact(chunk, "body").await?;
        }
        Ok(body.freeze())
    }

    /// Header plus body. The body is not decoded.
    pub async fn receive_frame(&mut self) -> Result<Frame, NetplayError> {
        let header = self.receive_header().await?;
        let body = self.receive_body(header.body_size).await?;
        trace!(kind = header.kind, body_size = header.body_size, "frame received");
        Ok(Frame { header, body })
    }

    async fn read_exact(&mut self, buf: &mut [u8], what: &str) -> Result<(), NetplayError> {
        match self.inner.read_exact(buf).await {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(
                NetplayError::ConnectionLost(format!("peer closed the connection mid-{what}")),
            ),
            Err(e) => Err(NetplayError::ConnectionLost(e.to_string())),
        }
    }
}

pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Write a header followed by its body in chunks.
    pub async fn send(&mut self, header: &Header, body: &[u8]) -> Result<(), NetplayError> {
        self.write_raw(&header.to_bytes()).await?;
        self.write_raw(body).await
    }

    pub async fn send_frame(&mut self, frame: &Frame) -> Result<(), NetplayError> {
        self.send(&frame.header, &frame.body).await
    }

    /// Write already framed bytes, at most one chunk per write call.
    pub async fn write_raw(&mut self, bytes: &[u8]) -> Result<(), NetplayError> {
        for chunk in bytes.chunks(CHUNK_SIZE) {
            self.inner
                .write_all(chunk)
                .await
                .map_err(|e| NetplayError::ConnectionLost(e.to_string()))?;
        }
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<(), NetplayError> {
        self.inner
            .flush()
            .await
            .map_err(|e| NetplayError::ConnectionLost(e.to_string()))
    }

    pub async fn shutdown(&mut self) {
        let _ = self.inner.shutdown().await;
    }
}
