//! JSON-RPC framing codec for LSP communication.
//!
//! LSP uses `Content-Length: N\r\n\r\n{json}` framing over stdin/stdout.
//! This module provides [`FrameReader`] and [`FrameWriter`] for async
//! reading and writing of framed JSON-RPC messages.

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Maximum frame size (4 MiB) to prevent unbounded memory allocation.
const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

/// Framing failures.
///
/// `Io` means the underlying stream is broken (or ended mid-frame) and no
/// further frames can be decoded. `Protocol` means one frame was bad but
/// the stream is still aligned on a frame boundary.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed frame: {0}")]
    Protocol(String),
}

enum HeaderBlock {
    /// Clean EOF before any header bytes.
    Eof,
    /// A complete header block with no usable `Content-Length`.
    Malformed,
    /// Payload length announced by the block.
    Length(usize),
}

/// Reads JSON-RPC frames from an async reader.
///
/// Parses `Content-Length` headers and reads exactly that many bytes,
/// then deserializes the body as JSON. Arbitrary fragment boundaries in
/// the input are tolerated.
pub struct FrameReader<R> {
    reader: BufReader<R>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
        }
    }

    /// Read the next JSON-RPC frame.
    ///
    /// Returns `Ok(None)` on clean EOF. Header blocks without a
    /// `Content-Length` are skipped and decoding continues with the next
    /// block.
    pub async fn read_frame(&mut self) -> Result<Option<serde_json::Value>, FrameError> {
        loop {
            let content_length = match self.read_headers().await? {
                HeaderBlock::Eof => return Ok(None),
                HeaderBlock::Malformed => {
                    tracing::warn!("skipping header block without Content-Length");
                    continue;
                }
                HeaderBlock::Length(len) => len,
            };

            if content_length > MAX_FRAME_BYTES {
                self.discard(content_length).await?;
                return Err(FrameError::Protocol(format!(
                    "Content-Length {content_length} exceeds maximum {MAX_FRAME_BYTES}"
                )));
            }

            let mut body = vec![0u8; content_length];
            self.reader.read_exact(&mut body).await?;

            return match serde_json::from_slice(&body) {
                Ok(value) => Ok(Some(value)),
                Err(e) => Err(FrameError::Protocol(format!("invalid JSON payload: {e}"))),
            };
        }
    }

    /// Parse headers until the empty line separator.
    async fn read_headers(&mut self) -> Result<HeaderBlock, FrameError> {
        let mut content_length: Option<usize> = None;
        let mut line = String::new();
        let mut saw_any_header_bytes = false;

        loop {
            line.clear();
            let bytes_read = self.reader.read_line(&mut line).await?;

            if bytes_read == 0 {
                // EOF — only valid if we haven't started reading headers at all.
                if !saw_any_header_bytes {
                    return Ok(HeaderBlock::Eof);
                }
                return Err(FrameError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "EOF while reading frame headers",
                )));
            }
            saw_any_header_bytes = true;

            let trimmed = line.trim();
            if trimmed.is_empty() {
                // Empty line = end of headers
                break;
            }

            // LSP spec uses "Content-Length" but parse case-insensitively for robustness.
            if let Some(colon_pos) = trimmed.find(':') {
                let key = &trimmed[..colon_pos];
                if key.eq_ignore_ascii_case("Content-Length") {
                    match trimmed[colon_pos + 1..].trim().parse() {
                        Ok(len) => content_length = Some(len),
                        Err(_) => {
                            tracing::warn!(value = trimmed, "unparseable Content-Length header");
                        }
                    }
                }
            }
            // Ignore other headers (e.g. Content-Type)
        }

        Ok(match content_length {
            Some(len) => HeaderBlock::Length(len),
            None => HeaderBlock::Malformed,
        })
    }

    /// Read and drop `count` payload bytes to stay frame-aligned.
    async fn discard(&mut self, mut count: usize) -> Result<(), FrameError> {
        let mut sink = [0u8; 8192];
        while count > 0 {
            let chunk = count.min(sink.len());
            self.reader.read_exact(&mut sink[..chunk]).await?;
            count -= chunk;
        }
        Ok(())
    }
}

/// Writes JSON-RPC frames to an async writer.
///
/// Serializes JSON and prepends the `Content-Length` header.
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Write a JSON-RPC frame with `Content-Length` header.
    pub async fn write_frame(&mut self, msg: &serde_json::Value) -> Result<(), FrameError> {
        let body = serde_json::to_string(msg)
            .map_err(|e| FrameError::Protocol(format!("unserializable frame: {e}")))?;
        let header = format!("Content-Length: {}\r\n\r\n", body.len());

        self.writer.write_all(header.as_bytes()).await?;
        self.writer.write_all(body.as_bytes()).await?;
        self.writer.flush().await?;

        Ok(())
    }
}
