//! JSON-RPC message codec and `Content-Length` framing.
//!
//! [`encode`] and [`decode`] turn a single framed body into a [`Message`] and
//! back; they are stateless. [`FrameReader`] and [`FrameWriter`] handle the
//! `Content-Length: N\r\n\r\n{json}` framing used over stdio and sockets.

use anyhow::{Context, Result, bail};
use parley_types::{EnvelopeError, Message, Response, ResponseError};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Default maximum frame size (4 MiB) to prevent unbounded memory allocation.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

/// Why a framed body could not be turned into a [`Message`].
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed JSON: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
}

impl DecodeError {
    /// The `ParseError` reply owed to the peer, if any.
    ///
    /// Malformed JSON and request-shaped envelopes get a reply with a `null`
    /// id; anything else is dropped by the caller.
    #[must_use]
    pub fn reply(&self) -> Option<Message> {
        let message = match self {
            Self::Malformed(e) => format!("Parse error: {e}"),
            Self::Envelope(e) if e.request_shaped => format!("Parse error: {}", e.reason),
            Self::Envelope(_) => return None,
        };
        Some(Response::error(None, ResponseError::parse_error(message)).into())
    }
}

#[must_use]
pub fn encode(message: &Message) -> Vec<u8> {
    message.to_value().to_string().into_bytes()
}

pub fn decode(bytes: &[u8]) -> Result<Message, DecodeError> {
    let value: serde_json::Value = serde_json::from_slice(bytes)?;
    Ok(Message::from_value(value)?)
}

/// Reads `Content-Length` framed bodies from an async reader.
pub struct FrameReader<R> {
    reader: BufReader<R>,
    max_frame_bytes: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self::with_limit(reader, DEFAULT_MAX_FRAME_BYTES)
    }

    pub fn with_limit(reader: R, max_frame_bytes: usize) -> Self {
        Self {
            reader: BufReader::new(reader),
            max_frame_bytes,
        }
    }

    /// Read the next frame body.
    ///
    /// Returns `Ok(None)` on EOF (clean shutdown).
    /// Returns `Err` on malformed headers, oversized frames or a truncated body.
    pub async fn read_frame(&mut self) -> Result<Option<Vec<u8>>> {
        let content_length = match self.read_headers().await? {
            Some(len) => len,
            None => return Ok(None), // EOF
        };

        if content_length > self.max_frame_bytes {
            bail!(
                "Content-Length {content_length} exceeds maximum {}",
                self.max_frame_bytes
            );
        }

        let mut body = vec![0u8; content_length];
        self.reader
            .read_exact(&mut body)
            .await
            .context("reading frame body")?;
        Ok(Some(body))
    }

    /// Read a frame and decode it. Transport faults are the outer error.
    pub async fn read_message(&mut self) -> Result<Option<Result<Message, DecodeError>>> {
        Ok(self.read_frame().await?.map(|body| decode(&body)))
    }

    /// Parse headers until the empty line separator.
    ///
    /// Returns the `Content-Length` value, or `None` on EOF.
    async fn read_headers(&mut self) -> Result<Option<usize>> {
        let mut content_length: Option<usize> = None;
        let mut line = String::new();
        let mut saw_any_header_bytes = false;

        loop {
            line.clear();
            let bytes_read = self
                .reader
                .read_line(&mut line)
                .await
                .context("reading header line")?;

            if bytes_read == 0 {
                // EOF is only clean before the first header byte of a frame.
                if !saw_any_header_bytes {
                    return Ok(None);
                }
                bail!("unexpected EOF while reading headers");
            }
            saw_any_header_bytes = true;

            let trimmed = line.trim();
            if trimmed.is_empty() {
                break;
            }

            if let Some((key, value)) = trimmed.split_once(':')
                && key.trim().eq_ignore_ascii_case("Content-Length")
            {
                let len: usize = value
                    .trim()
                    .parse()
                    .context("invalid Content-Length value")?;
                content_length = Some(len);
            }
            // Other headers (e.g. Content-Type) are ignored.
        }

        match content_length {
            Some(len) => Ok(Some(len)),
            None => bail!("missing Content-Length header"),
        }
    }
}

/// Writes `Content-Length` framed messages to an async writer.
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub async fn write_message(&mut self, message: &Message) -> Result<()> {
        self.write_frame(&encode(message)).await
    }

    pub async fn write_frame(&mut self, body: &[u8]) -> Result<()> {
        let header = format!("Content-Length: {}\r\n\r\n", body.len());

        self.writer
            .write_all(header.as_bytes())
            .await
            .context("writing frame header")?;
        self.writer
            .write_all(body)
            .await
            .context("writing frame body")?;
        self.writer.flush().await.context("flushing frame")?;

        Ok(())
    }
}
