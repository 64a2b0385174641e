//! Content-Length framing for LSP communication.
//!
//! LSP uses `Content-Length: N\r\n\r\n{json}` framing over stdin/stdout or a
//! socket. [`FrameReader`] splits an async byte stream into [`Frame`]s and
//! [`encode_frame`] produces the bytes [`FrameWriter`] puts on the wire.
//!
//! Errors are per frame: a malformed header block discards that frame only and
//! the next call resumes reading. [`FrameError::is_fatal`] tells the caller
//! when the stream itself is gone.

use tokio::io::{
    self, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};

/// Longest accepted header line, terminator included.
pub const MAX_HEADER_LINE: usize = 65536;

/// Most header lines accepted in one block, terminator included.
pub const MAX_HEADERS: usize = 100;

/// Maximum body size (32 MiB) to prevent unbounded memory allocation.
pub const MAX_FRAME_BYTES: usize = 32 * 1024 * 1024;

/// Bytes read for a body whose header block carried no `Content-Length`,
/// under [`MissingLengthPolicy::ReadAvailable`].
pub const FALLBACK_BODY_BYTES: usize = 65536;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("header line exceeds {MAX_HEADER_LINE} bytes")]
    LineTooLong,
    #[error("got more than {MAX_HEADERS} header lines")]
    TooManyHeaders,
    #[error("invalid Content-Length value: {0:?}")]
    InvalidLength(String),
    #[error("missing Content-Length header")]
    MissingLength,
    #[error("Content-Length {0} exceeds maximum {MAX_FRAME_BYTES}")]
    Oversized(usize),
    #[error("unexpected EOF while {0}")]
    UnexpectedEof(&'static str),
    #[error("reading frame: {0}")]
    Io(#[from] io::Error),
}

impl FrameError {
    /// Whether the underlying stream is unusable after this error.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::UnexpectedEof(_) | Self::Io(_))
    }
}

/// What to do with a header block that has no `Content-Length`.
///
/// `ReadAvailable` exists for one known non-conformant server family that
/// omits the header; it reads whatever the stream yields in a single read
/// (up to [`FALLBACK_BODY_BYTES`]). It is opt-in per server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissingLengthPolicy {
    #[default]
    Reject,
    ReadAvailable,
}

/// One header block plus its body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    headers: Vec<(String, String)>,
    header_bytes: Vec<u8>,
    body: Vec<u8>,
}

impl Frame {
    /// Value of the first header named `name` (case-insensitive).
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Raw header block as read from the stream, blank line included.
    #[must_use]
    pub fn header_bytes(&self) -> &[u8] {
        &self.header_bytes
    }

    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    #[must_use]
    pub fn into_body(self) -> Vec<u8> {
        self.body
    }
}

struct HeaderBlock {
    fields: Vec<(String, String)>,
    raw: Vec<u8>,
}

/// Reads frames from an async reader.
pub struct FrameReader<R> {
    reader: BufReader<R>,
    missing_length: MissingLengthPolicy,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            missing_length: MissingLengthPolicy::Reject,
        }
    }

    #[must_use]
    pub fn with_missing_length(mut self, policy: MissingLengthPolicy) -> Self {
        self.missing_length = policy;
        self
    }

    /// Read the next frame.
    ///
    /// Returns `Ok(None)` on EOF at a frame boundary (clean shutdown).
    pub async fn read_frame(&mut self) -> Result<Option<Frame>, FrameError> {
        let Some(block) = self.read_headers().await? else {
            return Ok(None);
        };

        let length = block
            .fields
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case("Content-Length"))
            .map(|(_, value)| {
                value
                    .parse::<usize>()
                    .map_err(|_| FrameError::InvalidLength(value.clone()))
            })
            .transpose()?;

        let body = match length {
            Some(len) if len > MAX_FRAME_BYTES => {
                // Skip the body so the next header block starts where it should.
                let skipped = io::copy(&mut (&mut self.reader).take(len as u64), &mut io::sink())
                    .await?;
                if skipped < len as u64 {
                    return Err(FrameError::UnexpectedEof("skipping oversized body"));
                }
                return Err(FrameError::Oversized(len));
            }
            Some(len) => {
                let mut body = vec![0u8; len];
                self.reader
                    .read_exact(&mut body)
                    .await
                    .map_err(|e| match e.kind() {
                        io::ErrorKind::UnexpectedEof => {
                            FrameError::UnexpectedEof("reading frame body")
                        }
                        _ => FrameError::Io(e),
                    })?;
                body
            }
            None => match self.missing_length {
                MissingLengthPolicy::Reject => return Err(FrameError::MissingLength),
                MissingLengthPolicy::ReadAvailable => {
                    let mut body = vec![0u8; FALLBACK_BODY_BYTES];
                    let n = self.reader.read(&mut body).await?;
                    body.truncate(n);
                    body
                }
            },
        };

        Ok(Some(Frame {
            headers: block.fields,
            header_bytes: block.raw,
            body,
        }))
    }

    /// Read header lines up to and including the blank separator line.
    ///
    /// Returns `None` on EOF before any header byte.
    async fn read_headers(&mut self) -> Result<Option<HeaderBlock>, FrameError> {
        let mut fields = Vec::new();
        let mut raw = Vec::new();
        let mut count = 0usize;
        let mut line = Vec::new();

        loop {
            line.clear();
            (&mut self.reader)
                .take(MAX_HEADER_LINE as u64 + 1)
                .read_until(b'\n', &mut line)
                .await?;

            if line.len() > MAX_HEADER_LINE {
                return Err(FrameError::LineTooLong);
            }
            count += 1;
            if count > MAX_HEADERS {
                return Err(FrameError::TooManyHeaders);
            }

            if line.is_empty() {
                // EOF is only a clean shutdown between frames.
                if raw.is_empty() {
                    return Ok(None);
                }
                return Err(FrameError::UnexpectedEof("reading headers"));
            }
            raw.extend_from_slice(&line);

            if line == b"\r\n" || line == b"\n" {
                break;
            }

            // Header bytes are Latin-1; every byte maps to one char.
            let text: String = line.iter().map(|&b| char::from(b)).collect();
            if let Some((key, value)) = text.split_once(':') {
                fields.push((key.trim().to_string(), value.trim().to_string()));
            } else {
                tracing::trace!(line = %text.trim_end(), "Ignoring header line without a colon");
            }
        }

        Ok(Some(HeaderBlock { fields, raw }))
    }
}

/// Prepend a `Content-Length` header block to `payload`.
#[must_use]
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let header = format!("Content-Length: {}\r\n\r\n", payload.len());
    let mut out = Vec::with_capacity(header.len() + payload.len());
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(payload);
    out
}

/// Writes frames to an async writer.
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Frame `payload` with a `Content-Length` header, write it and flush.
    pub async fn write_frame(&mut self, payload: &[u8]) -> io::Result<()> {
        self.write_encoded(&encode_frame(payload)).await
    }

    /// Write bytes produced by [`encode_frame`] verbatim and flush.
    pub async fn write_encoded(&mut self, frame: &[u8]) -> io::Result<()> {
        self.writer.write_all(frame).await?;
        self.writer.flush().await
    }

    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.writer.shutdown().await
    }
}
