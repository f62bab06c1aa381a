//! JSON Lines framing for requests and responses.
//!
//! Each message is one serde_json object followed by `\n`. [`FrameReader`]
//! keeps partially received bytes across read errors, so a socket read
//! timeout in the middle of a frame does not corrupt the stream: the caller
//! can treat the timeout as an idle signal and simply read again.

use std::io::{self, BufRead, BufReader, Read, Write};

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Maximum size of a single frame in bytes.
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

/// Errors raised while framing, encoding, or decoding messages.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Reading or writing the underlying stream failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// A frame exceeded the configured limit.
    #[error("frame too large: {size} bytes exceeds {max_size} byte limit")]
    FrameTooLarge {
        /// Bytes buffered when the limit was hit.
        size: usize,
        /// Configured limit.
        max_size: usize,
    },
    /// A frame was not a valid message.
    #[error("malformed frame: {0}")]
    Decode(#[source] serde_json::Error),
    /// A message could not be serialised.
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),
}

impl CodecError {
    /// Returns `true` when the error is a read timeout rather than a fault.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::Io(error)
                if matches!(error.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
        )
    }
}

/// Incremental reader that yields one JSONL frame at a time.
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: BufReader<R>,
    pending: Vec<u8>,
    max_frame_bytes: usize,
}

impl<R: Read> FrameReader<R> {
    /// Wraps a stream using [`MAX_FRAME_BYTES`] as the frame limit.
    pub fn new(inner: R) -> Self {
        Self::with_limit(inner, MAX_FRAME_BYTES)
    }

    /// Wraps a stream with a custom frame limit.
    pub fn with_limit(inner: R, max_frame_bytes: usize) -> Self {
        Self {
            inner: BufReader::new(inner),
            pending: Vec::new(),
            max_frame_bytes,
        }
    }

    /// Reads the next frame without its trailing newline.
    ///
    /// Blank lines are skipped. Returns `Ok(None)` on a clean end of stream.
    /// Bytes of an unterminated final frame are returned as a frame so the
    /// decoder can report them.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Io`] when the stream fails (including read
    /// timeouts, see [`CodecError::is_timeout`]) and
    /// [`CodecError::FrameTooLarge`] when a frame exceeds the limit.
    pub fn read_frame(&mut self) -> Result<Option<Vec<u8>>, CodecError> {
        loop {
            let available = match self.inner.fill_buf() {
                Ok(bytes) => bytes,
                Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
                Err(error) => return Err(CodecError::Io(error)),
            };

            if available.is_empty() {
                if self.pending.iter().all(u8::is_ascii_whitespace) {
                    self.pending.clear();
                    return Ok(None);
                }
                return Ok(Some(std::mem::take(&mut self.pending)));
            }

            if let Some(newline) = available.iter().position(|byte| *byte == b'\n') {
                let (line, _) = available.split_at(newline);
                self.pending.extend_from_slice(line);
                self.inner.consume(newline + 1);
                self.enforce_limit()?;
                let frame = std::mem::take(&mut self.pending);
                if frame.iter().all(u8::is_ascii_whitespace) {
                    continue;
                }
                return Ok(Some(frame));
            }

            let consumed = available.len();
            self.pending.extend_from_slice(available);
            self.inner.consume(consumed);
            self.enforce_limit()?;
        }
    }

    /// Returns a reference to the wrapped stream.
    pub fn get_ref(&self) -> &R {
        self.inner.get_ref()
    }

    fn enforce_limit(&mut self) -> Result<(), CodecError> {
        let size = self.pending.len();
        if size > self.max_frame_bytes {
            self.pending.clear();
            return Err(CodecError::FrameTooLarge {
                size,
                max_size: self.max_frame_bytes,
            });
        }
        Ok(())
    }
}

/// Decodes one frame into a message.
///
/// # Errors
///
/// Returns [`CodecError::Decode`] when the frame is not a valid message.
pub fn decode<T: DeserializeOwned>(frame: &[u8]) -> Result<T, CodecError> {
    serde_json::from_slice(frame).map_err(CodecError::Decode)
}

/// Encodes a message as a newline-terminated frame.
///
/// # Errors
///
/// Returns [`CodecError::Encode`] when serialisation fails.
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, CodecError> {
    let mut frame = serde_json::to_vec(message).map_err(CodecError::Encode)?;
    frame.push(b'\n');
    Ok(frame)
}

/// Encodes a message and writes it to the stream in one call, then flushes.
///
/// # Errors
///
/// Returns an error when encoding, writing, or flushing fails.
pub fn write_frame<W: Write, T: Serialize>(writer: &mut W, message: &T) -> Result<(), CodecError> {
    let frame = encode(message)?;
    writer.write_all(&frame)?;
    writer.flush()?;
    Ok(())
}
