//! Trait abstraction for line-oriented telemetry input to enable testing

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::warn;

use crate::error::Result;

/// Default longest accepted line, terminator included
pub const DEFAULT_MAX_LINE_BYTES: usize = 4096;

/// Source of telemetry text lines
///
/// `Ok(None)` and `Err(_)` both mean the source is gone and must be reopened.
#[async_trait]
pub trait LineSource: Send {
    /// Wait for the next line, without its line ending
    async fn next_line(&mut self) -> Result<Option<String>>;

    /// Human-readable name for logs
    fn describe(&self) -> String {
        "line source".to_string()
    }
}

/// [`LineSource`] over any buffered async reader
///
/// Bytes are decoded as lossy UTF-8 and surrounding whitespace (including
/// `\r`) is trimmed. A line longer than the cap is skipped as it streams in,
/// so a link that never sends a newline cannot grow the buffer.
pub struct ReaderLineSource<R> {
    reader: R,
    buf: Vec<u8>,
    name: String,
    max_line_bytes: usize,
}

impl<R> ReaderLineSource<R> {
    pub fn new(reader: R, name: impl Into<String>) -> Self {
        Self {
            reader,
            buf: Vec::with_capacity(256),
            name: name.into(),
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        }
    }

    pub fn with_max_line_bytes(mut self, max_line_bytes: usize) -> Self {
        self.max_line_bytes = max_line_bytes;
        self
    }
}

#[async_trait]
impl<R> LineSource for ReaderLineSource<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    async fn next_line(&mut self) -> Result<Option<String>> {
        self.buf.clear();
        let mut started = false;
        let mut overflowed = false;

        loop {
            let available = self.reader.fill_buf().await?;
            if available.is_empty() {
                if overflowed {
                    warn!("{}: discarded unterminated line over {} bytes", self.name, self.max_line_bytes);
                    return Ok(None);
                }
                if !started {
                    return Ok(None);
                }
                break;
            }
            started = true;

            let newline = available.iter().position(|&b| b == b'\n');
            let used = newline.map_or(available.len(), |i| i + 1);
            if !overflowed {
                if self.buf.len() + used > self.max_line_bytes {
                    overflowed = true;
                    self.buf.clear();
                } else {
                    self.buf.extend_from_slice(&available[..used]);
                }
            }
            self.reader.consume(used);

            if newline.is_some() {
                if !overflowed {
                    break;
                }
                warn!("{}: discarded line over {} bytes", self.name, self.max_line_bytes);
                started = false;
                overflowed = false;
            }
        }

        Ok(Some(String::from_utf8_lossy(&self.buf).trim().to_string()))
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}

#[cfg(test)]
pub mod mocks {
    use super::*;
    use crate::error::BridgeError;
    use std::collections::VecDeque;
    use std::io;

    /// Scripted line source for testing
    ///
    /// Yields the scripted lines, then an optional error, then end of stream.
    pub struct MockLineSource {
        lines: VecDeque<String>,
        error: Option<io::ErrorKind>,
    }

    impl MockLineSource {
        pub fn new(lines: &[&str]) -> Self {
            Self {
                lines: lines.iter().map(|l| l.to_string()).collect(),
                error: None,
            }
        }

        pub fn failing_with(mut self, error: io::ErrorKind) -> Self {
            self.error = Some(error);
            self
        }
    }

    #[async_trait]
    impl LineSource for MockLineSource {
        async fn next_line(&mut self) -> Result<Option<String>> {
            if let Some(line) = self.lines.pop_front() {
                return Ok(Some(line));
            }
            match self.error.take() {
                Some(kind) => Err(BridgeError::Io(io::Error::new(kind, "Mock read error"))),
                None => Ok(None),
            }
        }
    }
}
