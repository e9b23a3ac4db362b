//! PTY channel abstraction for one connected terminal.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;

use super::sequence::{DEFAULT_MAX_SEQUENCE_LEN, SequenceReader};
use crate::error::ChannelError;

/// Terminal details from the client's PTY request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TerminalInfo {
    /// Value of `TERM` on the client side.
    pub term: String,

    /// Terminal width in columns.
    pub cols: u32,

    /// Terminal height in rows.
    pub rows: u32,
}

impl TerminalInfo {
    pub fn new(term: impl Into<String>, cols: u32, rows: u32) -> Self {
        Self {
            term: term.into(),
            cols,
            rows,
        }
    }
}

impl Default for TerminalInfo {
    fn default() -> Self {
        Self::new("xterm", 80, 24)
    }
}

impl fmt::Display for TerminalInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}x{}", self.term, self.cols, self.rows)
    }
}

/// Configuration for PTY channel behavior.
#[derive(Debug, Clone)]
pub struct PtyConfig {
    /// Longest reply unit the reader will accumulate.
    pub max_sequence_len: usize,
}

impl Default for PtyConfig {
    fn default() -> Self {
        Self {
            max_sequence_len: DEFAULT_MAX_SEQUENCE_LEN,
        }
    }
}

/// Duplex byte channel to a remote terminal.
///
/// Owns the stream and the [`SequenceReader`] framing replies from it, so
/// every probe write and reply read for a session goes through one place.
pub struct PtyChannel<S> {
    /// The underlying byte stream.
    stream: S,

    /// Reply framer; keeps partial state across abandoned reads.
    reader: SequenceReader,

    /// What the client told us about its terminal.
    info: TerminalInfo,

    /// Cleared once the stream has failed or ended.
    is_open: bool,
}

impl<S> PtyChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Create a channel over `stream` with default configuration.
    pub fn new(stream: S, info: TerminalInfo) -> Self {
        Self::with_config(stream, info, PtyConfig::default())
    }

    /// Create a channel over `stream` with the given configuration.
    pub fn with_config(stream: S, info: TerminalInfo, config: PtyConfig) -> Self {
        Self {
            stream,
            reader: SequenceReader::new(config.max_sequence_len),
            info,
            is_open: true,
        }
    }

    /// Terminal details for this channel.
    pub fn info(&self) -> &TerminalInfo {
        &self.info
    }

    /// Check if the channel is still usable.
    pub fn is_open(&self) -> bool {
        self.is_open
    }

    /// Write raw bytes to the terminal and flush them.
    pub async fn send(&mut self, data: &[u8]) -> Result<(), ChannelError> {
        if !self.is_open {
            return Err(ChannelError::StreamClosed);
        }
        let result = match self.stream.write_all(data).await {
            Ok(()) => self.stream.flush().await,
            Err(e) => Err(e),
        };
        result.map_err(|e| self.fail(e.into()))
    }

    /// Write text to the terminal.
    pub async fn send_str(&mut self, text: &str) -> Result<(), ChannelError> {
        self.send(text.as_bytes()).await
    }

    /// Read one reply unit, waiting as long as it takes.
    pub async fn read_sequence(&mut self) -> Result<Bytes, ChannelError> {
        if !self.is_open {
            return Err(ChannelError::StreamClosed);
        }
        let result = self.reader.read_sequence(&mut self.stream).await;
        result.map_err(|e| self.fail(e))
    }

    /// Read one reply unit, giving up at `deadline`.
    ///
    /// On timeout the partial unit stays in the reader; call
    /// [`reset_sequence`](Self::reset_sequence) to discard it. `timeout` is
    /// only used to describe the error.
    pub async fn read_sequence_until(
        &mut self,
        deadline: Instant,
        timeout: Duration,
    ) -> Result<Bytes, ChannelError> {
        tokio::time::timeout_at(deadline, self.read_sequence())
            .await
            .map_err(|_| ChannelError::SequenceTimeout(timeout))?
    }

    /// Discard any partially framed reply.
    pub fn reset_sequence(&mut self) {
        self.reader.reset();
    }

    /// Take back the underlying stream.
    pub fn into_inner(self) -> S {
        self.stream
    }

    fn fail(&mut self, err: ChannelError) -> ChannelError {
        if err.is_fatal() {
            self.is_open = false;
        }
        err
    }
}
