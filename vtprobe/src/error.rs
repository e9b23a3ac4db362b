//! Error types for vtprobe.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Main error type for vtprobe operations.
#[derive(Error, Debug)]
pub enum Error {
    /// SSH transport-level errors
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Channel operation errors
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Session-level errors
    #[error("Session error: {0}")]
    Session(#[from] SessionError),
}

impl Error {
    /// Whether this error ended the terminal stream.
    pub fn is_stream_closed(&self) -> bool {
        matches!(self, Error::Channel(e) if e.is_fatal())
    }
}

/// Transport layer errors (listening socket, host key, SSH protocol).
#[derive(Error, Debug)]
pub enum TransportError {
    /// Failed to load the server host key
    #[error("Failed to load host key from {}: {message}", path.display())]
    HostKey { path: PathBuf, message: String },

    /// SSH protocol error
    #[error("SSH error: {0}")]
    Ssh(#[from] russh::Error),

    /// Invalid server configuration
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// I/O error while serving
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Channel layer errors (reading and framing terminal replies).
#[derive(Error, Debug)]
pub enum ChannelError {
    /// The remote side ended the stream
    #[error("Stream closed")]
    StreamClosed,

    /// Reading from or writing to the stream failed
    #[error("Stream I/O error: {0}")]
    Io(#[from] io::Error),

    /// The stream ended in the middle of an escape sequence
    #[error("Stream closed mid-sequence after {} bytes", partial.len())]
    MalformedSequence { partial: Vec<u8> },

    /// No complete reply arrived before the deadline
    #[error("No reply within {0:?}")]
    SequenceTimeout(Duration),
}

impl ChannelError {
    /// Whether the error ends the session.
    ///
    /// Only a timeout is recoverable; everything else means the stream is gone.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ChannelError::SequenceTimeout(_))
    }
}

/// Session errors (handshake with the connected terminal).
#[derive(Error, Debug)]
pub enum SessionError {
    /// The terminal never answered the initial status query
    #[error("No reply to status query within {0:?}; not an interactive terminal")]
    NotInteractive(Duration),
}

/// Result type alias using vtprobe's Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_is_not_fatal() {
        assert!(!ChannelError::SequenceTimeout(Duration::from_secs(2)).is_fatal());
        assert!(ChannelError::StreamClosed.is_fatal());
        assert!(ChannelError::MalformedSequence { partial: vec![0x1b] }.is_fatal());
    }

    #[test]
    fn test_stream_closed_through_top_level() {
        let err: Error = ChannelError::StreamClosed.into();
        assert!(err.is_stream_closed());

        let err: Error = SessionError::NotInteractive(Duration::from_secs(1)).into();
        assert!(!err.is_stream_closed());
    }
}
