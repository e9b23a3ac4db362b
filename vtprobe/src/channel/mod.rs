//! Channel layer for reading terminal replies.
//!
//! This module owns the byte stream to the remote terminal and frames
//! the escape sequences it sends back.

mod pty;
mod sequence;

pub use pty::{PtyChannel, PtyConfig, TerminalInfo};
pub use sequence::{BEL, DEFAULT_MAX_SEQUENCE_LEN, ESC, SequenceReader, SequenceState};
