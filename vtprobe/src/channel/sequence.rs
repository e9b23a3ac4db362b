//! Escape sequence framing for terminal replies.
//!
//! The reader pulls bytes from an untrusted stream and frames exactly one
//! ESC-initiated unit per call. It only needs to be good enough to split
//! replies apart so they can be attributed to the probe that asked for
//! them; it is not a terminal parser.
//!
//! All framing state lives in [`SequenceReader`] rather than in the read
//! future, so a read abandoned at a deadline loses no bytes.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use log::{trace, warn};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::ChannelError;

pub const ESC: u8 = 0x1b;
pub const BEL: u8 = 0x07;

/// Upper bound on a single framed unit.
pub const DEFAULT_MAX_SEQUENCE_LEN: usize = 4096;

const READ_CHUNK: usize = 1024;

/// Framing state for the unit currently being read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SequenceState {
    /// Outside any sequence; bytes other than ESC are ignored.
    #[default]
    Ground,

    /// Saw ESC, waiting for the introducer byte. Another ESC starts over.
    Escape,

    /// `ESC [`, waiting for a final byte.
    Csi,

    /// `ESC ]`, string terminated by BEL or ESC + any byte.
    Osc { terminating: bool },

    /// `ESC P`, string terminated by ESC + any byte.
    Dcs { terminating: bool },

    /// Any other two-character escape, waiting for a final byte.
    GenericEscape,
}

/// CSI final bytes span `@` through `~`.
fn is_csi_final(byte: u8) -> bool {
    (0x40..=0x7e).contains(&byte)
}

/// Final bytes of a non-CSI escape (`ESC G`, `ESC ( B`, ...).
fn is_escape_final(byte: u8) -> bool {
    (0x30..=0x7e).contains(&byte)
}

/// Frames one terminal reply unit at a time from a byte stream.
#[derive(Debug)]
pub struct SequenceReader {
    /// Current framing state.
    state: SequenceState,

    /// Bytes of the unit being framed, starting at its ESC.
    frame: BytesMut,

    /// Bytes read from the stream but not yet framed.
    pending: BytesMut,

    /// Units longer than this are cut off and returned as-is.
    max_len: usize,
}

impl SequenceReader {
    /// Create a reader that caps units at `max_len` bytes.
    pub fn new(max_len: usize) -> Self {
        Self {
            state: SequenceState::Ground,
            frame: BytesMut::with_capacity(64),
            pending: BytesMut::with_capacity(READ_CHUNK),
            max_len: max_len.max(2),
        }
    }

    /// Current framing state.
    pub fn state(&self) -> SequenceState {
        self.state
    }

    /// Whether a unit has been started but not finished.
    pub fn has_partial(&self) -> bool {
        !self.frame.is_empty()
    }

    /// Number of bytes read from the stream that have not been framed yet.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Drop any partially framed unit and return to ground.
    ///
    /// Bytes already buffered past the partial unit are kept.
    pub fn reset(&mut self) {
        if self.has_partial() {
            trace!("discarding partial sequence {:?}", Bytes::copy_from_slice(&self.frame));
        }
        self.frame.clear();
        self.state = SequenceState::Ground;
    }

    /// Feed one byte. Returns the framed unit when `byte` completes it.
    pub fn push(&mut self, byte: u8) -> Option<Bytes> {
        let complete = match self.state {
            SequenceState::Ground => {
                if byte != ESC {
                    trace!("ignoring {:#04x} outside a sequence", byte);
                    return None;
                }
                self.state = SequenceState::Escape;
                false
            }
            SequenceState::Escape | SequenceState::GenericEscape if byte == ESC => {
                trace!("restarting sequence, dropping {:?}", Bytes::copy_from_slice(&self.frame));
                self.frame.clear();
                self.state = SequenceState::Escape;
                false
            }
            SequenceState::Escape => {
                self.state = match byte {
                    b'[' => SequenceState::Csi,
                    b'P' => SequenceState::Dcs { terminating: false },
                    b']' => SequenceState::Osc { terminating: false },
                    _ => SequenceState::GenericEscape,
                };
                self.state == SequenceState::GenericEscape && is_escape_final(byte)
            }
            SequenceState::Csi => is_csi_final(byte),
            SequenceState::Osc { terminating } => {
                if !terminating && byte == ESC {
                    self.state = SequenceState::Osc { terminating: true };
                }
                terminating || byte == BEL
            }
            SequenceState::Dcs { terminating } => {
                if !terminating && byte == ESC {
                    self.state = SequenceState::Dcs { terminating: true };
                }
                terminating
            }
            SequenceState::GenericEscape => is_escape_final(byte),
        };

        self.frame.put_u8(byte);

        if complete {
            return Some(self.finish());
        }
        if self.frame.len() >= self.max_len {
            warn!(
                "sequence exceeded {} bytes in state {:?}, returning it unterminated",
                self.max_len, self.state
            );
            return Some(self.finish());
        }
        None
    }

    /// Read until one complete unit has been framed and return its raw bytes.
    ///
    /// Cancel safe: dropping the future keeps every byte read so far, and a
    /// later call resumes the same unit.
    pub async fn read_sequence<R>(&mut self, reader: &mut R) -> Result<Bytes, ChannelError>
    where
        R: AsyncRead + Unpin,
    {
        loop {
            while self.pending.has_remaining() {
                let byte = self.pending.get_u8();
                if let Some(unit) = self.push(byte) {
                    return Ok(unit);
                }
            }

            self.pending.reserve(READ_CHUNK);
            let n = reader.read_buf(&mut self.pending).await?;
            if n == 0 {
                return Err(self.closed());
            }
        }
    }

    fn finish(&mut self) -> Bytes {
        self.state = SequenceState::Ground;
        self.frame.split().freeze()
    }

    fn closed(&mut self) -> ChannelError {
        self.state = SequenceState::Ground;
        if self.frame.is_empty() {
            ChannelError::StreamClosed
        } else {
            ChannelError::MalformedSequence {
                partial: self.frame.split().to_vec(),
            }
        }
    }
}

impl Default for SequenceReader {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SEQUENCE_LEN)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::AsyncWriteExt;
    use tokio_test::io::Builder;

    use super::*;

    fn frame_all(input: &[u8]) -> Vec<Bytes> {
        let mut reader = SequenceReader::default();
        input.iter().filter_map(|&b| reader.push(b)).collect()
    }

    #[test]
    fn test_well_formed_units_frame_verbatim() {
        let units: &[&[u8]] = &[
            b"\x1b[0n",
            b"\x1b[12;40R",
            b"\x1b[?62;22c",
            b"\x1b[2;1;1;112;112;1;0x",
            b"\x1b]l xterm title\x1b\\",
            b"\x1b]50;fixed\x07",
            b"\x1bP1$r0m\x1b\\",
            b"\x1bP>|xterm(388)\x1b\\",
        ];
        for unit in units {
            assert_eq!(frame_all(unit), vec![Bytes::from_static(unit)]);
        }
    }

    #[test]
    fn test_osc_bel_terminates() {
        let framed = frame_all(b"\x1b]50;$(touch /tmp/x)\x07");
        assert_eq!(framed.len(), 1);
        assert_eq!(framed[0].last(), Some(&BEL));
    }

    #[test]
    fn test_string_terminator_is_lenient() {
        // ESC followed by anything closes OSC and DCS, not just a backslash.
        assert_eq!(frame_all(b"\x1b]0;t\x1bX"), vec![Bytes::from_static(b"\x1b]0;t\x1bX")]);
        assert_eq!(frame_all(b"\x1bPdata\x1b\x1b"), vec![Bytes::from_static(b"\x1bPdata\x1b\x1b")]);
    }

    #[test]
    fn test_dcs_ignores_bel() {
        let mut reader = SequenceReader::default();
        for &b in b"\x1bP$q\x07m" {
            assert!(reader.push(b).is_none());
        }
        assert_eq!(reader.state(), SequenceState::Dcs { terminating: false });
    }

    #[test]
    fn test_csi_final_byte_range() {
        // '@' is a valid final byte; digits and separators are not.
        assert_eq!(frame_all(b"\x1b[2@"), vec![Bytes::from_static(b"\x1b[2@")]);
        let mut reader = SequenceReader::default();
        for &b in b"\x1b[?1;2" {
            assert!(reader.push(b).is_none());
        }
        assert_eq!(reader.state(), SequenceState::Csi);
    }

    #[test]
    fn test_generic_escape_terminates_on_final_byte() {
        assert_eq!(frame_all(b"\x1bG"), vec![Bytes::from_static(b"\x1bG")]);
        assert_eq!(frame_all(b"\x1b(B"), vec![Bytes::from_static(b"\x1b(B")]);
        assert_eq!(frame_all(b"\x1b\\"), vec![Bytes::from_static(b"\x1b\\")]);
    }

    #[test]
    fn test_escape_restarts_unfinished_escape() {
        assert_eq!(frame_all(b"\x1b\x1b[0n"), vec![Bytes::from_static(b"\x1b[0n")]);
        assert_eq!(frame_all(b"\x1b(\x1b[0n"), vec![Bytes::from_static(b"\x1b[0n")]);
        assert_eq!(
            frame_all(b"\x1b\x1b\x1bP>|xterm\x1b\\"),
            vec![Bytes::from_static(b"\x1bP>|xterm\x1b\\")]
        );
    }

    #[test]
    fn test_ground_bytes_are_ignored() {
        let framed = frame_all(b"hello\r\n\x1b[0nworld");
        assert_eq!(framed, vec![Bytes::from_static(b"\x1b[0n")]);
    }

    #[test]
    fn test_oversized_unit_is_cut_off() {
        let mut reader = SequenceReader::new(8);
        let out: Vec<_> = b"\x1bPaaaaaaaaaaaa".iter().filter_map(|&b| reader.push(b)).collect();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].len(), 8);
        assert_eq!(reader.state(), SequenceState::Ground);
    }

    #[tokio::test]
    async fn test_read_byte_by_byte() {
        let mut mock = Builder::new()
            .read(b"\x1b")
            .read(b"P")
            .read(b"1$r;touch foo")
            .read(b"\x1b")
            .read(b"\\")
            .build();
        let mut reader = SequenceReader::default();
        let unit = reader.read_sequence(&mut mock).await.unwrap();
        assert_eq!(&unit[..], b"\x1bP1$r;touch foo\x1b\\");
    }

    #[tokio::test]
    async fn test_leftover_bytes_belong_to_next_call() {
        let mut mock = Builder::new().read(b"\x1b]50;a\x07\x1b]50;b\x07").build();
        let mut reader = SequenceReader::default();
        assert_eq!(&reader.read_sequence(&mut mock).await.unwrap()[..], b"\x1b]50;a\x07");
        assert!(reader.pending_len() > 0);
        assert_eq!(&reader.read_sequence(&mut mock).await.unwrap()[..], b"\x1b]50;b\x07");
    }

    #[tokio::test]
    async fn test_eof_before_any_sequence() {
        let mut mock = Builder::new().read(b"junk").build();
        let mut reader = SequenceReader::default();
        let err = reader.read_sequence(&mut mock).await.unwrap_err();
        assert!(matches!(err, ChannelError::StreamClosed));
    }

    #[tokio::test]
    async fn test_eof_mid_sequence_is_malformed() {
        let mut mock = Builder::new().read(b"\x1b]0;unterminated").build();
        let mut reader = SequenceReader::default();
        match reader.read_sequence(&mut mock).await.unwrap_err() {
            ChannelError::MalformedSequence { partial } => {
                assert_eq!(partial, b"\x1b]0;unterminated");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!reader.has_partial());
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_read_resumes() {
        let (mut remote, mut local) = tokio::io::duplex(64);
        let mut reader = SequenceReader::default();

        remote.write_all(b"\x1b[12;").await.unwrap();
        let first =
            tokio::time::timeout(Duration::from_millis(100), reader.read_sequence(&mut local)).await;
        assert!(first.is_err());
        assert_eq!(reader.state(), SequenceState::Csi);

        remote.write_all(b"40R").await.unwrap();
        let unit = reader.read_sequence(&mut local).await.unwrap();
        assert_eq!(&unit[..], b"\x1b[12;40R");
    }
}
