//! Per-session record of probe replies.

use bytes::Bytes;
use indexmap::IndexMap;

/// Result of running a single probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The terminal answered with this unit.
    Reply(Bytes),

    /// Nothing recognizable arrived before the probe's deadline.
    TimedOut,

    /// The deadline passed, but these units showed up while draining after
    /// it. Kept apart from on-time replies.
    Late(Bytes),
}

impl ProbeOutcome {
    /// Check if the probe got a reply.
    pub fn is_reply(&self) -> bool {
        matches!(self, ProbeOutcome::Reply(_))
    }

    /// The on-time reply bytes, if any.
    pub fn reply(&self) -> Option<&Bytes> {
        match self {
            ProbeOutcome::Reply(bytes) => Some(bytes),
            ProbeOutcome::TimedOut | ProbeOutcome::Late(_) => None,
        }
    }

    /// Bytes that arrived after the deadline, if any.
    pub fn late(&self) -> Option<&Bytes> {
        match self {
            ProbeOutcome::Late(bytes) => Some(bytes),
            _ => None,
        }
    }
}

/// Raw replies keyed by probe name, in the order the probes ran.
///
/// Timed-out probes have no reply entry. Whatever they drained after the
/// deadline is kept separately under the same name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseRecord {
    replies: IndexMap<String, Bytes>,
    late: IndexMap<String, Bytes>,
}

impl ResponseRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the outcome of the probe called `name`.
    ///
    /// Returns `true` if a reply was stored.
    pub fn record(&mut self, name: &str, outcome: ProbeOutcome) -> bool {
        match outcome {
            ProbeOutcome::Reply(bytes) => {
                self.replies.insert(name.to_string(), bytes);
                true
            }
            ProbeOutcome::Late(bytes) => {
                self.late.insert(name.to_string(), bytes);
                false
            }
            ProbeOutcome::TimedOut => false,
        }
    }

    /// Reply recorded for `name`.
    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.replies.get(name).map(|b| b.as_ref())
    }

    /// Bytes that arrived for `name` after its deadline.
    pub fn get_late(&self, name: &str) -> Option<&[u8]> {
        self.late.get(name).map(|b| b.as_ref())
    }

    /// The reply for `name`, falling back to its late bytes.
    ///
    /// The flag is `true` when the bytes came late.
    pub fn get_any(&self, name: &str) -> Option<(&[u8], bool)> {
        self.get(name)
            .map(|b| (b, false))
            .or_else(|| self.get_late(name).map(|b| (b, true)))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.replies.contains_key(name)
    }

    /// Iterate over `(probe name, reply)` pairs in run order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.replies.iter().map(|(k, v)| (k.as_str(), v.as_ref()))
    }

    /// Iterate over late `(probe name, bytes)` pairs in run order.
    pub fn iter_late(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.late.iter().map(|(k, v)| (k.as_str(), v.as_ref()))
    }

    /// Number of probes that got a reply.
    pub fn len(&self) -> usize {
        self.replies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.replies.is_empty() && self.late.is_empty()
    }
}
