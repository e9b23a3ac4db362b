//! Sequential probe execution with per-probe deadlines.
//!
//! Each probe is written, then exactly one reply unit is read for it. A
//! positive timeout is a deadline on that read. When it passes, the runner
//! asks the terminal for its device status and collects everything up to
//! the status report as the probe's late bytes, so a slow reply is neither
//! lost nor attributed to the next probe. All of this happens before the
//! next probe is written.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use log::{debug, trace};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::Instant;

use super::catalog::{Probe, ProbeCatalog};
use super::response::{ProbeOutcome, ResponseRecord};
use crate::channel::PtyChannel;
use crate::error::{ChannelError, Result};

/// Query written after a timeout. No catalog probe asks for device status,
/// so its answer can't be confused with a straggling reply.
pub const NUDGE: &[u8] = b"\x1b[5n";

/// Device status reports: terminal OK, terminal malfunction.
pub const NUDGE_ANSWERS: &[&[u8]] = &[b"\x1b[0n", b"\x1b[3n"];

/// Default time allowed for the nudge reply.
pub const DEFAULT_NUDGE_GRACE: Duration = Duration::from_millis(500);

/// Timeout recovery settings.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Bytes written after a probe times out. Empty disables draining.
    pub nudge: Bytes,

    /// Units that answer the nudge and end the drain.
    pub nudge_answers: Vec<Bytes>,

    /// How long to drain stale replies after the nudge.
    pub nudge_grace: Duration,
}

impl RunnerConfig {
    fn is_nudge_answer(&self, unit: &[u8]) -> bool {
        self.nudge_answers.iter().any(|answer| answer[..] == *unit)
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            nudge: Bytes::from_static(NUDGE),
            nudge_answers: NUDGE_ANSWERS.iter().map(|&a| Bytes::from_static(a)).collect(),
            nudge_grace: DEFAULT_NUDGE_GRACE,
        }
    }
}

/// Drives probe catalogs against one terminal channel.
pub struct ProbeRunner<'a, S> {
    channel: &'a mut PtyChannel<S>,
    config: &'a RunnerConfig,
}

impl<'a, S> ProbeRunner<'a, S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(channel: &'a mut PtyChannel<S>, config: &'a RunnerConfig) -> Self {
        Self { channel, config }
    }

    /// Run every probe in `catalog` in order, storing replies in `record`.
    ///
    /// Returns the number of probes that got a reply before their deadline.
    /// A closed or failed stream stops the run and is returned as an error.
    pub async fn run(&mut self, catalog: &ProbeCatalog, record: &mut ResponseRecord) -> Result<usize> {
        let mut replies = 0;
        for probe in catalog {
            let outcome = self.run_probe(probe).await?;
            debug!("{}/{}: {:?}", catalog.name, probe.name, outcome);
            if record.record(&probe.name, outcome) {
                replies += 1;
            }
        }
        Ok(replies)
    }

    /// Send one probe and wait for its reply.
    pub async fn run_probe(&mut self, probe: &Probe) -> Result<ProbeOutcome> {
        if !probe.sequence.is_empty() {
            self.channel.send(&probe.sequence).await?;
        }

        if probe.timeout.is_zero() {
            let reply = self.channel.read_sequence().await?;
            return Ok(ProbeOutcome::Reply(reply));
        }

        let deadline = Instant::now() + probe.timeout;
        match self.channel.read_sequence_until(deadline, probe.timeout).await {
            Ok(reply) => Ok(ProbeOutcome::Reply(reply)),
            Err(ChannelError::SequenceTimeout(_)) => {
                debug!("{}: no reply within {:?}", probe.name, probe.timeout);
                match self.resync().await? {
                    Some(late) => Ok(ProbeOutcome::Late(late)),
                    None => Ok(ProbeOutcome::TimedOut),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Collect stale replies after a timeout.
    ///
    /// Stops at the nudge answer or when the grace period ends, whichever
    /// comes first, then discards any half-read unit. Returns the units
    /// drained ahead of the nudge answer, concatenated.
    async fn resync(&mut self) -> Result<Option<Bytes>> {
        let mut late = BytesMut::new();

        if !self.config.nudge.is_empty() {
            self.channel.send(&self.config.nudge).await?;

            let grace = self.config.nudge_grace;
            let deadline = Instant::now() + grace;
            loop {
                match self.channel.read_sequence_until(deadline, grace).await {
                    Ok(unit) if self.config.is_nudge_answer(&unit) => {
                        trace!("nudge answered with {:?}", unit);
                        break;
                    }
                    Ok(unit) => {
                        debug!("late reply {:?}", unit);
                        late.extend_from_slice(&unit);
                    }
                    Err(ChannelError::SequenceTimeout(_)) => {
                        debug!("no answer to nudge within {:?}", grace);
                        break;
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }

        self.channel.reset_sequence();
        Ok((!late.is_empty()).then(|| late.freeze()))
    }
}
