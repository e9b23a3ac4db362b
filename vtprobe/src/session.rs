//! One probing session against a connected terminal.
//!
//! The session checks that something answering like a terminal is on the
//! other end, runs the capability suite, then the security suite, and
//! writes a short report back to the user.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::Instant;

use crate::channel::{PtyChannel, TerminalInfo};
use crate::error::{ChannelError, Result, SessionError};
use crate::probe::{Analysis, ProbeCatalog, ProbeRunner, ResponseRecord, ResultAnalyzer, RunnerConfig};
use crate::report;

/// Query every ANSI terminal answers; used to confirm interactivity.
pub const STATUS_QUERY: &[u8] = b"\x1b[6n";

/// Default wait for the answer to [`STATUS_QUERY`].
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Settings shared by every session on a server.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long to wait for the terminal to answer the status query.
    /// Zero waits forever.
    pub handshake_timeout: Duration,

    /// Timeout recovery for the probe runner.
    pub runner: RunnerConfig,

    /// Suite run first; replies are informational.
    pub capabilities: ProbeCatalog,

    /// Suite run second; `CVE-` probes are classified.
    pub security: ProbeCatalog,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            runner: RunnerConfig::default(),
            capabilities: ProbeCatalog::capabilities(),
            security: ProbeCatalog::security(),
        }
    }
}

/// Summary of a finished session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub terminal: TerminalInfo,
    pub capability_replies: usize,
    pub security_replies: usize,
    pub analysis: Analysis,
}

/// Probing session over one terminal stream.
pub struct TerminalSession<S> {
    channel: PtyChannel<S>,
    config: Arc<SessionConfig>,
    analyzer: ResultAnalyzer,
    record: ResponseRecord,
}

impl<S> TerminalSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, info: TerminalInfo, config: Arc<SessionConfig>) -> Self {
        Self {
            channel: PtyChannel::new(stream, info),
            config,
            analyzer: ResultAnalyzer::default(),
            record: ResponseRecord::new(),
        }
    }

    /// Replies recorded so far.
    pub fn record(&self) -> &ResponseRecord {
        &self.record
    }

    /// Run the full battery and report to the terminal.
    ///
    /// Nothing is probed unless the terminal answers the status query.
    pub async fn run(&mut self) -> Result<SessionReport> {
        self.handshake().await?;
        info!("{}: terminal answered, probing", self.channel.info());

        self.channel.send_str(&report::testing_capabilities()).await?;
        let capability_replies = ProbeRunner::new(&mut self.channel, &self.config.runner)
            .run(&self.config.capabilities, &mut self.record)
            .await?;
        self.channel.send_str(&report::replies(capability_replies)).await?;
        for fact in self.analyzer.facts(&self.record) {
            self.channel.send_str(&report::fact(&fact)).await?;
        }

        self.channel.send_str(&report::testing_security()).await?;
        let security_replies = ProbeRunner::new(&mut self.channel, &self.config.runner)
            .run(&self.config.security, &mut self.record)
            .await?;
        self.channel.send_str(&report::replies(security_replies)).await?;

        for (name, reply) in self.record.iter() {
            debug!("{} => {}", name, report::quote(reply));
        }
        for (name, bytes) in self.record.iter_late() {
            debug!("{} => {} (late)", name, report::quote(bytes));
        }

        let analysis = self
            .analyzer
            .analyze([&self.config.capabilities, &self.config.security], &self.record);
        for finding in analysis.vulnerable() {
            self.channel.send_str(&report::vulnerable(finding)).await?;
        }
        if analysis.flagged == 0 {
            self.channel.send_str(&report::all_clear()).await?;
        }
        self.channel.send_str(&report::footer()).await?;

        let summary = SessionReport {
            terminal: self.channel.info().clone(),
            capability_replies,
            security_replies,
            analysis,
        };
        match serde_json::to_string(&summary) {
            Ok(json) => info!("session report: {}", json),
            Err(e) => warn!("failed to serialize session report: {}", e),
        }
        Ok(summary)
    }

    /// Confirm there is an interactive terminal on the other end.
    async fn handshake(&mut self) -> Result<()> {
        self.channel.send(STATUS_QUERY).await?;

        let timeout = self.config.handshake_timeout;
        let reply = if timeout.is_zero() {
            self.channel.read_sequence().await
        } else {
            self.channel
                .read_sequence_until(Instant::now() + timeout, timeout)
                .await
        };

        match reply {
            Ok(reply) => {
                debug!("status query answered with {}", report::quote(&reply));
                Ok(())
            }
            Err(ChannelError::SequenceTimeout(_)) => {
                Err(SessionError::NotInteractive(timeout).into())
            }
            Err(e) => Err(e.into()),
        }
    }
}
