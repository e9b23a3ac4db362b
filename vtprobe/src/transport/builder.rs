//! Builder for creating the probe server.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;

use super::config::{DEFAULT_HOST_KEY, DEFAULT_LISTEN, ServerConfig};
use super::ssh::{SshServer, load_host_key};
use crate::error::{Result, TransportError};
use crate::probe::ProbeCatalog;
use crate::probe::catalog::find_duplicate_name;
use crate::probe::runner::DEFAULT_NUDGE_GRACE;
use crate::session::{DEFAULT_HANDSHAKE_TIMEOUT, SessionConfig};

/// Builder for constructing an [`SshServer`].
///
/// # Example
///
/// ```rust,no_run
/// use std::time::Duration;
/// use vtprobe::ServerBuilder;
///
/// # async fn example() -> Result<(), vtprobe::Error> {
/// let server = ServerBuilder::new()
///     .listen("127.0.0.1:2222")
///     .host_key("host_key")
///     .probe_timeout(Duration::from_secs(1))
///     .build()?;
/// server.serve().await?;
/// # Ok(())
/// # }
/// ```
pub struct ServerBuilder {
    listen: String,
    host_key_path: PathBuf,
    password: Option<SecretString>,
    inactivity_timeout: Option<Duration>,
    handshake_timeout: Duration,
    probe_timeout: Option<Duration>,
    nudge_grace: Duration,
    capabilities: ProbeCatalog,
    security: ProbeCatalog,
}

impl ServerBuilder {
    /// Create a builder with the built-in probe suites.
    pub fn new() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
            host_key_path: PathBuf::from(DEFAULT_HOST_KEY),
            password: None,
            inactivity_timeout: Some(Duration::from_secs(300)),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            probe_timeout: None,
            nudge_grace: DEFAULT_NUDGE_GRACE,
            capabilities: ProbeCatalog::capabilities(),
            security: ProbeCatalog::security(),
        }
    }

    /// Set the listen address (default: `0.0.0.0:2222`).
    pub fn listen(mut self, addr: impl Into<String>) -> Self {
        self.listen = addr.into();
        self
    }

    /// Set the host key file (default: `host_key`).
    pub fn host_key(mut self, path: impl Into<PathBuf>) -> Self {
        self.host_key_path = path.into();
        self
    }

    /// Require clients to present this password.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(SecretString::from(password.into()));
        self
    }

    /// Set the idle disconnect timeout. `None` disables it.
    pub fn inactivity_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.inactivity_timeout = timeout;
        self
    }

    /// Set how long to wait for the terminal to answer the status query.
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Override the timeout of every probe in both suites.
    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = Some(timeout);
        self
    }

    /// Set how long stale replies are drained after a timeout.
    pub fn nudge_grace(mut self, grace: Duration) -> Self {
        self.nudge_grace = grace;
        self
    }

    /// Replace the capability suite.
    pub fn capabilities(mut self, catalog: ProbeCatalog) -> Self {
        self.capabilities = catalog;
        self
    }

    /// Replace the security suite.
    pub fn security(mut self, catalog: ProbeCatalog) -> Self {
        self.security = catalog;
        self
    }

    /// Validate the settings and produce a [`ServerConfig`].
    pub fn build_config(self) -> Result<ServerConfig> {
        if self.listen.trim().is_empty() {
            return Err(TransportError::InvalidConfig {
                message: "Listen address is required".to_string(),
            }
            .into());
        }

        if let Some(name) = find_duplicate_name([&self.capabilities, &self.security]) {
            return Err(TransportError::InvalidConfig {
                message: format!("Probe name '{}' is used more than once", name),
            }
            .into());
        }

        let (capabilities, security) = match self.probe_timeout {
            Some(timeout) => (
                self.capabilities.with_timeout(timeout),
                self.security.with_timeout(timeout),
            ),
            None => (self.capabilities, self.security),
        };

        let mut session = SessionConfig {
            handshake_timeout: self.handshake_timeout,
            capabilities,
            security,
            ..Default::default()
        };
        session.runner.nudge_grace = self.nudge_grace;

        Ok(ServerConfig {
            listen: self.listen,
            host_key_path: self.host_key_path,
            password: self.password,
            inactivity_timeout: self.inactivity_timeout,
            session: Arc::new(session),
            ..Default::default()
        })
    }

    /// Build the server, loading its host key.
    pub fn build(self) -> Result<SshServer> {
        let config = self.build_config()?;
        let host_key = load_host_key(&config.host_key_path)?;
        Ok(SshServer::new(config, host_key))
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
