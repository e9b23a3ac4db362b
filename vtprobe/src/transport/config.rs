//! SSH server configuration.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

use crate::session::SessionConfig;

/// Default listen address.
pub const DEFAULT_LISTEN: &str = "0.0.0.0:2222";

/// Default host key location, relative to the working directory.
pub const DEFAULT_HOST_KEY: &str = "host_key";

/// SSH server configuration.
#[derive(Debug)]
pub struct ServerConfig {
    /// Address to listen on, e.g. `0.0.0.0:2222`.
    pub listen: String,

    /// OpenSSH private key used as the server host key.
    pub host_key_path: PathBuf,

    /// Shared password. When unset anyone may connect.
    pub password: Option<SecretString>,

    /// Disconnect clients idle for this long.
    pub inactivity_timeout: Option<Duration>,

    /// Delay before answering a failed authentication attempt.
    pub auth_rejection_time: Duration,

    /// Settings handed to every terminal session.
    pub session: Arc<SessionConfig>,
}

impl ServerConfig {
    /// Whether clients must present the shared password.
    pub fn requires_password(&self) -> bool {
        self.password.is_some()
    }

    /// Check a password offered by a client.
    pub fn check_password(&self, candidate: &str) -> bool {
        match &self.password {
            Some(expected) => expected.expose_secret() == candidate,
            None => true,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
            host_key_path: PathBuf::from(DEFAULT_HOST_KEY),
            password: None,
            inactivity_timeout: Some(Duration::from_secs(300)),
            auth_rejection_time: Duration::from_secs(1),
            session: Arc::new(SessionConfig::default()),
        }
    }
}
