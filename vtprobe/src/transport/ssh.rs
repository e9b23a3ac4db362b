//! SSH server implementation using russh.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use log::{debug, info, warn};
use russh::keys::{PrivateKey, load_secret_key};
use russh::server::{self, Auth, Handle, Msg, Server as _, Session};
use russh::{Channel, ChannelId, Pty};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::config::ServerConfig;
use crate::channel::TerminalInfo;
use crate::error::{Result, TransportError};
use crate::report;
use crate::session::TerminalSession;

/// Load the server host key from an OpenSSH private key file.
pub fn load_host_key(path: &Path) -> Result<PrivateKey> {
    load_secret_key(path, None).map_err(|e| {
        TransportError::HostKey {
            path: path.to_path_buf(),
            message: e.to_string(),
        }
        .into()
    })
}

/// SSH server that probes every interactive client.
pub struct SshServer {
    /// Server configuration shared with every connection.
    config: Arc<ServerConfig>,

    /// russh configuration, including the host key.
    ssh_config: Arc<server::Config>,
}

impl SshServer {
    /// Create a server from a configuration and a loaded host key.
    pub fn new(config: ServerConfig, host_key: PrivateKey) -> Self {
        let ssh_config = Arc::new(server::Config {
            inactivity_timeout: config.inactivity_timeout,
            auth_rejection_time: config.auth_rejection_time,
            auth_rejection_time_initial: Some(std::time::Duration::ZERO),
            keys: vec![host_key],
            ..Default::default()
        });

        Self {
            config: Arc::new(config),
            ssh_config,
        }
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Accept connections until the listener fails.
    pub async fn serve(mut self) -> Result<()> {
        let listen = self.config.listen.clone();
        info!("Starting ssh server on {}", listen);

        let ssh_config = self.ssh_config.clone();
        self.run_on_address(ssh_config, listen.as_str())
            .await
            .map_err(TransportError::Io)?;
        Ok(())
    }
}

impl server::Server for SshServer {
    type Handler = ConnectionHandler;

    fn new_client(&mut self, peer: Option<SocketAddr>) -> ConnectionHandler {
        debug!("new client from {:?}", peer);
        ConnectionHandler::new(peer, self.config.clone())
    }

    fn handle_session_error(&mut self, error: russh::Error) {
        warn!("SSH session error: {}", error);
    }
}

/// Per-connection russh handler.
///
/// Tracks open session channels and their PTY requests until the client
/// asks for a shell, then hands the channel to a [`TerminalSession`].
pub struct ConnectionHandler {
    peer: Option<SocketAddr>,
    config: Arc<ServerConfig>,
    channels: HashMap<ChannelId, Channel<Msg>>,
    terminals: HashMap<ChannelId, TerminalInfo>,
}

impl ConnectionHandler {
    fn new(peer: Option<SocketAddr>, config: Arc<ServerConfig>) -> Self {
        Self {
            peer,
            config,
            channels: HashMap::new(),
            terminals: HashMap::new(),
        }
    }

    /// Start serving `id` on its own task.
    fn start(&mut self, id: ChannelId, session: &mut Session) {
        let Some(channel) = self.channels.remove(&id) else {
            warn!("{:?}: shell requested on unknown channel {:?}", self.peer, id);
            return;
        };
        let terminal = self.terminals.remove(&id);
        let handle = session.handle();
        let config = self.config.clone();
        let peer = self.peer;

        tokio::spawn(serve_channel(channel, handle, terminal, config, peer));
    }
}

/// Run one channel to completion and close it.
async fn serve_channel(
    channel: Channel<Msg>,
    handle: Handle,
    terminal: Option<TerminalInfo>,
    config: Arc<ServerConfig>,
    peer: Option<SocketAddr>,
) {
    let id = channel.id();
    let mut stream = channel.into_stream();

    let exit_status = match terminal {
        Some(info) => {
            info!("{:?}: new connection ({})", peer, info);
            let mut session = TerminalSession::new(stream, info, config.session.clone());
            match session.run().await {
                Ok(summary) => {
                    info!(
                        "{:?}: done, {} potential issue(s)",
                        peer, summary.analysis.flagged
                    );
                    0
                }
                Err(e) if e.is_stream_closed() => {
                    info!("{:?}: lost connection: {}", peer, e);
                    1
                }
                Err(e) => {
                    warn!("{:?}: session ended: {}", peer, e);
                    1
                }
            }
        }
        None => {
            debug!("{:?}: no PTY requested", peer);
            if let Err(e) = send_no_pty_notice(&mut stream).await {
                debug!("{:?}: failed to send no-PTY notice: {}", peer, e);
            }
            1
        }
    };

    if handle.exit_status_request(id, exit_status).await.is_err() {
        debug!("{:?}: failed to send exit status for {:?}", peer, id);
    }
    if handle.eof(id).await.is_err() {
        debug!("{:?}: failed to send EOF for {:?}", peer, id);
    }
    if handle.close(id).await.is_err() {
        debug!("{:?}: failed to close {:?}", peer, id);
    }
}

/// Tell a client without a PTY why nothing will happen.
async fn send_no_pty_notice<W>(stream: &mut W) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    stream.write_all(report::no_pty().as_bytes()).await?;
    stream.flush().await
}

impl server::Handler for ConnectionHandler {
    type Error = russh::Error;

    async fn auth_none(&mut self, user: &str) -> std::result::Result<Auth, Self::Error> {
        if self.config.requires_password() {
            return Ok(Auth::reject());
        }
        debug!("{:?}: accepted user '{}' without authentication", self.peer, user);
        Ok(Auth::Accept)
    }

    async fn auth_password(
        &mut self,
        user: &str,
        password: &str,
    ) -> std::result::Result<Auth, Self::Error> {
        if self.config.check_password(password) {
            debug!("{:?}: accepted user '{}'", self.peer, user);
            Ok(Auth::Accept)
        } else {
            info!("{:?}: wrong password for user '{}'", self.peer, user);
            Ok(Auth::reject())
        }
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> std::result::Result<bool, Self::Error> {
        self.channels.insert(channel.id(), channel);
        Ok(true)
    }

    async fn pty_request(
        &mut self,
        channel: ChannelId,
        term: &str,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(Pty, u32)],
        session: &mut Session,
    ) -> std::result::Result<(), Self::Error> {
        self.terminals
            .insert(channel, TerminalInfo::new(term, col_width, row_height));
        session.channel_success(channel)?;
        Ok(())
    }

    async fn window_change_request(
        &mut self,
        channel: ChannelId,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _session: &mut Session,
    ) -> std::result::Result<(), Self::Error> {
        if let Some(info) = self.terminals.get_mut(&channel) {
            info.cols = col_width;
            info.rows = row_height;
        }
        Ok(())
    }

    async fn shell_request(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> std::result::Result<(), Self::Error> {
        session.channel_success(channel)?;
        self.start(channel, session);
        Ok(())
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> std::result::Result<(), Self::Error> {
        debug!(
            "{:?}: ignoring command {}",
            self.peer,
            report::quote(data)
        );
        session.channel_success(channel)?;
        self.start(channel, session);
        Ok(())
    }
}
