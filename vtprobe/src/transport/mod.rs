//! SSH transport layer wrapping russh.
//!
//! This module accepts SSH connections, records each client's PTY
//! request, and hands every shell channel to a terminal session.

mod builder;
pub mod config;
mod ssh;

pub use builder::ServerBuilder;
pub use config::ServerConfig;
pub use ssh::{ConnectionHandler, SshServer, load_host_key};
