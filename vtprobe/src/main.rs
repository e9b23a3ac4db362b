//! vtprobe server binary.
//!
//! ```bash
//! ssh-keygen -t ed25519 -N '' -f host_key
//! RUST_LOG=debug vtprobe --listen 0.0.0.0:2222
//! ssh -p 2222 localhost
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use log::error;

use vtprobe::ServerBuilder;
use vtprobe::transport::config::{DEFAULT_HOST_KEY, DEFAULT_LISTEN};

#[derive(Parser, Debug)]
#[command(name = "vtprobe", version, about = "Probe connecting terminals for escape-sequence vulnerabilities")]
struct Args {
    /// Listen address for the SSH service
    #[arg(short, long, default_value = DEFAULT_LISTEN)]
    listen: String,

    /// OpenSSH private key used as the host key
    #[arg(long, default_value = DEFAULT_HOST_KEY)]
    host_key: PathBuf,

    /// Require this password from clients
    #[arg(long, env = "VTPROBE_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Seconds to wait for each probe's reply
    #[arg(long, value_parser = parse_seconds)]
    probe_timeout: Option<Duration>,

    /// Seconds to wait for the terminal to answer the initial status query
    #[arg(long, value_parser = parse_seconds, default_value = "5")]
    handshake_timeout: Duration,
}

fn parse_seconds(s: &str) -> Result<Duration, String> {
    let secs: f64 = s.parse().map_err(|e| format!("{e}"))?;
    Duration::try_from_secs_f64(secs).map_err(|e| format!("{e}"))
}

#[tokio::main]
async fn main() -> ExitCode {
    // Set RUST_LOG=debug to see every probe and reply
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let mut builder = ServerBuilder::new()
        .listen(args.listen)
        .host_key(args.host_key)
        .handshake_timeout(args.handshake_timeout);
    if let Some(password) = args.password {
        builder = builder.password(password);
    }
    if let Some(timeout) = args.probe_timeout {
        builder = builder.probe_timeout(timeout);
    }

    let result = match builder.build() {
        Ok(server) => server.serve().await,
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
