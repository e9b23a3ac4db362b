//! # vtprobe
//!
//! SSH service that probes a connecting terminal emulator for
//! escape-sequence vulnerabilities.
//!
//! A client connects with an interactive terminal. vtprobe writes a series
//! of control sequences to it, frames the replies, and reports which
//! reporting features the terminal supports and which replies match known
//! reply-injection vulnerabilities (title reports, font reports, DECRQSS
//! echoes and similar). It only detects; it does not protect.
//!
//! ## Layers
//!
//! - [`channel`]: the byte stream to the terminal and the escape sequence
//!   framer that splits replies apart
//! - [`probe`]: the probe catalogs, the sequential runner with per-probe
//!   deadlines, and the analyzer
//! - [`session`]: one connection's handshake, suites and report
//! - [`transport`]: the russh server
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use vtprobe::ServerBuilder;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), vtprobe::Error> {
//!     ServerBuilder::new()
//!         .listen("0.0.0.0:2222")
//!         .host_key("host_key")
//!         .build()?
//!         .serve()
//!         .await
//! }
//! ```

pub mod channel;
pub mod error;
pub mod probe;
pub mod report;
pub mod session;
pub mod transport;

// Re-export main types for convenience
pub use channel::{PtyChannel, SequenceReader, TerminalInfo};
pub use error::Error;
pub use probe::{Analysis, Finding, Probe, ProbeCatalog, ProbeRunner, ResponseRecord, ResultAnalyzer};
pub use session::{SessionConfig, SessionReport, TerminalSession};
pub use transport::{ServerBuilder, ServerConfig, SshServer};
