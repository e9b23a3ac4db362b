//! Probe catalog, runner and result analysis.
//!
//! A [`ProbeCatalog`] lists the control sequences to try, a [`ProbeRunner`]
//! sends them one at a time and records replies in a [`ResponseRecord`],
//! and the [`ResultAnalyzer`] turns the finished record into findings.

pub mod analyzer;
pub mod catalog;
mod response;
pub mod runner;

pub use analyzer::{Analysis, Fact, Finding, ResultAnalyzer};
pub use catalog::{DEFAULT_TIMEOUT, Probe, ProbeCatalog, VULNERABILITY_PREFIX};
pub use response::{ProbeOutcome, ResponseRecord};
pub use runner::{ProbeRunner, RunnerConfig};
