//! Classification of recorded replies.

use bytes::Bytes;
use memchr::memmem;
use serde::{Serialize, Serializer};

use super::catalog::ProbeCatalog;
use super::response::ResponseRecord;

/// Vulnerability verdict for one `CVE-` probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    /// Name of the probe.
    pub probe: String,

    /// The recorded reply, if the terminal sent one.
    #[serde(serialize_with = "lossy")]
    pub reply: Option<Bytes>,

    /// Whether `reply` only arrived after the probe's deadline.
    pub late: bool,

    /// Whether the reply contained the probe's detection marker.
    pub vulnerable: bool,
}

/// A value pulled out of a well-known reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Fact {
    /// Probe whose reply this came from.
    pub probe: String,

    /// Decoded value.
    pub value: String,
}

/// Everything the analyzer derives from a finished run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Analysis {
    /// One entry per vulnerability probe, in catalog order.
    pub findings: Vec<Finding>,

    /// Number of findings flagged vulnerable.
    pub flagged: usize,

    /// Values extracted from identification replies.
    pub facts: Vec<Fact>,
}

impl Analysis {
    /// Findings flagged vulnerable.
    pub fn vulnerable(&self) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(|f| f.vulnerable)
    }

    /// Look up an extracted value by probe name.
    pub fn fact(&self, probe: &str) -> Option<&str> {
        self.facts
            .iter()
            .find(|f| f.probe == probe)
            .map(|f| f.value.as_str())
    }
}

fn lossy<S: Serializer>(reply: &Option<Bytes>, serializer: S) -> Result<S::Ok, S::Error> {
    match reply {
        Some(bytes) => serializer.serialize_some(&String::from_utf8_lossy(bytes)),
        None => serializer.serialize_none(),
    }
}

/// Strips a fixed header and trailer from the reply to one named probe.
#[derive(Debug, Clone, Copy)]
pub struct ReplyExtractor {
    /// Probe whose reply is decoded.
    pub probe: &'static str,

    /// Bytes the reply must start with.
    pub header: &'static [u8],

    /// Bytes removed from the end when present.
    pub trailer: &'static [u8],
}

impl ReplyExtractor {
    /// Decode `reply`, or `None` if it lacks the expected header.
    pub fn extract(&self, reply: &[u8]) -> Option<String> {
        let body = reply.strip_prefix(self.header)?;
        let body = body.strip_suffix(self.trailer).unwrap_or(body);
        Some(String::from_utf8_lossy(body).into_owned())
    }
}

/// XTVERSION: `DCS > | name(version) ST`.
pub const XTVERSION: ReplyExtractor = ReplyExtractor {
    probe: "XTVERSION",
    header: b"\x1bP>|",
    trailer: b"\x1b\\",
};

/// Window title report: `OSC l title ST`.
pub const TITLE: ReplyExtractor = ReplyExtractor {
    probe: "TITLE",
    header: b"\x1b]l",
    trailer: b"\x1b\\",
};

/// Turns a [`ResponseRecord`] into findings.
#[derive(Debug, Clone)]
pub struct ResultAnalyzer {
    extractors: Vec<ReplyExtractor>,
}

impl ResultAnalyzer {
    /// Create an analyzer with the given extractors.
    pub fn new(extractors: Vec<ReplyExtractor>) -> Self {
        Self { extractors }
    }

    /// Classify every vulnerability probe in `catalogs` and extract facts.
    pub fn analyze<'a>(
        &self,
        catalogs: impl IntoIterator<Item = &'a ProbeCatalog>,
        record: &ResponseRecord,
    ) -> Analysis {
        let findings: Vec<Finding> = catalogs
            .into_iter()
            .flat_map(|c| c.iter())
            .filter(|p| p.is_vulnerability())
            .map(|probe| {
                let reply = record.get_any(&probe.name);
                let vulnerable = match (reply, &probe.marker) {
                    (Some((reply, _)), Some(marker)) => memmem::find(reply, marker).is_some(),
                    _ => false,
                };
                Finding {
                    probe: probe.name.clone(),
                    reply: reply.map(|(bytes, _)| Bytes::copy_from_slice(bytes)),
                    late: reply.is_some_and(|(_, late)| late),
                    vulnerable,
                }
            })
            .collect();

        let flagged = findings.iter().filter(|f| f.vulnerable).count();

        Analysis {
            findings,
            flagged,
            facts: self.facts(record),
        }
    }

    /// Run only the extractors.
    pub fn facts(&self, record: &ResponseRecord) -> Vec<Fact> {
        self.extractors
            .iter()
            .filter_map(|ex| {
                let (reply, _) = record.get_any(ex.probe)?;
                let value = ex.extract(reply)?;
                Some(Fact {
                    probe: ex.probe.to_string(),
                    value,
                })
            })
            .collect()
    }
}

impl Default for ResultAnalyzer {
    fn default() -> Self {
        Self::new(vec![XTVERSION, TITLE])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::catalog::Probe;
    use crate::probe::response::ProbeOutcome;

    fn reply(record: &mut ResponseRecord, name: &str, bytes: &'static [u8]) {
        record.record(name, ProbeOutcome::Reply(Bytes::from_static(bytes)));
    }

    fn cve_catalog() -> ProbeCatalog {
        ProbeCatalog::new("t").with_probe(
            Probe::new("CVE-X", "\x1bP$q;touch foo\x1b\\").with_marker("foo"),
        )
    }

    #[test]
    fn test_marker_in_reply_flags() {
        let catalog = cve_catalog();
        let mut record = ResponseRecord::new();
        reply(&mut record, "CVE-X", b"\x1bP1$r;touch foo\x1b\\");

        let analysis = ResultAnalyzer::default().analyze([&catalog], &record);
        assert_eq!(analysis.flagged, 1);
        assert!(analysis.findings[0].vulnerable);
        assert_eq!(analysis.vulnerable().next().unwrap().probe, "CVE-X");
    }

    #[test]
    fn test_missing_reply_is_clear() {
        let catalog = cve_catalog();
        let analysis = ResultAnalyzer::default().analyze([&catalog], &ResponseRecord::new());
        assert_eq!(analysis.flagged, 0);
        assert_eq!(analysis.findings.len(), 1);
        assert!(!analysis.findings[0].vulnerable);
        assert!(analysis.findings[0].reply.is_none());
    }

    #[test]
    fn test_late_reply_checked_against_marker() {
        let catalog = cve_catalog().with_probe(Probe::new("pad", "").with_marker("\x1b"));
        let mut record = ResponseRecord::new();
        record.record(
            "CVE-X",
            ProbeOutcome::Late(Bytes::from_static(b"\x1bP1$r;touch foo\x1b\\")),
        );
        record.record("pad", ProbeOutcome::TimedOut);

        let analysis = ResultAnalyzer::default().analyze([&catalog], &record);
        assert_eq!(analysis.flagged, 1);
        assert!(analysis.findings[0].vulnerable);
        assert!(analysis.findings[0].late);
    }

    #[test]
    fn test_on_time_reply_preferred_over_late() {
        let catalog = cve_catalog();
        let mut record = ResponseRecord::new();
        reply(&mut record, "CVE-X", b"\x1bP0$r\x1b\\");
        record.record("CVE-X", ProbeOutcome::Late(Bytes::from_static(b"\x1b[0n")));

        let analysis = ResultAnalyzer::default().analyze([&catalog], &record);
        assert!(!analysis.findings[0].late);
        assert_eq!(analysis.findings[0].reply.as_deref(), Some(&b"\x1bP0$r\x1b\\"[..]));
    }

    #[test]
    fn test_reply_without_marker_is_clear() {
        let catalog = cve_catalog();
        let mut record = ResponseRecord::new();
        reply(&mut record, "CVE-X", b"\x1bP0$r\x1b\\");

        let analysis = ResultAnalyzer::default().analyze([&catalog], &record);
        assert!(!analysis.findings[0].vulnerable);
    }

    #[test]
    fn test_only_cve_names_are_classified() {
        let catalog = ProbeCatalog::new("t")
            .with_probe(Probe::new("DSR", "\x1b[6n"))
            .with_probe(Probe::new("pad", "").with_marker("\x1b"));
        let mut record = ResponseRecord::new();
        reply(&mut record, "DSR", b"\x1b[0n");
        reply(&mut record, "pad", b"\x1b[0n");

        let analysis = ResultAnalyzer::default().analyze([&catalog], &record);
        assert!(analysis.findings.is_empty());
        assert_eq!(analysis.flagged, 0);
    }

    #[test]
    fn test_builtin_security_suite() {
        let catalog = ProbeCatalog::security();
        let mut record = ResponseRecord::new();
        reply(&mut record, "CVE-2022-45063", b"\x1b]50;$(touch /tmp/cve-2022-45063)\x07");
        reply(&mut record, "CVE-2003-0063", b"\x1b]lxterm\x1b\\");

        let analysis = ResultAnalyzer::default().analyze([&catalog], &record);
        let flagged: Vec<_> = analysis.vulnerable().map(|f| f.probe.as_str()).collect();
        assert_eq!(flagged, ["CVE-2022-45063"]);
        assert_eq!(analysis.findings.len(), 7);
    }

    #[test]
    fn test_xtversion_extracted() {
        let mut record = ResponseRecord::new();
        reply(&mut record, "XTVERSION", b"\x1bP>|xterm(388)\x1b\\");
        reply(&mut record, "TITLE", b"\x1b]lbash\x1b\\");

        let analysis = ResultAnalyzer::default().analyze(std::iter::empty(), &record);
        assert_eq!(analysis.fact("XTVERSION"), Some("xterm(388)"));
        assert_eq!(analysis.fact("TITLE"), Some("bash"));
    }

    #[test]
    fn test_extractor_needs_header() {
        assert_eq!(XTVERSION.extract(b"\x1b[?62c"), None);
        assert_eq!(XTVERSION.extract(b"\x1bP>|kitty(0.31)"), Some("kitty(0.31)".into()));
    }

    #[test]
    fn test_analysis_is_idempotent() {
        let catalog = ProbeCatalog::security();
        let mut record = ResponseRecord::new();
        reply(&mut record, "CVE-2008-2383", b"\x1bP1$r;touch /tmp/cve-2008-2383\x1b\\");
        reply(&mut record, "XTVERSION", b"\x1bP>|WezTerm\x1b\\");

        let analyzer = ResultAnalyzer::default();
        let first = analyzer.analyze([&catalog], &record);
        let second = analyzer.analyze([&catalog], &record);
        assert_eq!(first, second);
    }

    #[test]
    fn test_serializes_reply_as_text() {
        let catalog = cve_catalog();
        let mut record = ResponseRecord::new();
        reply(&mut record, "CVE-X", b"\x1bP1$r;touch foo\x1b\\");

        let analysis = ResultAnalyzer::default().analyze([&catalog], &record);
        let json = serde_json::to_value(&analysis).unwrap();
        assert_eq!(json["flagged"], 1);
        assert_eq!(json["findings"][0]["reply"], "\u{1b}P1$r;touch foo\u{1b}\\");
    }
}
