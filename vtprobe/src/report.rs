//! Lines written back to the user's terminal.
//!
//! Replies are always shown escaped. Writing them raw would hand the very
//! payloads being tested straight back to the terminal.

use crate::probe::{Fact, Finding};

const GREEN_BOLD: &str = "\x1b[1;32m";
const RED_BOLD: &str = "\x1b[1;31m";
const BLUE: &str = "\x1b[34m";
const RESET: &str = "\x1b[0m";

/// Client terminals are in raw mode, so lines need an explicit CR.
const EOL: &str = "\r\n";

/// Render bytes as a quoted, escaped string.
pub fn quote(bytes: &[u8]) -> String {
    format!("{:?}", String::from_utf8_lossy(bytes))
}

fn status(text: &str) -> String {
    format!("[{GREEN_BOLD}*{RESET}] {text}; please {BLUE}wait{RESET} (and don't touch anything)...{EOL}")
}

fn info(text: &str) -> String {
    format!("[-] {text}{EOL}")
}

pub fn testing_capabilities() -> String {
    status("Terminal testing")
}

pub fn testing_security() -> String {
    status("Now testing for security issues")
}

pub fn replies(count: usize) -> String {
    info(&format!("Got {count} replies"))
}

pub fn fact(fact: &Fact) -> String {
    info(&format!("{}={}", fact.probe, quote(fact.value.as_bytes())))
}

pub fn vulnerable(finding: &Finding) -> String {
    let reply = finding.reply.as_deref().unwrap_or_default();
    let kind = if finding.late { "late reply" } else { "reply" };
    format!(
        "[{RED_BOLD}!{RESET}] Potentially vulnerable to {} (got {} as {}){EOL}",
        finding.probe,
        quote(reply),
        kind
    )
}

pub fn all_clear() -> String {
    info("No known and detectable security issues found.")
}

pub fn footer() -> String {
    format!(
        "[-] {} {}{EOL}{EOL}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    )
}

pub fn no_pty() -> String {
    format!("No PTY requested. You must run ssh without a command (or use -t).{EOL}")
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    #[test]
    fn test_quote_escapes_control_bytes() {
        let quoted = quote(b"\x1b]0;touch /tmp/x\x07");
        assert!(!quoted.contains('\x1b'));
        assert!(!quoted.contains('\x07'));
        assert!(quoted.starts_with('"'));
    }

    #[test]
    fn test_vulnerable_line_never_contains_raw_reply() {
        let finding = Finding {
            probe: "CVE-2008-2383".into(),
            reply: Some(Bytes::from_static(b"\x1bP1$r;touch /tmp/cve-2008-2383\x1b\\")),
            late: false,
            vulnerable: true,
        };
        let line = vulnerable(&finding);
        assert!(line.contains("CVE-2008-2383"));
        assert!(line.contains("as reply)"));
        assert!(!line.contains("\x1bP"));
        assert!(line.ends_with("\r\n"));
    }

    #[test]
    fn test_vulnerable_line_marks_late_reply() {
        let finding = Finding {
            probe: "CVE-2003-0063".into(),
            reply: Some(Bytes::from_static(b"\x1b]ltouch /tmp/cve-2003-0063\x1b\\")),
            late: true,
            vulnerable: true,
        };
        assert!(vulnerable(&finding).contains("as late reply)"));
    }

    #[test]
    fn test_replies_line() {
        assert_eq!(replies(3), "[-] Got 3 replies\r\n");
    }

    #[test]
    fn test_fact_line() {
        let fact = Fact {
            probe: "XTVERSION".into(),
            value: "xterm(388)".into(),
        };
        assert_eq!(super::fact(&fact), "[-] XTVERSION=\"xterm(388)\"\r\n");
    }
}
