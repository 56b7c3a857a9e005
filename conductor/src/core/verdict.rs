//! Gate verdict parsing.
//!
//! Verdict recognition is deliberately a closed set of phrasings rather than
//! open-ended natural-language detection. The minimal `PASS - reason` form is
//! only honored when it arrives via the dedicated verdict field; free-form
//! response text never produces a verdict from it.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Where the verdict text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerdictSource {
    /// The dedicated `gate_verdict` call field.
    DedicatedField,
    /// Free-form assistant response text.
    ResponseText,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateVerdict {
    pub passed: bool,
    pub rationale: String,
}

static VERDICT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(GATE_REVIEW\s*:\s*|GATE\s+)?(PASS|FAIL)\s*[-:]\s*(\S.*)$")
        .expect("verdict pattern")
});

/// Parse one of the accepted phrasings, case-insensitively.
///
/// Accepted: `GATE_REVIEW: PASS - reason`, `GATE_REVIEW: FAIL: reason`,
/// `GATE PASS - reason`, and — from the dedicated field only —
/// `PASS - reason`. A rationale is always required.
pub fn parse_verdict(text: &str, source: VerdictSource) -> Option<GateVerdict> {
    let caps = VERDICT_RE.captures(text)?;
    let prefixed = caps.get(1).is_some();
    if !prefixed && source == VerdictSource::ResponseText {
        return None;
    }
    let passed = caps
        .get(2)
        .expect("verdict word")
        .as_str()
        .eq_ignore_ascii_case("PASS");
    let rationale = caps.get(3).expect("rationale").as_str().trim().to_string();
    Some(GateVerdict { passed, rationale })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_the_closed_phrasing_set() {
        for (text, passed) in [
            ("GATE_REVIEW: PASS - criteria met", true),
            ("GATE_REVIEW: FAIL: missing citation", false),
            ("GATE PASS - looks complete", true),
            ("gate_review: pass - case-insensitive", true),
        ] {
            let verdict =
                parse_verdict(text, VerdictSource::ResponseText).expect("should parse");
            assert_eq!(verdict.passed, passed, "{text}");
            assert!(!verdict.rationale.is_empty());
        }
    }

    #[test]
    fn minimal_form_only_from_dedicated_field() {
        let verdict = parse_verdict("PASS - done", VerdictSource::DedicatedField);
        assert_eq!(
            verdict,
            Some(GateVerdict {
                passed: true,
                rationale: "done".to_string()
            })
        );
        assert_eq!(parse_verdict("PASS - done", VerdictSource::ResponseText), None);
    }

    #[test]
    fn rationale_is_required() {
        assert_eq!(parse_verdict("GATE PASS -", VerdictSource::DedicatedField), None);
        assert_eq!(parse_verdict("PASS", VerdictSource::DedicatedField), None);
    }

    #[test]
    fn free_prose_is_not_a_verdict() {
        assert_eq!(
            parse_verdict(
                "I think this will pass - we handled errors",
                VerdictSource::ResponseText
            ),
            None
        );
    }
}
