//! The seven operator kinds and the position-independent command scan.
//!
//! The scan extracts structured operator payloads from anywhere in the
//! command text, blanks the matched spans, and treats what remains as prompt
//! references. Quoted text never participates in matching.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::quote;
use crate::error::ParseError;

/// One prompt invocation inside a chain or parallel group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainEntry {
    /// Raw reference as written, prefix included (`>>research`, `summary`).
    pub prompt_ref: String,
    /// Argument text following the reference, untokenized.
    pub raw_args: String,
}

impl ChainEntry {
    fn from_segment(segment: &str) -> Self {
        let trimmed = segment.trim();
        match trimmed.split_once(char::is_whitespace) {
            Some((prompt_ref, raw_args)) => Self {
                prompt_ref: prompt_ref.to_string(),
                raw_args: raw_args.trim().to_string(),
            },
            None => Self {
                prompt_ref: trimmed.to_string(),
                raw_args: String::new(),
            },
        }
    }
}

/// Ordered multi-step execution: `a --> b --> c`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainOperator {
    pub entries: Vec<ChainEntry>,
}

/// Methodology override: `@ReACT`.
///
/// The name is normalized case-insensitively for lookup but preserved as
/// written for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameworkOperator {
    pub lookup_name: String,
    pub display_name: String,
}

/// Validation criteria: `::"…"` preferred, legacy `="…"` tolerated.
///
/// Both spellings fold into this one shape; `legacy` records that the
/// deprecated spelling appeared so merge logic handles a single variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateOperator {
    /// Case-insensitively deduplicated, in declaration order.
    pub criteria: Vec<String>,
    pub legacy: bool,
}

/// Same-round-trip branches: `>>a + >>b` (only without a chain operator).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParallelOperator {
    pub branches: Vec<ChainEntry>,
}

/// Assistant-evaluated branch: `?"condition":branch`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionalOperator {
    pub condition: String,
    pub branch: String,
}

/// Expansion marker left behind by repetition preprocessing (`* N`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepetitionOperator {
    pub count: u32,
}

/// Response style directive: `#concise`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyleOperator {
    pub name: String,
}

/// Typed collection of every operator detected in one command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorSet {
    pub chain: Option<ChainOperator>,
    pub framework: Option<FrameworkOperator>,
    pub gate: Option<GateOperator>,
    pub parallel: Option<ParallelOperator>,
    pub conditional: Option<ConditionalOperator>,
    pub repetition: Option<RepetitionOperator>,
    pub style: Option<StyleOperator>,
}

impl OperatorSet {
    pub fn is_empty(&self) -> bool {
        self.chain.is_none()
            && self.framework.is_none()
            && self.gate.is_none()
            && self.parallel.is_none()
            && self.conditional.is_none()
            && self.repetition.is_none()
            && self.style.is_none()
    }
}

/// Result of one scan pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorScan {
    pub set: OperatorSet,
    /// The non-operator remainder when no chain/parallel structure was found:
    /// a single `ref args` invocation. `None` when the command had structure
    /// or nothing but operators.
    pub single: Option<ChainEntry>,
}

static CONDITIONAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\?\s*(?:"([^"]*)"|'([^']*)')\s*:\s*(\S+)"#).expect("conditional pattern")
});

static GATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(::|=)\s*(?:"([^"]*)"|'([^']*)')"#).expect("gate pattern")
});

static FRAMEWORK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@([A-Za-z0-9][A-Za-z0-9_-]*)").expect("framework pattern"));

static STYLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"#([A-Za-z][A-Za-z0-9_-]*)").expect("style pattern"));

static PARALLEL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|\s)(\+)(?:\s|$)").expect("parallel pattern"));

/// Scan command text for operators, independent of position.
///
/// Repetition must already have been rewritten away (see
/// [`crate::core::repetition`]); this scan never sees a `* N`.
pub fn scan(text: &str) -> Result<OperatorScan, ParseError> {
    let mask = quote::mask(text);
    let mut remainder = text.to_string();
    let mut set = OperatorSet::default();

    // Conditional first: its quoted condition would otherwise feed the gate
    // scan a stray `:` to chew on.
    if let Some(caps) = CONDITIONAL_RE
        .captures_iter(text)
        .find(|caps| !mask[caps.get(0).expect("match").start()])
    {
        let whole = caps.get(0).expect("match");
        let condition = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();
        let branch = caps.get(3).expect("branch").as_str().to_string();
        set.conditional = Some(ConditionalOperator { condition, branch });
        quote::blank_span(&mut remainder, whole.start(), whole.end());
    }

    set.gate = scan_gates(text, &mask, &mut remainder);

    if let Some(caps) = FRAMEWORK_RE.captures_iter(text).find(|caps| {
        let start = caps.get(0).expect("match").start();
        // An `@` glued to an identifier (user@host) is not an override.
        let glued = text[..start]
            .chars()
            .next_back()
            .is_some_and(|c| c.is_alphanumeric() || c == '_');
        !mask[start] && !glued
    }) {
        let whole = caps.get(0).expect("match");
        let display = caps.get(1).expect("name").as_str();
        set.framework = Some(FrameworkOperator {
            lookup_name: display.to_uppercase(),
            display_name: display.to_string(),
        });
        quote::blank_span(&mut remainder, whole.start(), whole.end());
    }

    if let Some(caps) = STYLE_RE
        .captures_iter(text)
        .find(|caps| !mask[caps.get(0).expect("match").start()])
    {
        let whole = caps.get(0).expect("match");
        set.style = Some(StyleOperator {
            name: caps.get(1).expect("name").as_str().to_lowercase(),
        });
        quote::blank_span(&mut remainder, whole.start(), whole.end());
    }

    // Structure last, on whatever text the payload scans left behind.
    let single = scan_structure(&remainder, &mask, &mut set)?;

    Ok(OperatorScan { set, single })
}

/// Collect every gate clause into one deduplicated criteria list.
fn scan_gates(text: &str, mask: &[bool], remainder: &mut String) -> Option<GateOperator> {
    let mut criteria: Vec<String> = Vec::new();
    let mut legacy = false;
    let mut spans = Vec::new();

    for caps in GATE_RE.captures_iter(text) {
        let whole = caps.get(0).expect("match");
        if mask[whole.start()] {
            continue;
        }
        let spelling = caps.get(1).expect("spelling").as_str();
        if spelling == "=" {
            // An `=` glued to an identifier is an argument assignment.
            let glued = text[..whole.start()]
                .chars()
                .next_back()
                .is_some_and(|c| c.is_alphanumeric() || c == '_');
            if glued {
                continue;
            }
            warn!(clause = whole.as_str(), "deprecated '=' gate spelling; use '::'");
            legacy = true;
        }
        let criterion = caps
            .get(2)
            .or_else(|| caps.get(3))
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_default();
        if !criterion.is_empty()
            && !criteria
                .iter()
                .any(|c| c.eq_ignore_ascii_case(&criterion))
        {
            criteria.push(criterion);
        }
        spans.push((whole.start(), whole.end()));
    }

    for (start, end) in spans {
        quote::blank_span(remainder, start, end);
    }

    if criteria.is_empty() {
        None
    } else {
        Some(GateOperator { criteria, legacy })
    }
}

/// Split the remainder into chain entries, parallel branches, or one single
/// invocation.
fn scan_structure(
    remainder: &str,
    mask: &[bool],
    set: &mut OperatorSet,
) -> Result<Option<ChainEntry>, ParseError> {
    let chain_splits = unmasked_positions(remainder, mask, "-->");
    if !chain_splits.is_empty() {
        let segments = split_at(remainder, &chain_splits, 3);
        let mut entries = Vec::with_capacity(segments.len());
        for (position, segment) in segments.iter().enumerate() {
            if segment.trim().is_empty() {
                return Err(ParseError::EmptyChainSegment { position });
            }
            entries.push(ChainEntry::from_segment(segment));
        }
        set.chain = Some(ChainOperator { entries });
        return Ok(None);
    }

    // `+` only counts when no chain operator is present.
    let parallel_splits: Vec<usize> = PARALLEL_RE
        .captures_iter(remainder)
        .filter_map(|caps| {
            let plus = caps.get(1).expect("plus");
            (!mask[plus.start()]).then_some(plus.start())
        })
        .collect();
    if !parallel_splits.is_empty() {
        let segments = split_at(remainder, &parallel_splits, 1);
        let mut branches = Vec::with_capacity(segments.len());
        for (position, segment) in segments.iter().enumerate() {
            if segment.trim().is_empty() {
                return Err(ParseError::EmptyChainSegment { position });
            }
            branches.push(ChainEntry::from_segment(segment));
        }
        set.parallel = Some(ParallelOperator { branches });
        return Ok(None);
    }

    let trimmed = remainder.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    Ok(Some(ChainEntry::from_segment(trimmed)))
}

/// Byte offsets of every unmasked occurrence of `needle`.
fn unmasked_positions(text: &str, mask: &[bool], needle: &str) -> Vec<usize> {
    let mut positions = Vec::new();
    let mut from = 0;
    while let Some(found) = text[from..].find(needle) {
        let at = from + found;
        if !mask[at] {
            positions.push(at);
        }
        from = at + needle.len();
    }
    positions
}

/// Split `text` at each separator position, dropping `sep_len` bytes there.
fn split_at<'a>(text: &'a str, positions: &[usize], sep_len: usize) -> Vec<&'a str> {
    let mut segments = Vec::with_capacity(positions.len() + 1);
    let mut start = 0;
    for &pos in positions {
        segments.push(&text[start..pos]);
        start = pos + sep_len;
    }
    segments.push(&text[start..]);
    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scans_chain_entries_in_source_order() {
        let scan = scan(">>research topic:'quantum' --> summary --> >>report").expect("scan");
        let chain = scan.set.chain.expect("chain");
        assert_eq!(chain.entries.len(), 3);
        assert_eq!(chain.entries[0].prompt_ref, ">>research");
        assert_eq!(chain.entries[0].raw_args, "topic:'quantum'");
        assert_eq!(chain.entries[1].prompt_ref, "summary");
        assert_eq!(chain.entries[2].prompt_ref, ">>report");
        assert!(scan.single.is_none());
    }

    #[test]
    fn quoted_arrow_is_literal() {
        let scan = scan(">>research topic:'a --> b'").expect("scan");
        assert!(scan.set.chain.is_none());
        let single = scan.single.expect("single");
        assert_eq!(single.prompt_ref, ">>research");
        assert_eq!(single.raw_args, "topic:'a --> b'");
    }

    #[test]
    fn framework_is_normalized_but_display_preserved() {
        let scan = scan("@ReACT >>debug").expect("scan");
        let framework = scan.set.framework.expect("framework");
        assert_eq!(framework.lookup_name, "REACT");
        assert_eq!(framework.display_name, "ReACT");
        assert_eq!(scan.single.expect("single").prompt_ref, ">>debug");
    }

    #[test]
    fn gate_clauses_merge_case_insensitively() {
        let scan = scan(r#">>debug ::"No Regressions" :: "no regressions" ::'clean build'"#)
            .expect("scan");
        let gate = scan.set.gate.expect("gate");
        assert_eq!(gate.criteria, vec!["No Regressions", "clean build"]);
        assert!(!gate.legacy);
    }

    #[test]
    fn legacy_gate_spelling_sets_flag() {
        let scan = scan(r#">>debug ="no panics""#).expect("scan");
        let gate = scan.set.gate.expect("gate");
        assert!(gate.legacy);
        assert_eq!(gate.criteria, vec!["no panics"]);
    }

    #[test]
    fn argument_assignment_is_not_a_legacy_gate() {
        let scan = scan(r#">>research topic="rust""#).expect("scan");
        assert!(scan.set.gate.is_none());
        assert_eq!(scan.single.expect("single").raw_args, r#"topic="rust""#);
    }

    #[test]
    fn parallel_requires_no_chain() {
        let scan1 = scan(">>a + >>b").expect("scan");
        let parallel = scan1.set.parallel.expect("parallel");
        assert_eq!(parallel.branches.len(), 2);

        let scan2 = scan(">>a + >>b --> >>c").expect("scan");
        assert!(scan2.set.parallel.is_none());
        assert!(scan2.set.chain.is_some());
    }

    #[test]
    fn conditional_extracts_condition_and_branch() {
        let scan = scan(r#">>triage ?"severity is high":>>escalate"#).expect("scan");
        let conditional = scan.set.conditional.expect("conditional");
        assert_eq!(conditional.condition, "severity is high");
        assert_eq!(conditional.branch, ">>escalate");
    }

    #[test]
    fn style_directive_is_lowercased() {
        let scan = scan("#Concise >>summary").expect("scan");
        assert_eq!(scan.set.style.expect("style").name, "concise");
    }

    #[test]
    fn empty_chain_segment_is_rejected() {
        let err = scan(">>a --> ").expect_err("should reject");
        assert!(matches!(err, ParseError::EmptyChainSegment { position: 1 }));
    }

    #[test]
    fn scan_is_deterministic() {
        let text = r#"@CAGEERF >>research topic:'x' --> summary ::"has citations""#;
        let first = scan(text).expect("scan");
        let second = scan(text).expect("scan");
        assert_eq!(first, second);
    }
}
