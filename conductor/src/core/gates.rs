//! Gate definitions, the five precedence tiers, and the bundle resolver.
//!
//! A gate is a named set of pass criteria evaluated by the assistant's
//! self-report — or, for shell-check gates, by a subprocess exit code. The
//! resolver merges five tiers into one ordered, deduplicated bundle per
//! execution; one definition wins per id, with
//! temporary > template > category > framework > fallback.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateKind {
    /// Requires an explicit PASS/FAIL outcome before the chain advances.
    Validation,
    /// Shapes the rendered instructions; never blocks.
    Guidance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateSeverity {
    Blocking,
    Advisory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateScope {
    Execution,
    Chain,
    Step,
}

/// Source tier, lowest to highest precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateTier {
    Fallback,
    Framework,
    Category,
    Template,
    Temporary,
}

/// Attempt/timeout presets for shell checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShellPreset {
    Fast,
    Full,
    Extended,
}

impl ShellPreset {
    pub fn attempts(self) -> u32 {
        match self {
            Self::Fast => 1,
            Self::Full => 5,
            Self::Extended => 10,
        }
    }

    pub fn timeout(self) -> Duration {
        match self {
            Self::Fast => Duration::from_secs(30),
            Self::Full => Duration::from_secs(300),
            Self::Extended => Duration::from_secs(600),
        }
    }
}

/// Subprocess pass criteria: the exit code decides, not a self-report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellCheck {
    pub command: Vec<String>,
    #[serde(default)]
    pub preset: Option<ShellPreset>,
    /// Explicit override; wins over the preset.
    #[serde(default)]
    pub attempts: Option<u32>,
    /// Explicit override in seconds; wins over the preset.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl ShellCheck {
    pub fn new(command: Vec<String>) -> Self {
        Self {
            command,
            preset: None,
            attempts: None,
            timeout_secs: None,
        }
    }

    pub fn effective_attempts(&self) -> u32 {
        self.attempts
            .unwrap_or_else(|| self.preset.unwrap_or(ShellPreset::Fast).attempts())
    }

    pub fn effective_timeout(&self) -> Duration {
        self.timeout_secs
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.preset.unwrap_or(ShellPreset::Fast).timeout())
    }
}

/// One named gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateDefinition {
    pub id: String,
    pub kind: GateKind,
    pub severity: GateSeverity,
    pub criteria: Vec<String>,
    #[serde(default)]
    pub shell: Option<ShellCheck>,
    pub scope: GateScope,
    pub tier: GateTier,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl GateDefinition {
    pub fn guidance(id: &str, criteria: &[&str], tier: GateTier) -> Self {
        Self {
            id: id.to_string(),
            kind: GateKind::Guidance,
            severity: GateSeverity::Advisory,
            criteria: criteria.iter().map(|c| c.to_string()).collect(),
            shell: None,
            scope: GateScope::Execution,
            tier,
            expires_at: None,
        }
    }

    pub fn validation(id: &str, criteria: &[&str], tier: GateTier) -> Self {
        Self {
            id: id.to_string(),
            kind: GateKind::Validation,
            severity: GateSeverity::Blocking,
            criteria: criteria.iter().map(|c| c.to_string()).collect(),
            shell: None,
            scope: GateScope::Execution,
            tier,
            expires_at: None,
        }
    }

    pub fn is_blocking_validation(&self) -> bool {
        self.kind == GateKind::Validation && self.severity == GateSeverity::Blocking
    }
}

/// Resolved, tier-ordered, deduplicated gate list for one execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateBundle {
    gates: Vec<GateDefinition>,
}

impl GateBundle {
    pub fn gates(&self) -> &[GateDefinition] {
        &self.gates
    }

    pub fn is_empty(&self) -> bool {
        self.gates.is_empty()
    }

    pub fn guidance(&self) -> impl Iterator<Item = &GateDefinition> {
        self.gates.iter().filter(|g| g.kind == GateKind::Guidance)
    }

    pub fn blocking_validations(&self) -> impl Iterator<Item = &GateDefinition> {
        self.gates.iter().filter(|g| g.is_blocking_validation())
    }

    pub fn shell_checks(&self) -> impl Iterator<Item = &GateDefinition> {
        self.gates
            .iter()
            .filter(|g| g.is_blocking_validation() && g.shell.is_some())
    }
}

/// Per-tier inputs to one resolution.
#[derive(Debug, Clone, Default)]
pub struct TierInputs {
    pub fallback: Vec<GateDefinition>,
    pub framework: Vec<GateDefinition>,
    pub category: Vec<GateDefinition>,
    pub template_includes: Vec<GateDefinition>,
    /// Ids removed regardless of which earlier tier introduced them.
    pub template_excludes: Vec<String>,
    pub temporary: Vec<GateDefinition>,
}

/// Merge the five tiers into one bundle.
///
/// Insertion order is fallback → framework → category → template →
/// temporary; inserting an existing id overwrites the lower-precedence
/// definition in place. Template excludes apply at template time, so a
/// temporary gate reusing an excluded id still survives. The final bundle is
/// ordered highest tier first.
pub fn resolve_bundle(inputs: &TierInputs) -> GateBundle {
    let mut gates: Vec<GateDefinition> = Vec::new();

    let mut insert_tier = |gates: &mut Vec<GateDefinition>, tier: &[GateDefinition]| {
        for gate in tier {
            match gates.iter_mut().find(|g| g.id == gate.id) {
                Some(existing) => *existing = gate.clone(),
                None => gates.push(gate.clone()),
            }
        }
    };

    insert_tier(&mut gates, &inputs.fallback);
    insert_tier(&mut gates, &inputs.framework);
    insert_tier(&mut gates, &inputs.category);
    insert_tier(&mut gates, &inputs.template_includes);
    gates.retain(|g| !inputs.template_excludes.contains(&g.id));
    insert_tier(&mut gates, &inputs.temporary);

    gates.sort_by(|a, b| b.tier.cmp(&a.tier));
    GateBundle { gates }
}

/// System default gates (fallback tier). Guidance only, so routine steps
/// never force a verdict round-trip.
pub fn fallback_gates() -> Vec<GateDefinition> {
    vec![
        GateDefinition::guidance(
            "clarity",
            &["State conclusions before detail; avoid filler."],
            GateTier::Fallback,
        ),
        GateDefinition::guidance(
            "completeness",
            &["Address every part of the instructions; note anything deliberately skipped."],
            GateTier::Fallback,
        ),
    ]
}

/// Category-derived gates (category tier).
pub fn category_gates(category: &str) -> Vec<GateDefinition> {
    match category {
        "research" => vec![GateDefinition::guidance(
            "source-traceability",
            &["Attribute claims to their sources; flag unverified ones."],
            GateTier::Category,
        )],
        "code" | "debugging" => vec![GateDefinition::guidance(
            "reproducibility",
            &["Show the exact commands or snippets needed to reproduce the result."],
            GateTier::Category,
        )],
        _ => Vec::new(),
    }
}

/// Known gates activatable by bare id (inline specs, template includes).
#[derive(Debug, Clone)]
pub struct GateCatalog {
    gates: HashMap<String, GateDefinition>,
}

impl GateCatalog {
    pub fn with_builtins() -> Self {
        let builtins = vec![
            GateDefinition::validation(
                "no-unhandled-errors",
                &["No unhandled error paths remain in the produced work."],
                GateTier::Template,
            ),
            GateDefinition::validation(
                "citation-check",
                &["Every factual claim cites a source the reader can follow."],
                GateTier::Template,
            ),
            GateDefinition {
                shell: Some(ShellCheck {
                    command: vec!["cargo".to_string(), "check".to_string()],
                    preset: Some(ShellPreset::Fast),
                    attempts: None,
                    timeout_secs: None,
                }),
                ..GateDefinition::validation(
                    "build-check",
                    &["The workspace compiles."],
                    GateTier::Template,
                )
            },
        ];
        let gates = builtins.into_iter().map(|g| (g.id.clone(), g)).collect();
        Self { gates }
    }

    pub fn get(&self, id: &str) -> Option<&GateDefinition> {
        self.gates.get(id)
    }

    /// Resolve include ids to definitions at the given tier, dropping unknown
    /// ids (the caller logs them).
    pub fn resolve_ids(&self, ids: &[String], tier: GateTier) -> (Vec<GateDefinition>, Vec<String>) {
        let mut found = Vec::new();
        let mut missing = Vec::new();
        for id in ids {
            match self.gates.get(id) {
                Some(def) => {
                    let mut def = def.clone();
                    def.tier = tier;
                    found.push(def);
                }
                None => missing.push(id.clone()),
            }
        }
        (found, missing)
    }
}
