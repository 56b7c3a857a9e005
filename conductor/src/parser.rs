//! Command parser composition root.
//!
//! One entry point turns raw command text into an [`ExecutionPlan`]:
//! envelope unwrap → repetition rewrite → operator scan → prompt-id
//! resolution → argument validation → plan assembly. Everything here is
//! side-effect free; repeated parses of the same string yield structurally
//! identical plans.

use serde_json::Value;
use tracing::debug;

use crate::catalog::PromptCatalog;
use crate::core::operators::{self, ChainEntry, OperatorSet};
use crate::core::plan::{self, ExecutionPlan, ResolvedInvocation};
use crate::core::repetition;
use crate::core::suggest::suggest;
use crate::core::tokenizer;
use crate::error::{EngineError, ParseError, UnknownPromptError};

/// Parse output: the plan plus the operators it was built from.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedCommand {
    pub plan: ExecutionPlan,
    pub operators: OperatorSet,
}

pub struct CommandParser<'a> {
    catalog: &'a PromptCatalog,
}

impl<'a> CommandParser<'a> {
    pub fn new(catalog: &'a PromptCatalog) -> Self {
        Self { catalog }
    }

    /// The single parse entry point.
    pub fn parse(&self, raw: &str) -> Result<ParsedCommand, EngineError> {
        if raw.trim().is_empty() {
            return Err(ParseError::EmptyCommand.into());
        }

        let command = unwrap_envelope(raw)?;
        if command.trim().is_empty() {
            return Err(ParseError::EmptyCommand.into());
        }

        let (rewritten, repetition) = repetition::preprocess(&command)?;
        let scan = operators::scan(&rewritten)?;
        let mut set = scan.set;
        set.repetition = repetition;

        let entries: Vec<ChainEntry> = if let Some(chain) = &set.chain {
            chain.entries.clone()
        } else if let Some(parallel) = &set.parallel {
            parallel.branches.clone()
        } else if let Some(single) = scan.single {
            vec![single]
        } else {
            return Err(ParseError::EmptyCommand.into());
        };

        let mut invocations = Vec::with_capacity(entries.len());
        for entry in &entries {
            let prompt_id = self.resolve_ref(&entry.prompt_ref)?;
            invocations.push(ResolvedInvocation::new(prompt_id, entry));
        }

        let plan = plan::build_plan(&set, invocations);
        self.validate_arguments(&plan)?;

        debug!(
            steps = plan.steps.len(),
            execution_type = ?plan.execution_type,
            framework = plan.framework_override.as_deref(),
            "parsed command"
        );
        Ok(ParsedCommand { plan, operators: set })
    }

    /// Strip the reference prefix and resolve against the catalog, attaching
    /// ranked suggestions on failure.
    fn resolve_ref(&self, raw_ref: &str) -> Result<String, EngineError> {
        let name = strip_prompt_prefix(raw_ref)?;
        match self.catalog.resolve(name) {
            Some(def) => Ok(def.id.clone()),
            None => Err(UnknownPromptError {
                name: name.to_string(),
                suggestions: suggest(name, self.catalog.ids()),
            }
            .into()),
        }
    }

    fn validate_arguments(&self, plan: &ExecutionPlan) -> Result<(), EngineError> {
        for step in &plan.steps {
            let Some(def) = self.catalog.get(&step.prompt_id) else {
                // Renderer degrades unresolved steps; nothing to validate.
                continue;
            };
            tokenizer::parse_arguments(&step.raw_args, &def.arguments)
                .map_err(|err| EngineError::InvalidArgument(err.to_string()))?;
        }
        Ok(())
    }
}

/// Unwrap a JSON `{"command": …}` envelope, at most two levels deep.
///
/// The top level must be well-formed if it looks like JSON; a nested value
/// that merely resembles JSON stays literal — transports double-wrap, users
/// type braces.
fn unwrap_envelope(raw: &str) -> Result<String, ParseError> {
    let mut current = raw.trim().to_string();
    for level in 0..2 {
        let trimmed = current.trim();
        if !trimmed.starts_with('{') {
            break;
        }
        let value: Value = match serde_json::from_str(trimmed) {
            Ok(value) => value,
            Err(err) if level == 0 => {
                return Err(ParseError::MalformedEnvelope(err.to_string()));
            }
            Err(_) => break,
        };
        match value.get("command").and_then(Value::as_str) {
            Some(command) => current = command.to_string(),
            None if level == 0 => {
                return Err(ParseError::MalformedEnvelope(
                    "missing string 'command' field".to_string(),
                ));
            }
            None => break,
        }
    }
    Ok(current)
}

/// Accepts `>>` or `/`; a lone `>` is a transport defect, reported as such.
fn strip_prompt_prefix(raw: &str) -> Result<&str, ParseError> {
    if let Some(rest) = raw.strip_prefix(">>") {
        Ok(rest)
    } else if let Some(rest) = raw.strip_prefix('/') {
        Ok(rest)
    } else if let Some(rest) = raw.strip_prefix('>') {
        Err(ParseError::PartiallyUnescapedPrefix {
            reference: rest.to_string(),
        })
    } else {
        Ok(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::plan::ExecutionType;
    use crate::test_support::sample_catalog;

    fn parse(command: &str) -> Result<ParsedCommand, EngineError> {
        let catalog = sample_catalog();
        CommandParser::new(&catalog).parse(command)
    }

    /// Scenario A from the acceptance properties.
    #[test]
    fn chain_command_builds_two_step_plan() {
        let parsed = parse(">>research topic:'x' --> summary").expect("parse");
        assert_eq!(parsed.plan.execution_type, ExecutionType::Chain);
        assert_eq!(parsed.plan.total_steps(), 2);
        assert_eq!(parsed.plan.steps[0].prompt_id, "research");
        assert_eq!(parsed.plan.steps[0].raw_args, "topic:'x'");
        assert_eq!(parsed.plan.steps[1].prompt_id, "summary");
        assert!(parsed.plan.requires_session_state);
    }

    /// Scenario B from the acceptance properties.
    #[test]
    fn framework_and_gate_on_single_step() {
        let parsed = parse("@ReACT >>debug :: 'no unhandled errors'").expect("parse");
        assert_eq!(parsed.plan.total_steps(), 1);
        assert!(!parsed.plan.requires_session_state);
        assert_eq!(parsed.plan.framework_override.as_deref(), Some("REACT"));
        let validation = parsed.plan.final_validation.expect("final validation");
        assert_eq!(validation.criteria, vec!["no unhandled errors"]);
    }

    #[test]
    fn repetition_expands_to_three_identical_steps() {
        let parsed = parse(">>research * 3 topic:'x'").expect("parse");
        assert_eq!(parsed.plan.total_steps(), 3);
        for step in &parsed.plan.steps {
            assert_eq!(step.prompt_id, "research");
            assert_eq!(step.raw_args, "topic:'x'");
        }
        assert_eq!(
            parsed.operators.repetition.map(|r| r.count),
            Some(3)
        );
    }

    #[test]
    fn parse_is_idempotent() {
        let command = r#"@CAGEERF >>research topic:'rust' --> summary ::"cites sources""#;
        let first = parse(command).expect("parse");
        let second = parse(command).expect("parse");
        assert_eq!(first, second);
    }

    #[test]
    fn envelope_unwraps_two_levels() {
        let inner = serde_json::json!({ "command": ">>debug issue:'leak'" }).to_string();
        let outer = serde_json::json!({ "command": inner }).to_string();
        let parsed = parse(&outer).expect("parse");
        assert_eq!(parsed.plan.steps[0].prompt_id, "debug");
    }

    #[test]
    fn malformed_envelope_is_rejected() {
        let err = parse(r#"{"command": unterminated"#).expect_err("should reject");
        assert!(matches!(
            err,
            EngineError::Parse(ParseError::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn empty_input_is_rejected() {
        assert!(matches!(
            parse("   "),
            Err(EngineError::Parse(ParseError::EmptyCommand))
        ));
    }

    #[test]
    fn lone_gt_prefix_is_a_distinct_defect() {
        let err = parse(">research topic:'x'").expect_err("should reject");
        assert!(matches!(
            err,
            EngineError::Parse(ParseError::PartiallyUnescapedPrefix { .. })
        ));
    }

    #[test]
    fn bare_token_resolves_when_no_operators_present() {
        let parsed = parse("summary").expect("parse");
        assert_eq!(parsed.plan.steps[0].prompt_id, "summary");
        assert_eq!(parsed.plan.execution_type, ExecutionType::Single);
    }

    #[test]
    fn unknown_prompt_carries_ranked_suggestions() {
        let err = parse(">>resarch topic:'x'").expect_err("should reject");
        let EngineError::UnknownPrompt(unknown) = err else {
            panic!("expected unknown prompt error");
        };
        assert_eq!(unknown.name, "resarch");
        assert!(unknown.suggestions.contains(&"research".to_string()));
        assert!(unknown.suggestions.len() <= 3);
    }

    #[test]
    fn unknown_prompt_far_from_everything_has_no_suggestions() {
        let err = parse(">>zzzzzzzz").expect_err("should reject");
        let EngineError::UnknownPrompt(unknown) = err else {
            panic!("expected unknown prompt error");
        };
        assert!(unknown.suggestions.is_empty());
    }

    #[test]
    fn missing_required_argument_is_invalid() {
        let err = parse(">>research").expect_err("should reject");
        assert!(matches!(err, EngineError::InvalidArgument(_)));
    }

    #[test]
    fn slash_prefix_is_accepted() {
        let parsed = parse("/summary").expect("parse");
        assert_eq!(parsed.plan.steps[0].prompt_id, "summary");
    }
}
