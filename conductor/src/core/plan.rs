//! Execution plans: the deterministic contract between the parser, the
//! renderer, and the session state machine.

use serde::{Deserialize, Serialize};

use crate::core::operators::{ChainEntry, OperatorSet};

/// One renderable step of a plan. Step numbers are 1-based and contiguous.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionStep {
    pub step_number: u32,
    pub prompt_id: String,
    pub raw_args: String,
    /// Gate criteria surfaced as an explicit instruction on this step's
    /// rendered content (from a gate operator declared alongside a chain).
    #[serde(default)]
    pub gate_criteria: Vec<String>,
}

/// Chain-ending validation the assistant must self-report against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalValidation {
    pub criteria: Vec<String>,
    /// The deprecated `=` spelling produced these criteria.
    #[serde(default)]
    pub legacy: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionType {
    Single,
    Chain,
    Parallel,
}

/// Assistant-evaluated conditional carried through to rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanCondition {
    pub condition: String,
    pub branch: String,
}

/// Ordered, resolved execution plan for one command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub steps: Vec<ExecutionStep>,
    pub execution_type: ExecutionType,
    /// Normalized framework name for lookup.
    pub framework_override: Option<String>,
    /// Framework name as the caller wrote it.
    pub framework_display: Option<String>,
    pub final_validation: Option<FinalValidation>,
    pub requires_session_state: bool,
    #[serde(default)]
    pub condition: Option<PlanCondition>,
    #[serde(default)]
    pub style: Option<String>,
    /// The first step's prompt id; seeds session ids and the category tier.
    pub origin_prompt_id: String,
}

impl ExecutionPlan {
    pub fn total_steps(&self) -> u32 {
        self.steps.len() as u32
    }

    pub fn step(&self, step_number: u32) -> Option<&ExecutionStep> {
        self.steps.get(step_number.checked_sub(1)? as usize)
    }

    pub fn is_final_step(&self, step_number: u32) -> bool {
        step_number == self.total_steps()
    }
}

/// One resolved invocation: catalog id plus its raw argument text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedInvocation {
    pub prompt_id: String,
    pub raw_args: String,
}

impl ResolvedInvocation {
    pub fn new(prompt_id: impl Into<String>, entry: &ChainEntry) -> Self {
        Self {
            prompt_id: prompt_id.into(),
            raw_args: entry.raw_args.clone(),
        }
    }
}

/// Assemble a plan from detected operators and resolved invocations.
///
/// A chain yields one step per entry in source order; a framework operator
/// becomes the override and contributes no step; a gate operator with no
/// chain becomes `final_validation`, while with a chain its criteria are
/// additionally attached to the final step so earlier-declared criteria are
/// never dropped by later-parsed operators.
pub fn build_plan(set: &OperatorSet, invocations: Vec<ResolvedInvocation>) -> ExecutionPlan {
    debug_assert!(!invocations.is_empty(), "parser guarantees >= 1 invocation");

    let execution_type = if set.chain.is_some() || invocations.len() > 1 && set.parallel.is_none() {
        ExecutionType::Chain
    } else if set.parallel.is_some() {
        ExecutionType::Parallel
    } else {
        ExecutionType::Single
    };

    let mut steps: Vec<ExecutionStep> = invocations
        .iter()
        .enumerate()
        .map(|(index, invocation)| ExecutionStep {
            step_number: index as u32 + 1,
            prompt_id: invocation.prompt_id.clone(),
            raw_args: invocation.raw_args.clone(),
            gate_criteria: Vec::new(),
        })
        .collect();

    let final_validation = set.gate.as_ref().map(|gate| FinalValidation {
        criteria: gate.criteria.clone(),
        legacy: gate.legacy,
    });

    if let (Some(gate), true) = (&set.gate, execution_type == ExecutionType::Chain) {
        if let Some(last) = steps.last_mut() {
            last.gate_criteria = gate.criteria.clone();
        }
    }

    let requires_session_state = execution_type == ExecutionType::Chain && steps.len() > 1;
    let origin_prompt_id = steps[0].prompt_id.clone();

    ExecutionPlan {
        steps,
        execution_type,
        framework_override: set.framework.as_ref().map(|f| f.lookup_name.clone()),
        framework_display: set.framework.as_ref().map(|f| f.display_name.clone()),
        final_validation,
        requires_session_state,
        condition: set.conditional.as_ref().map(|c| PlanCondition {
            condition: c.condition.clone(),
            branch: c.branch.clone(),
        }),
        style: set.style.as_ref().map(|s| s.name.clone()),
        origin_prompt_id,
    }
}

/// Plan invariants not enforced by construction (used on deserialized
/// blueprints): at least one step, 1-based contiguous numbering.
pub fn validate_plan(plan: &ExecutionPlan) -> Vec<String> {
    let mut errors = Vec::new();
    if plan.steps.is_empty() {
        errors.push("plan has no steps".to_string());
    }
    for (index, step) in plan.steps.iter().enumerate() {
        let expected = index as u32 + 1;
        if step.step_number != expected {
            errors.push(format!(
                "step numbering not contiguous: expected {} got {}",
                expected, step.step_number
            ));
        }
    }
    if let Some(first) = plan.steps.first()
        && first.prompt_id != plan.origin_prompt_id
    {
        errors.push(format!(
            "origin prompt '{}' does not match first step '{}'",
            plan.origin_prompt_id, first.prompt_id
        ));
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::operators::{ChainOperator, FrameworkOperator, GateOperator};

    fn invocation(id: &str) -> ResolvedInvocation {
        ResolvedInvocation {
            prompt_id: id.to_string(),
            raw_args: String::new(),
        }
    }

    #[test]
    fn single_invocation_needs_no_session() {
        let plan = build_plan(&OperatorSet::default(), vec![invocation("debug")]);
        assert_eq!(plan.execution_type, ExecutionType::Single);
        assert!(!plan.requires_session_state);
        assert_eq!(plan.total_steps(), 1);
    }

    #[test]
    fn chain_yields_contiguous_steps_and_session_state() {
        let set = OperatorSet {
            chain: Some(ChainOperator {
                entries: Vec::new(),
            }),
            ..OperatorSet::default()
        };
        let plan = build_plan(&set, vec![invocation("a"), invocation("b"), invocation("c")]);
        assert!(plan.requires_session_state);
        assert_eq!(
            plan.steps.iter().map(|s| s.step_number).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert_eq!(plan.origin_prompt_id, "a");
        assert!(validate_plan(&plan).is_empty());
    }

    #[test]
    fn framework_contributes_no_step() {
        let set = OperatorSet {
            framework: Some(FrameworkOperator {
                lookup_name: "REACT".to_string(),
                display_name: "ReACT".to_string(),
            }),
            ..OperatorSet::default()
        };
        let plan = build_plan(&set, vec![invocation("debug")]);
        assert_eq!(plan.total_steps(), 1);
        assert_eq!(plan.framework_override.as_deref(), Some("REACT"));
        assert_eq!(plan.framework_display.as_deref(), Some("ReACT"));
    }

    #[test]
    fn gate_without_chain_is_final_validation_only() {
        let set = OperatorSet {
            gate: Some(GateOperator {
                criteria: vec!["no unhandled errors".to_string()],
                legacy: false,
            }),
            ..OperatorSet::default()
        };
        let plan = build_plan(&set, vec![invocation("debug")]);
        let validation = plan.final_validation.expect("final validation");
        assert_eq!(validation.criteria, vec!["no unhandled errors"]);
        assert!(plan.steps[0].gate_criteria.is_empty());
    }

    #[test]
    fn gate_with_chain_also_attaches_to_final_step() {
        let set = OperatorSet {
            chain: Some(ChainOperator {
                entries: Vec::new(),
            }),
            gate: Some(GateOperator {
                criteria: vec!["has citations".to_string()],
                legacy: false,
            }),
            ..OperatorSet::default()
        };
        let plan = build_plan(&set, vec![invocation("a"), invocation("b")]);
        assert!(plan.final_validation.is_some());
        assert!(plan.steps[0].gate_criteria.is_empty());
        assert_eq!(plan.steps[1].gate_criteria, vec!["has citations"]);
    }

    #[test]
    fn validate_plan_flags_bad_numbering() {
        let mut plan = build_plan(&OperatorSet::default(), vec![invocation("a")]);
        plan.steps[0].step_number = 7;
        let errors = validate_plan(&plan);
        assert!(errors.iter().any(|e| e.contains("not contiguous")));
    }
}
