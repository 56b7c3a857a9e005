//! Per-step rendering: one rendered instruction text per external round-trip.
//!
//! Given the current step and any stored prior result, rendering produces the
//! target prompt's system text, its user-message template with variables
//! substituted, and a call-to-action for the next step (or completion). The
//! prior result flows through the reserved carry-forward variable
//! [`CARRY_FORWARD_VAR`] — an explicit, declared contract, never inferred
//! from content.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde::Serialize;
use tracing::warn;

use crate::catalog::PromptCatalog;
use crate::core::gates::GateBundle;
use crate::core::plan::{ExecutionPlan, ExecutionStep};
use crate::core::session::ChainSession;
use crate::core::tokenizer;
use crate::framework::FrameworkDefinition;

/// Reserved template variable that carries the previous step's output.
pub const CARRY_FORWARD_VAR: &str = "previous_message";

const STEP_TEMPLATE: &str = include_str!("templates/step.md");
const GATE_REVIEW_TEMPLATE: &str = include_str!("templates/gate_review.md");

/// Everything one step render needs.
#[derive(Debug, Clone)]
pub struct StepContext<'a> {
    pub plan: &'a ExecutionPlan,
    pub step_number: u32,
    pub prior_result: Option<&'a str>,
    pub bundle: &'a GateBundle,
    pub retry_reason: Option<&'a str>,
    pub framework: Option<&'a FrameworkDefinition>,
    pub session_id: Option<&'a str>,
}

/// Inputs to a gate-review round-trip render.
#[derive(Debug, Clone)]
pub struct GateReviewContext<'a> {
    pub session_id: &'a str,
    pub step_number: u32,
    pub criteria: Vec<String>,
    pub submitted: &'a str,
    pub retries_left: u32,
}

#[derive(Debug, Serialize)]
struct FrameworkVars<'a> {
    display_name: &'a str,
    preamble: &'a str,
}

#[derive(Debug, Serialize)]
struct GateVars {
    id: String,
    text: String,
}

pub struct StepRenderer<'a> {
    catalog: &'a PromptCatalog,
    env: Environment<'static>,
}

impl<'a> StepRenderer<'a> {
    pub fn new(catalog: &'a PromptCatalog) -> Self {
        let mut env = Environment::new();
        env.add_template("step", STEP_TEMPLATE)
            .expect("step template should be valid");
        env.add_template("gate_review", GATE_REVIEW_TEMPLATE)
            .expect("gate review template should be valid");
        Self { catalog, env }
    }

    /// Render one step of a plan.
    pub fn render_step(&self, ctx: &StepContext) -> Result<String> {
        let step = ctx
            .plan
            .step(ctx.step_number)
            .with_context(|| format!("plan has no step {}", ctx.step_number))?;

        let previous = match ctx.prior_result {
            Some(text) => text.to_string(),
            None if ctx.step_number > 1 => format!(
                "[the output of step {} will be carried forward here once it is submitted]",
                ctx.step_number - 1
            ),
            None => String::new(),
        };

        let (system_message, body) = self.render_body(step, &previous);

        let mut validation_criteria = step.gate_criteria.clone();
        if ctx.plan.is_final_step(ctx.step_number)
            && let Some(validation) = &ctx.plan.final_validation
        {
            for criterion in &validation.criteria {
                if !validation_criteria
                    .iter()
                    .any(|c| c.eq_ignore_ascii_case(criterion))
                {
                    validation_criteria.push(criterion.clone());
                }
            }
        }

        let guidance: Vec<GateVars> = ctx.bundle.guidance().map(gate_vars).collect();
        let pending_gates: Vec<GateVars> =
            ctx.bundle.blocking_validations().map(gate_vars).collect();

        let call_to_action = self.call_to_action(ctx, !validation_criteria.is_empty());

        let template = self.env.get_template("step")?;
        let rendered = template.render(context! {
            system_message => system_message,
            framework => ctx.framework.map(|f| FrameworkVars {
                display_name: &f.display_name,
                preamble: &f.preamble,
            }),
            step_number => ctx.step_number,
            total_steps => ctx.plan.total_steps(),
            body => body,
            validation_criteria => validation_criteria,
            pending_gates => pending_gates,
            retry_reason => ctx.retry_reason,
            guidance => guidance,
            condition => ctx.plan.condition.as_ref(),
            style => ctx.plan.style.as_deref(),
            call_to_action => call_to_action,
        })?;
        Ok(rendered)
    }

    /// Render every parallel branch into one interaction.
    pub fn render_parallel(
        &self,
        plan: &ExecutionPlan,
        bundle: &GateBundle,
        framework: Option<&FrameworkDefinition>,
    ) -> Result<String> {
        let mut sections = Vec::with_capacity(plan.steps.len() + 2);

        if let Some(framework) = framework {
            sections.push(format!(
                "<methodology name=\"{}\">\n{}\n</methodology>",
                framework.display_name, framework.preamble
            ));
        }

        for step in &plan.steps {
            let (system_message, body) = self.render_body(step, "");
            let mut section = format!(
                "<branch number=\"{}\" of=\"{}\">\n",
                step.step_number,
                plan.total_steps()
            );
            if let Some(system) = system_message {
                section.push_str(&system);
                section.push_str("\n\n");
            }
            section.push_str(&body);
            section.push_str("\n</branch>");
            sections.push(section);
        }

        let guidance: Vec<String> = bundle
            .guidance()
            .map(|g| format!("- {}: {}", g.id, g.criteria.join(" ")))
            .collect();
        if !guidance.is_empty() {
            sections.push(format!("<guidance>\n{}\n</guidance>", guidance.join("\n")));
        }

        sections.push(
            "Execute every branch in this same response, labeling each by its branch number."
                .to_string(),
        );
        Ok(sections.join("\n\n"))
    }

    /// Render the gate-review round-trip for a held step result.
    pub fn render_gate_review(&self, ctx: &GateReviewContext) -> Result<String> {
        let template = self.env.get_template("gate_review")?;
        let rendered = template.render(context! {
            session_id => ctx.session_id,
            step_number => ctx.step_number,
            criteria => ctx.criteria,
            submitted => ctx.submitted,
            retries_left => ctx.retries_left,
        })?;
        Ok(rendered)
    }

    /// Escalation text once gate retries are exhausted.
    pub fn render_escalation(&self, session_id: &str, step_number: u32, reason: &str) -> String {
        format!(
            "Gate review for step {step_number} of session '{session_id}' failed with no retries \
             left: {reason}\n\nDecide how to proceed by resubmitting with gate_action set to one \
             of: retry (fresh attempt budget), skip (advance past the gate), abort (terminate the \
             chain)."
        )
    }

    /// Completion summary for a finished chain.
    pub fn render_completion(&self, session: &ChainSession) -> String {
        let steps: Vec<String> = session
            .blueprint
            .steps
            .iter()
            .map(|step| {
                let done = session.step_results.contains_key(&step.step_number);
                format!(
                    "{}. {} {}",
                    step.step_number,
                    step.prompt_id,
                    if done { "(done)" } else { "(skipped)" }
                )
            })
            .collect();
        format!(
            "Chain '{}' is complete.\n\n{}\n\nNo further round-trips are expected; starting over \
             requires a new command.",
            session.session_id,
            steps.join("\n")
        )
    }

    /// Render a step body: system text plus substituted user template.
    ///
    /// An unresolved prompt id degrades to an "execute literally" instruction
    /// with a logged warning; it never aborts the plan.
    fn render_body(&self, step: &ExecutionStep, previous: &str) -> (Option<String>, String) {
        let Some(def) = self.catalog.get(&step.prompt_id) else {
            warn!(prompt_id = %step.prompt_id, "step prompt not in catalog; degrading to literal execution");
            let mut body = format!(
                "No prompt named '{}' is available. Execute the following literally:",
                step.prompt_id
            );
            body.push_str("\n\n");
            body.push_str(if step.raw_args.is_empty() {
                &step.prompt_id
            } else {
                &step.raw_args
            });
            return (None, body);
        };

        let mut vars: BTreeMap<String, String> =
            match tokenizer::parse_arguments(&step.raw_args, &def.arguments) {
                Ok(vars) => vars,
                Err(err) => {
                    // The parser validated these at parse time; a stored
                    // blueprint may still predate a catalog change.
                    warn!(prompt_id = %step.prompt_id, %err, "argument revalidation failed; substituting loosely");
                    tokenizer::tokenize(&step.raw_args)
                        .into_iter()
                        .enumerate()
                        .map(|(i, token)| (token.name.unwrap_or_else(|| format!("arg{i}")), token.value))
                        .collect()
                }
            };
        vars.insert(CARRY_FORWARD_VAR.to_string(), previous.to_string());

        let body = match self.env.render_str(&def.user_message_template, &vars) {
            Ok(body) => body,
            Err(err) => {
                warn!(prompt_id = %step.prompt_id, %err, "user template failed to render; using raw template");
                def.user_message_template.clone()
            }
        };
        (def.system_message.clone(), body)
    }

    fn call_to_action(&self, ctx: &StepContext, gated: bool) -> String {
        let total = ctx.plan.total_steps();
        if total == 1 {
            return if gated {
                "Execute the instructions above, then self-review the output against the \
                 validation criteria before returning it."
                    .to_string()
            } else {
                "Execute the instructions above.".to_string()
            };
        }

        let resume = ctx
            .session_id
            .map(|id| format!(" Resume with chain_id '{id}' and the step's output as user_response."))
            .unwrap_or_default();

        if ctx.plan.is_final_step(ctx.step_number) {
            let mut text = format!(
                "This is the final step ({} of {}). Returning its output completes the chain.",
                ctx.step_number, total
            );
            if gated {
                text.push_str(" The output is held for gate review before completion.");
            }
            text.push_str(&resume);
            text
        } else {
            let mut text = format!(
                "Execute step {} now and return only this step's output; it becomes {{{{ {} }}}} \
                 for step {} of {}.",
                ctx.step_number,
                CARRY_FORWARD_VAR,
                ctx.step_number + 1,
                total
            );
            if gated {
                text.push_str(" The output is held for gate review before the chain advances.");
            }
            text.push_str(&resume);
            text
        }
    }
}

fn gate_vars(gate: &crate::core::gates::GateDefinition) -> GateVars {
    GateVars {
        id: gate.id.clone(),
        text: gate.criteria.join(" "),
    }
}
