//! Chain session records and their pure state transitions.
//!
//! A session advances one step per external round-trip. All transitions here
//! are deterministic functions over the record; persistence and locking live
//! in `io` and the engine.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::core::plan::{ExecutionPlan, validate_plan};
use crate::core::verdict::GateVerdict;
use crate::error::SessionStateError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Created,
    AwaitingStepResult,
    AwaitingGateVerdict,
    Completed,
    Expired,
    Aborted,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Expired | Self::Aborted)
    }
}

/// Compose `<originating promptId>#<run>`.
pub fn session_id(prompt_id: &str, run: u32) -> String {
    format!("{prompt_id}#{run}")
}

/// Split a session id back into prompt id and run number.
pub fn parse_session_id(id: &str) -> Option<(&str, u32)> {
    let (prompt_id, run) = id.rsplit_once('#')?;
    if prompt_id.is_empty() {
        return None;
    }
    Some((prompt_id, run.parse().ok()?))
}

/// Explicit decision after gate retries are exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateAction {
    Retry,
    Skip,
    Abort,
}

impl std::str::FromStr for GateAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "retry" => Ok(Self::Retry),
            "skip" => Ok(Self::Skip),
            "abort" => Ok(Self::Abort),
            other => Err(format!("unknown gate action '{other}' (retry|skip|abort)")),
        }
    }
}

/// What the caller should be shown next after an advance.
///
/// When the session ends up in `awaiting_gate_verdict`, `NextStep` names the
/// gated step whose result is now held for review.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepAdvance {
    NextStep { step_number: u32 },
    Completed,
}

/// Outcome of applying a gate verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerdictOutcome {
    Advance(StepAdvance),
    /// Re-render the same step with the failure reason; retries remain.
    RetryStep {
        step_number: u32,
        retries_left: u32,
        reason: String,
    },
    /// Retries exhausted: an explicit retry|skip|abort decision is required.
    Escalate { step_number: u32, reason: String },
}

/// One persisted chain run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainSession {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub state: SessionState,
    /// 1-based; while awaiting a gate verdict it stays on the gated step.
    pub current_step_index: u32,
    pub step_results: BTreeMap<u32, String>,
    /// Frozen copy of the plan this run executes.
    pub blueprint: ExecutionPlan,
    /// Framework overrides active for this chain, innermost last.
    #[serde(default)]
    pub framework_override_stack: Vec<String>,
    #[serde(default)]
    pub gate_retries_used: u32,
    #[serde(default)]
    pub pending_escalation: bool,
}

impl ChainSession {
    pub fn new(
        session_id: String,
        blueprint: ExecutionPlan,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        let mut framework_override_stack = Vec::new();
        if let Some(framework) = &blueprint.framework_override {
            framework_override_stack.push(framework.clone());
        }
        Self {
            session_id,
            created_at: now,
            expires_at: now + ttl,
            state: SessionState::Created,
            current_step_index: 1,
            step_results: BTreeMap::new(),
            blueprint,
            framework_override_stack,
            gate_retries_used: 0,
            pending_escalation: false,
        }
    }

    /// `created` advances to `awaiting_step_result` at step 1 immediately.
    pub fn begin(&mut self) {
        if self.state == SessionState::Created {
            self.state = SessionState::AwaitingStepResult;
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn total_steps(&self) -> u32 {
        self.blueprint.total_steps()
    }

    /// Whether the given step holds its result for review before advancing.
    pub fn step_is_gated(&self, step_number: u32) -> bool {
        let Some(step) = self.blueprint.step(step_number) else {
            return false;
        };
        if !step.gate_criteria.is_empty() {
            return true;
        }
        self.blueprint.is_final_step(step_number) && self.blueprint.final_validation.is_some()
    }

    /// Store the assistant's output for the current step and advance.
    ///
    /// If the step is gated the session holds at this step awaiting a
    /// verdict; a later FAIL then re-renders it without the index moving.
    /// `externally_gated` lets the caller add gates the blueprint cannot see
    /// (temporary-tier gates resolved per execution).
    pub fn submit_step_result(
        &mut self,
        text: String,
        externally_gated: bool,
    ) -> Result<StepAdvance, SessionStateError> {
        self.ensure_live()?;
        if self.state != SessionState::AwaitingStepResult {
            return Err(SessionStateError::Unknown {
                session_id: self.session_id.clone(),
            });
        }

        let step = self.current_step_index;
        self.step_results.insert(step, text);

        if self.step_is_gated(step) || externally_gated {
            self.state = SessionState::AwaitingGateVerdict;
            return Ok(StepAdvance::NextStep { step_number: step });
        }

        Ok(self.advance_past(step))
    }

    /// Apply a parsed verdict while awaiting one.
    pub fn submit_gate_verdict(
        &mut self,
        verdict: &GateVerdict,
        max_retries: u32,
    ) -> Result<VerdictOutcome, SessionStateError> {
        self.ensure_live()?;
        if self.state != SessionState::AwaitingGateVerdict {
            return Err(SessionStateError::Unknown {
                session_id: self.session_id.clone(),
            });
        }

        let step = self.current_step_index;
        if verdict.passed {
            self.gate_retries_used = 0;
            self.pending_escalation = false;
            return Ok(VerdictOutcome::Advance(self.advance_past(step)));
        }

        if self.gate_retries_used < max_retries {
            self.gate_retries_used += 1;
            self.state = SessionState::AwaitingStepResult;
            return Ok(VerdictOutcome::RetryStep {
                step_number: step,
                retries_left: max_retries - self.gate_retries_used,
                reason: verdict.rationale.clone(),
            });
        }

        self.pending_escalation = true;
        Ok(VerdictOutcome::Escalate {
            step_number: step,
            reason: verdict.rationale.clone(),
        })
    }

    /// Apply an explicit escalation decision.
    pub fn apply_gate_action(
        &mut self,
        action: GateAction,
    ) -> Result<VerdictOutcome, SessionStateError> {
        self.ensure_live()?;
        if !self.pending_escalation {
            return Err(SessionStateError::Unknown {
                session_id: self.session_id.clone(),
            });
        }

        let step = self.current_step_index;
        self.pending_escalation = false;
        match action {
            GateAction::Retry => {
                // A fresh retry budget; the operator asked for another round.
                self.gate_retries_used = 0;
                self.state = SessionState::AwaitingStepResult;
                Ok(VerdictOutcome::RetryStep {
                    step_number: step,
                    retries_left: 0,
                    reason: "operator requested another attempt".to_string(),
                })
            }
            GateAction::Skip => {
                self.gate_retries_used = 0;
                Ok(VerdictOutcome::Advance(self.advance_past(step)))
            }
            GateAction::Abort => {
                self.state = SessionState::Aborted;
                Ok(VerdictOutcome::Advance(StepAdvance::Completed))
            }
        }
    }

    pub fn mark_expired(&mut self) {
        self.state = SessionState::Expired;
    }

    /// Terminal abort (`force_restart` over a live run, or operator abort).
    pub fn abort(&mut self) {
        self.state = SessionState::Aborted;
    }

    fn advance_past(&mut self, step: u32) -> StepAdvance {
        if self.blueprint.is_final_step(step) {
            self.state = SessionState::Completed;
            return StepAdvance::Completed;
        }
        self.current_step_index = step + 1;
        self.state = SessionState::AwaitingStepResult;
        StepAdvance::NextStep {
            step_number: self.current_step_index,
        }
    }

    fn ensure_live(&self) -> Result<(), SessionStateError> {
        match self.state {
            SessionState::Completed | SessionState::Aborted => {
                Err(SessionStateError::AlreadyFinished {
                    session_id: self.session_id.clone(),
                })
            }
            SessionState::Expired => Err(SessionStateError::Expired {
                session_id: self.session_id.clone(),
            }),
            _ => Ok(()),
        }
    }
}

/// Semantic invariants not expressible via the session schema:
/// - session id parses as `<promptId>#<run>`
/// - blueprint invariants hold
/// - `current_step_index` within 1..=steps
/// - `current_step_index <= step_results.len() + 1`
/// - stored results reference real steps
pub fn validate_session_invariants(session: &ChainSession) -> Vec<String> {
    let mut errors = Vec::new();

    if parse_session_id(&session.session_id).is_none() {
        errors.push(format!(
            "session id '{}' is not <promptId>#<run>",
            session.session_id
        ));
    }

    errors.extend(validate_plan(&session.blueprint));

    let total = session.blueprint.total_steps();
    if session.current_step_index == 0 || session.current_step_index > total.max(1) {
        errors.push(format!(
            "current_step_index {} out of range 1..={}",
            session.current_step_index, total
        ));
    }

    if session.current_step_index as usize > session.step_results.len() + 1 {
        errors.push(format!(
            "current_step_index {} ahead of stored results ({})",
            session.current_step_index,
            session.step_results.len()
        ));
    }

    for step in session.step_results.keys() {
        if *step == 0 || *step > total {
            errors.push(format!("step result {} references no step", step));
        }
    }

    errors
}
