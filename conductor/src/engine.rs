//! The request-per-call execution engine.
//!
//! Each inbound call is one parse→resolve→render cycle. Reasoning happens
//! externally between round-trips; this engine only renders instructions,
//! tracks chain sessions (serialized per session id), resolves gate bundles,
//! and evaluates shell-check gates by exit code.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration as StdDuration;

use chrono::{Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::catalog::PromptCatalog;
use crate::core::gates::{
    GateBundle, GateCatalog, GateDefinition, GateTier, TierInputs, category_gates, fallback_gates,
    resolve_bundle,
};
use crate::core::plan::{ExecutionPlan, ExecutionType};
use crate::core::session::{
    ChainSession, GateAction, SessionState, StepAdvance, VerdictOutcome, parse_session_id,
    session_id,
};
use crate::core::verdict::{GateVerdict, VerdictSource, parse_verdict};
use crate::error::{EngineError, SessionStateError};
use crate::framework::{FrameworkDefinition, FrameworkManager};
use crate::io::config::{EngineConfig, load_config};
use crate::io::gate_store::{GateOwner, TemporaryGate, TemporaryGateRegistry};
use crate::io::session_store::{SessionStore, next_run_number, open_default_store};
use crate::io::shell::{ShellCheckOutcome, ShellCheckRequest, ShellVerifier, SystemShellVerifier};
use crate::io::sweep::{self, SweepReport};
use crate::parser::CommandParser;
use crate::render::{GateReviewContext, StepContext, StepRenderer};

/// Inbound call fields, shaped for the transport layer to deserialize into.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionRequest {
    #[serde(default)]
    pub command: Option<String>,
    /// Resume token, `<promptId>#<run>`.
    #[serde(default)]
    pub chain_id: Option<String>,
    /// Prior step output, for resume.
    #[serde(default)]
    pub user_response: Option<String>,
    /// One of the accepted PASS/FAIL phrasings, rationale required.
    #[serde(default)]
    pub gate_verdict: Option<String>,
    /// `retry|skip|abort`, only while an escalation is pending.
    #[serde(default)]
    pub gate_action: Option<String>,
    /// Inline gate specs applied at temporary tier.
    #[serde(default)]
    pub gates: Vec<InlineGateSpec>,
    /// Mutually exclusive with `chain_id`.
    #[serde(default)]
    pub force_restart: bool,
}

impl ExecutionRequest {
    pub fn command(command: &str) -> Self {
        Self {
            command: Some(command.to_string()),
            ..Self::default()
        }
    }

    pub fn resume(chain_id: &str, user_response: &str) -> Self {
        Self {
            chain_id: Some(chain_id.to_string()),
            user_response: Some(user_response.to_string()),
            ..Self::default()
        }
    }

    pub fn verdict(chain_id: &str, verdict: &str) -> Self {
        Self {
            chain_id: Some(chain_id.to_string()),
            gate_verdict: Some(verdict.to_string()),
            ..Self::default()
        }
    }
}

/// Inline gate specs: a bare id activates a known gate, a quick check
/// becomes a one-criterion validation gate, a full object is taken as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InlineGateSpec {
    Full(GateDefinition),
    QuickCheck { name: String, description: String },
    Id(String),
}

/// Structured metadata returned only for chain executions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainMetadata {
    pub execution_id: String,
    pub execution_type: ExecutionType,
    pub framework_used: Option<String>,
    pub steps_executed: u32,
    pub session_id: String,
}

/// One round-trip's outbound payload.
#[derive(Debug, Clone, Serialize)]
pub struct EngineReply {
    /// Rendered instruction text for the assistant.
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain: Option<ChainMetadata>,
}

/// Composition root over catalog, frameworks, stores and the shell verifier.
pub struct Engine {
    catalog: PromptCatalog,
    frameworks: FrameworkManager,
    gate_catalog: GateCatalog,
    store: Arc<dyn SessionStore>,
    gates: Arc<TemporaryGateRegistry>,
    shell: Box<dyn ShellVerifier>,
    config: EngineConfig,
    workdir: PathBuf,
    /// Per-session serialization: racing round-trips on one id queue here.
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Engine {
    pub fn new(
        catalog: PromptCatalog,
        store: Arc<dyn SessionStore>,
        gates: Arc<TemporaryGateRegistry>,
        shell: Box<dyn ShellVerifier>,
        config: EngineConfig,
        workdir: PathBuf,
    ) -> Self {
        Self {
            catalog,
            frameworks: FrameworkManager::with_builtins(),
            gate_catalog: GateCatalog::with_builtins(),
            store,
            gates,
            shell,
            config,
            workdir,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Open an engine over a state directory (sessions, gate registry,
    /// config), with the system shell verifier.
    pub fn open(state_dir: &Path, catalog: PromptCatalog) -> anyhow::Result<Self> {
        let config = load_config(&state_dir.join("config.toml"))?;
        let store = open_default_store(state_dir)?;
        let gates = TemporaryGateRegistry::open(state_dir.join("temporary_gates.json"))?;
        let workdir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Ok(Self::new(
            catalog,
            Arc::new(store),
            Arc::new(gates),
            Box::new(SystemShellVerifier),
            config,
            workdir,
        ))
    }

    pub fn frameworks(&self) -> &FrameworkManager {
        &self.frameworks
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run one sweep pass now.
    pub fn sweep(&self) -> Result<SweepReport, EngineError> {
        Ok(sweep::sweep_once(
            self.store.as_ref(),
            &self.gates,
            Utc::now(),
        )?)
    }

    /// Spawn the low-priority periodic sweeper.
    pub fn start_sweeper(&self) -> thread::JoinHandle<()> {
        sweep::spawn_sweeper(
            Arc::clone(&self.store),
            Arc::clone(&self.gates),
            StdDuration::from_secs(self.config.sweep_interval_secs),
        )
    }

    /// Handle one inbound call.
    pub fn handle(&self, request: &ExecutionRequest) -> Result<EngineReply, EngineError> {
        let chain_id = request
            .chain_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty());

        // Conflicts are rejected before any side effect.
        if request.force_restart && chain_id.is_some() {
            return Err(EngineError::ConflictingParameters(
                "force_restart cannot be combined with chain_id; drop one of them".to_string(),
            ));
        }

        // Lazy sweep so TTLs hold even when no background sweeper runs.
        if let Err(err) = sweep::sweep_once(self.store.as_ref(), &self.gates, Utc::now()) {
            warn!(%err, "lazy expiry sweep failed");
        }

        match chain_id {
            Some(session_id) => self.resume(session_id, request),
            None => {
                let command = request.command.as_deref().unwrap_or_default();
                self.start(command, request)
            }
        }
    }

    fn start(&self, command: &str, request: &ExecutionRequest) -> Result<EngineReply, EngineError> {
        let parsed = CommandParser::new(&self.catalog).parse(command)?;
        let plan = parsed.plan;
        let execution_id = Uuid::new_v4().to_string();

        if request.force_restart {
            self.abort_live_runs(&plan.origin_prompt_id)?;
        }

        match plan.execution_type {
            ExecutionType::Parallel => self.start_parallel(plan, request, &execution_id),
            ExecutionType::Chain => self.start_chain(plan, request, &execution_id),
            ExecutionType::Single => self.start_single(plan, request, &execution_id),
        }
    }

    fn start_single(
        &self,
        plan: ExecutionPlan,
        request: &ExecutionRequest,
        execution_id: &str,
    ) -> Result<EngineReply, EngineError> {
        self.register_inline_gates(
            &request.gates,
            GateOwner::Execution {
                execution_id: execution_id.to_string(),
            },
        )?;
        let bundle = self.resolve_gates(&plan, 1, None, Some(execution_id));
        let content = self.render_with_framework(&plan, |framework| {
            StepRenderer::new(&self.catalog)
                .render_step(&StepContext {
                    plan: &plan,
                    step_number: 1,
                    prior_result: None,
                    bundle: &bundle,
                    retry_reason: None,
                    framework,
                    session_id: None,
                })
                .map_err(EngineError::from)
        })?;
        Ok(EngineReply {
            content,
            chain: None,
        })
    }

    fn start_parallel(
        &self,
        plan: ExecutionPlan,
        request: &ExecutionRequest,
        execution_id: &str,
    ) -> Result<EngineReply, EngineError> {
        self.register_inline_gates(
            &request.gates,
            GateOwner::Execution {
                execution_id: execution_id.to_string(),
            },
        )?;
        let bundle = self.resolve_gates(&plan, 1, None, Some(execution_id));
        let content = self.render_with_framework(&plan, |framework| {
            StepRenderer::new(&self.catalog)
                .render_parallel(&plan, &bundle, framework)
                .map_err(EngineError::from)
        })?;
        Ok(EngineReply {
            content,
            chain: None,
        })
    }

    fn start_chain(
        &self,
        plan: ExecutionPlan,
        request: &ExecutionRequest,
        execution_id: &str,
    ) -> Result<EngineReply, EngineError> {
        let run = next_run_number(self.store.as_ref(), &plan.origin_prompt_id)?;
        let sid = session_id(&plan.origin_prompt_id, run);
        self.register_inline_gates(
            &request.gates,
            GateOwner::Chain {
                session_id: sid.clone(),
            },
        )?;

        let ttl = ChronoDuration::hours(self.config.session_ttl_hours as i64);
        let mut session = ChainSession::new(sid, plan, Utc::now(), ttl);
        session.begin();

        let content = self.render_session_step(&session, None)?;
        self.store.save(&session)?;
        info!(session_id = %session.session_id, steps = session.total_steps(), "chain session started");

        let chain = Some(self.metadata(execution_id, &session));
        Ok(EngineReply { content, chain })
    }

    fn resume(&self, sid: &str, request: &ExecutionRequest) -> Result<EngineReply, EngineError> {
        let lock = self.session_lock(sid);
        let _guard = lock.lock().expect("session lock poisoned");

        let mut session =
            self.store
                .load(sid)?
                .ok_or_else(|| SessionStateError::Unknown {
                    session_id: sid.to_string(),
                })?;

        match session.state {
            SessionState::Completed | SessionState::Aborted => {
                return Err(SessionStateError::AlreadyFinished {
                    session_id: sid.to_string(),
                }
                .into());
            }
            SessionState::Expired => {
                return Err(SessionStateError::Expired {
                    session_id: sid.to_string(),
                }
                .into());
            }
            _ => {}
        }

        if session.is_expired(Utc::now()) {
            session.mark_expired();
            self.store.save(&session)?;
            self.gates.remove_chain(sid)?;
            return Err(SessionStateError::Expired {
                session_id: sid.to_string(),
            }
            .into());
        }

        let execution_id = Uuid::new_v4().to_string();

        if let Some(action) = request.gate_action.as_deref() {
            let action: GateAction = action.parse().map_err(EngineError::InvalidArgument)?;
            if !session.pending_escalation {
                return Err(EngineError::InvalidArgument(
                    "no escalation is pending for this session".to_string(),
                ));
            }
            let outcome = session.apply_gate_action(action)?;
            let reply = self.reply_for_verdict_outcome(&mut session, outcome, &execution_id)?;
            self.store.save(&session)?;
            return Ok(reply);
        }

        if let Some(verdict_text) = request.gate_verdict.as_deref() {
            if session.state != SessionState::AwaitingGateVerdict {
                return Err(EngineError::InvalidArgument(
                    "no gate review is pending for this session".to_string(),
                ));
            }
            let verdict = parse_verdict(verdict_text, VerdictSource::DedicatedField).ok_or_else(
                || {
                    EngineError::InvalidArgument(
                        "unrecognized gate verdict; accepted: 'GATE_REVIEW: PASS - reason', \
                         'GATE_REVIEW: FAIL: reason', 'GATE PASS - reason', 'PASS - reason'"
                            .to_string(),
                    )
                },
            )?;
            let outcome = session.submit_gate_verdict(&verdict, self.config.gate_max_retries)?;
            let reply = self.reply_for_verdict_outcome(&mut session, outcome, &execution_id)?;
            self.store.save(&session)?;
            return Ok(reply);
        }

        let Some(user_response) = request.user_response.as_deref() else {
            return Err(EngineError::InvalidArgument(
                "resuming a session requires user_response, gate_verdict, or gate_action"
                    .to_string(),
            ));
        };
        if session.state != SessionState::AwaitingStepResult {
            return Err(EngineError::InvalidArgument(
                "a gate review is pending; reply through gate_verdict".to_string(),
            ));
        }

        self.register_inline_gates(
            &request.gates,
            GateOwner::Chain {
                session_id: sid.to_string(),
            },
        )?;

        let step_number = session.current_step_index;
        let bundle = self.resolve_gates(&session.blueprint, step_number, Some(sid), None);
        let externally_gated = bundle.blocking_validations().next().is_some();
        let advance = session.submit_step_result(user_response.to_string(), externally_gated)?;

        let reply = if session.state == SessionState::AwaitingGateVerdict {
            self.begin_gate_review(&mut session, &bundle, &execution_id)?
        } else {
            match advance {
                StepAdvance::Completed => self.completion_reply(&mut session, &execution_id)?,
                StepAdvance::NextStep { .. } => {
                    let content = self.render_session_step(&session, None)?;
                    EngineReply {
                        content,
                        chain: Some(self.metadata(&execution_id, &session)),
                    }
                }
            }
        };
        self.store.save(&session)?;
        Ok(reply)
    }

    /// A gated step's result was just stored: run shell checks engine-side,
    /// then either auto-resolve the verdict or ask for a textual review.
    fn begin_gate_review(
        &self,
        session: &mut ChainSession,
        bundle: &GateBundle,
        execution_id: &str,
    ) -> Result<EngineReply, EngineError> {
        let step_number = session.current_step_index;

        if let Some(failure) = self.run_shell_gates(bundle) {
            debug!(step_number, rationale = %failure.rationale, "shell gate failed");
            let verdict = GateVerdict {
                passed: false,
                rationale: failure.rationale,
            };
            let outcome = session.submit_gate_verdict(&verdict, self.config.gate_max_retries)?;
            return self.reply_for_verdict_outcome(session, outcome, execution_id);
        }

        let criteria = self.textual_criteria(session, step_number, bundle);
        if criteria.is_empty() {
            // Shell-only gating, and it passed.
            let verdict = GateVerdict {
                passed: true,
                rationale: "shell checks passed".to_string(),
            };
            let outcome = session.submit_gate_verdict(&verdict, self.config.gate_max_retries)?;
            return self.reply_for_verdict_outcome(session, outcome, execution_id);
        }

        let submitted = session
            .step_results
            .get(&step_number)
            .cloned()
            .unwrap_or_default();
        let retries_left = self
            .config
            .gate_max_retries
            .saturating_sub(session.gate_retries_used);
        let content = StepRenderer::new(&self.catalog)
            .render_gate_review(&GateReviewContext {
                session_id: &session.session_id,
                step_number,
                criteria,
                submitted: &submitted,
                retries_left,
            })
            .map_err(EngineError::from)?;
        Ok(EngineReply {
            content,
            chain: Some(self.metadata(execution_id, session)),
        })
    }

    fn reply_for_verdict_outcome(
        &self,
        session: &mut ChainSession,
        outcome: VerdictOutcome,
        execution_id: &str,
    ) -> Result<EngineReply, EngineError> {
        match outcome {
            VerdictOutcome::Advance(StepAdvance::Completed) => {
                self.completion_reply(session, execution_id)
            }
            VerdictOutcome::Advance(StepAdvance::NextStep { .. }) => {
                let content = self.render_session_step(session, None)?;
                Ok(EngineReply {
                    content,
                    chain: Some(self.metadata(execution_id, session)),
                })
            }
            VerdictOutcome::RetryStep { reason, .. } => {
                let content = self.render_session_step(session, Some(&reason))?;
                Ok(EngineReply {
                    content,
                    chain: Some(self.metadata(execution_id, session)),
                })
            }
            VerdictOutcome::Escalate {
                step_number,
                reason,
            } => {
                let content = StepRenderer::new(&self.catalog).render_escalation(
                    &session.session_id,
                    step_number,
                    &reason,
                );
                Ok(EngineReply {
                    content,
                    chain: Some(self.metadata(execution_id, session)),
                })
            }
        }
    }

    fn completion_reply(
        &self,
        session: &mut ChainSession,
        execution_id: &str,
    ) -> Result<EngineReply, EngineError> {
        // Chain gates go when the chain does, completed or aborted alike.
        self.gates.remove_chain(&session.session_id)?;
        let content = if session.state == SessionState::Aborted {
            format!(
                "Chain '{}' aborted at step {} of {}.",
                session.session_id,
                session.current_step_index,
                session.total_steps()
            )
        } else {
            StepRenderer::new(&self.catalog).render_completion(session)
        };
        info!(session_id = %session.session_id, state = ?session.state, "chain finished");
        Ok(EngineReply {
            content,
            chain: Some(self.metadata(execution_id, session)),
        })
    }

    /// Render the session's current step, applying the plan's framework
    /// override for the duration of the render.
    fn render_session_step(
        &self,
        session: &ChainSession,
        retry_reason: Option<&str>,
    ) -> Result<String, EngineError> {
        let step_number = session.current_step_index;
        let prior = step_number
            .checked_sub(1)
            .filter(|n| *n >= 1)
            .and_then(|n| session.step_results.get(&n))
            .map(String::as_str);
        let bundle =
            self.resolve_gates(&session.blueprint, step_number, Some(&session.session_id), None);

        self.render_with_framework(&session.blueprint, |framework| {
            StepRenderer::new(&self.catalog)
                .render_step(&StepContext {
                    plan: &session.blueprint,
                    step_number,
                    prior_result: prior,
                    bundle: &bundle,
                    retry_reason,
                    framework,
                    session_id: Some(&session.session_id),
                })
                .map_err(EngineError::from)
        })
    }

    /// Run `render` with the plan's framework override applied (and restored
    /// afterward, even on failure), or under the standing active framework.
    fn render_with_framework(
        &self,
        plan: &ExecutionPlan,
        render: impl Fn(Option<&FrameworkDefinition>) -> Result<String, EngineError>,
    ) -> Result<String, EngineError> {
        match &plan.framework_override {
            Some(name) => self
                .frameworks
                .with_override(name, || render(self.frameworks.get(name))),
            None => {
                let active = self.frameworks.active();
                render(active.as_deref().and_then(|name| self.frameworks.get(name)))
            }
        }
    }

    /// Merge the five tiers for one step of one plan.
    fn resolve_gates(
        &self,
        plan: &ExecutionPlan,
        step_number: u32,
        session_id: Option<&str>,
        execution_id: Option<&str>,
    ) -> GateBundle {
        let prompt = plan
            .step(step_number)
            .and_then(|step| self.catalog.get(&step.prompt_id));

        let framework_name = plan
            .framework_override
            .clone()
            .or_else(|| self.frameworks.active());
        let framework = framework_name
            .as_deref()
            .and_then(|name| self.frameworks.get(name))
            .map(|def| def.gates.clone())
            .unwrap_or_default();

        let category = prompt
            .map(|p| category_gates(&p.category))
            .unwrap_or_default();

        let (template_includes, template_excludes) = match prompt {
            Some(prompt) => {
                let (found, missing) = self
                    .gate_catalog
                    .resolve_ids(&prompt.gate_includes, GateTier::Template);
                if !missing.is_empty() {
                    warn!(prompt_id = %prompt.id, ?missing, "template includes reference unknown gates");
                }
                (found, prompt.gate_excludes.clone())
            }
            None => (Vec::new(), Vec::new()),
        };

        let temporary = match (session_id, execution_id) {
            (Some(sid), _) => self.gates.for_chain_step(sid, step_number),
            (None, Some(eid)) => self.gates.for_execution(eid),
            (None, None) => Vec::new(),
        };

        resolve_bundle(&TierInputs {
            fallback: fallback_gates(),
            framework,
            category,
            template_includes,
            template_excludes,
            temporary,
        })
    }

    /// First failing shell check, if any.
    fn run_shell_gates(&self, bundle: &GateBundle) -> Option<ShellCheckOutcome> {
        for gate in bundle.shell_checks() {
            let Some(check) = gate.shell.as_ref() else {
                continue;
            };
            let request = ShellCheckRequest::from_check(
                check,
                self.workdir.clone(),
                self.config.shell_output_limit_bytes,
            );
            let outcome = self.shell.verify(&request);
            debug!(gate = %gate.id, passed = outcome.passed, attempts = outcome.attempts_used, "shell gate evaluated");
            if !outcome.passed {
                return Some(ShellCheckOutcome {
                    rationale: format!("gate '{}': {}", gate.id, outcome.rationale),
                    ..outcome
                });
            }
        }
        None
    }

    /// Criteria needing a textual self-report for this step: the step's own
    /// gate criteria, the plan's final validation, and blocking textual gates
    /// from the bundle.
    fn textual_criteria(
        &self,
        session: &ChainSession,
        step_number: u32,
        bundle: &GateBundle,
    ) -> Vec<String> {
        let mut criteria: Vec<String> = Vec::new();
        let mut push = |criterion: &str, criteria: &mut Vec<String>| {
            if !criteria.iter().any(|c| c.eq_ignore_ascii_case(criterion)) {
                criteria.push(criterion.to_string());
            }
        };

        if let Some(step) = session.blueprint.step(step_number) {
            for criterion in &step.gate_criteria {
                push(criterion, &mut criteria);
            }
        }
        if session.blueprint.is_final_step(step_number)
            && let Some(validation) = &session.blueprint.final_validation
        {
            for criterion in &validation.criteria {
                push(criterion, &mut criteria);
            }
        }
        for gate in bundle.blocking_validations().filter(|g| g.shell.is_none()) {
            for criterion in &gate.criteria {
                push(criterion, &mut criteria);
            }
        }
        criteria
    }

    fn register_inline_gates(
        &self,
        specs: &[InlineGateSpec],
        owner: GateOwner,
    ) -> Result<(), EngineError> {
        let expires_at =
            Utc::now() + ChronoDuration::minutes(self.config.temp_gate_ttl_minutes as i64);
        for spec in specs {
            let mut gate = match spec {
                InlineGateSpec::Id(id) => match self.gate_catalog.get(id) {
                    Some(def) => def.clone(),
                    None => {
                        warn!(id, "inline gate id not in catalog; ignored");
                        continue;
                    }
                },
                InlineGateSpec::QuickCheck { name, description } => {
                    GateDefinition::validation(name, &[description.as_str()], GateTier::Temporary)
                }
                InlineGateSpec::Full(def) => def.clone(),
            };
            gate.tier = GateTier::Temporary;
            if gate.expires_at.is_none() {
                gate.expires_at = Some(expires_at);
            }
            self.gates.register(TemporaryGate {
                gate,
                owner: owner.clone(),
            })?;
        }
        Ok(())
    }

    /// Abort every live run of a prompt (`force_restart` semantics).
    fn abort_live_runs(&self, prompt_id: &str) -> Result<(), EngineError> {
        for id in self.store.list_ids()? {
            let owned = parse_session_id(&id).is_some_and(|(owner, _)| owner == prompt_id);
            if !owned {
                continue;
            }
            let Some(mut session) = self.store.load(&id)? else {
                continue;
            };
            if session.state.is_terminal() {
                continue;
            }
            session.abort();
            self.store.save(&session)?;
            self.gates.remove_chain(&id)?;
            info!(session_id = %id, "live run aborted by force_restart");
        }
        Ok(())
    }

    fn metadata(&self, execution_id: &str, session: &ChainSession) -> ChainMetadata {
        ChainMetadata {
            execution_id: execution_id.to_string(),
            execution_type: session.blueprint.execution_type,
            framework_used: session
                .blueprint
                .framework_override
                .clone()
                .or_else(|| self.frameworks.active()),
            steps_executed: session.step_results.len() as u32,
            session_id: session.session_id.clone(),
        }
    }

    fn session_lock(&self, session_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().expect("session lock map poisoned");
        Arc::clone(
            locks
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }
}
