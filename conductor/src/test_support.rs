//! Test-only helpers: a deterministic sample catalog and scripted fakes.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use anyhow::Result;
use chrono::{Duration, Utc};

use crate::catalog::{ArgSpec, PromptCatalog, PromptDefinition};
use crate::core::operators::{ChainOperator, OperatorSet};
use crate::core::plan::{ResolvedInvocation, build_plan};
use crate::core::session::{ChainSession, session_id};
use crate::io::session_store::SessionStore;
use crate::io::shell::{ShellCheckOutcome, ShellCheckRequest, ShellVerifier};

/// A small catalog covering every category the tests exercise.
pub fn sample_catalog() -> PromptCatalog {
    PromptCatalog::new(vec![
        PromptDefinition {
            id: "research".to_string(),
            name: "Deep Research".to_string(),
            category: "research".to_string(),
            description: "Gather facts and sources on a topic".to_string(),
            system_message: Some("You are a meticulous research assistant.".to_string()),
            user_message_template: "Research the topic: {{ topic }}. Gather key facts and note \
                                    where each came from."
                .to_string(),
            arguments: vec![ArgSpec::required("topic")],
            gate_includes: Vec::new(),
            gate_excludes: Vec::new(),
        },
        PromptDefinition {
            id: "summary".to_string(),
            name: "Summary".to_string(),
            category: "writing".to_string(),
            description: "Condense material into a short summary".to_string(),
            system_message: None,
            user_message_template: "Summarize the following material:\n\n{{ previous_message }}"
                .to_string(),
            arguments: Vec::new(),
            gate_includes: Vec::new(),
            gate_excludes: Vec::new(),
        },
        PromptDefinition {
            id: "report".to_string(),
            name: "Report".to_string(),
            category: "writing".to_string(),
            description: "Turn a summary into a structured report".to_string(),
            system_message: None,
            user_message_template: "Turn this material into a structured report:\n\n\
                                    {{ previous_message }}"
                .to_string(),
            arguments: Vec::new(),
            gate_includes: Vec::new(),
            gate_excludes: Vec::new(),
        },
        PromptDefinition {
            id: "debug".to_string(),
            name: "Debug".to_string(),
            category: "debugging".to_string(),
            description: "Diagnose a reported issue".to_string(),
            system_message: None,
            user_message_template: "Diagnose the issue: {{ issue }}. Work through it step by step."
                .to_string(),
            arguments: vec![ArgSpec::optional("issue")],
            gate_includes: Vec::new(),
            gate_excludes: Vec::new(),
        },
        PromptDefinition {
            id: "code_review".to_string(),
            name: "Code Review".to_string(),
            category: "code".to_string(),
            description: "Review a change".to_string(),
            system_message: None,
            user_message_template: "Review the following change:\n\n{{ previous_message }}"
                .to_string(),
            arguments: Vec::new(),
            gate_includes: vec!["no-unhandled-errors".to_string()],
            gate_excludes: vec!["clarity".to_string()],
        },
    ])
}

/// A begun two-step chain session (`<prompt>` → `summary`) for store tests.
pub fn sample_chain_session(prompt_id: &str, run: u32) -> ChainSession {
    let set = OperatorSet {
        chain: Some(ChainOperator {
            entries: Vec::new(),
        }),
        ..OperatorSet::default()
    };
    let plan = build_plan(
        &set,
        vec![
            ResolvedInvocation {
                prompt_id: prompt_id.to_string(),
                raw_args: "topic:'persisted'".to_string(),
            },
            ResolvedInvocation {
                prompt_id: "summary".to_string(),
                raw_args: String::new(),
            },
        ],
    );
    let mut session = ChainSession::new(
        session_id(prompt_id, run),
        plan,
        Utc::now(),
        Duration::hours(24),
    );
    session.begin();
    session
}

/// In-memory session repository for tests that don't need a disk store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<HashMap<String, ChainSession>>,
}

impl SessionStore for MemoryStore {
    fn load(&self, session_id: &str) -> Result<Option<ChainSession>> {
        Ok(self
            .inner
            .lock()
            .expect("memory store poisoned")
            .get(session_id)
            .cloned())
    }

    fn save(&self, session: &ChainSession) -> Result<()> {
        self.inner
            .lock()
            .expect("memory store poisoned")
            .insert(session.session_id.clone(), session.clone());
        Ok(())
    }

    fn remove(&self, session_id: &str) -> Result<()> {
        self.inner
            .lock()
            .expect("memory store poisoned")
            .remove(session_id);
        Ok(())
    }

    fn list_ids(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self
            .inner
            .lock()
            .expect("memory store poisoned")
            .keys()
            .cloned()
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }
}

/// Shell verifier that replays scripted outcomes; passes once the script
/// runs out.
pub struct ScriptedShellVerifier {
    outcomes: Mutex<VecDeque<ShellCheckOutcome>>,
}

impl ScriptedShellVerifier {
    pub fn new(outcomes: Vec<ShellCheckOutcome>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
        }
    }

    pub fn failing(rationale: &str) -> Self {
        Self::new(vec![ShellCheckOutcome {
            passed: false,
            rationale: rationale.to_string(),
            attempts_used: 1,
        }])
    }
}

impl ShellVerifier for ScriptedShellVerifier {
    fn verify(&self, _request: &ShellCheckRequest) -> ShellCheckOutcome {
        self.outcomes
            .lock()
            .expect("scripted verifier poisoned")
            .pop_front()
            .unwrap_or(ShellCheckOutcome {
                passed: true,
                rationale: "scripted pass".to_string(),
                attempts_used: 1,
            })
    }
}
