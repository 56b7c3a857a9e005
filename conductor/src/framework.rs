//! Framework registry and the override executor.
//!
//! The "active framework" is explicit state owned by [`FrameworkManager`] —
//! no ambient global. An override captures the current value, switches for
//! one operator-scoped execution, and restores the captured value afterward
//! even when the wrapped work fails. Nested overrides restore the immediate
//! parent via a frame stack, not a global default.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::{debug, error};

use crate::core::gates::{GateDefinition, GateTier};
use crate::error::EngineError;

/// One methodology the engine can run under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameworkDefinition {
    /// Normalized lookup key (uppercase).
    pub name: String,
    pub display_name: String,
    pub description: String,
    /// System-prompt preamble injected into rendered steps.
    pub preamble: String,
    /// Framework-tier gates contributed to every resolution.
    pub gates: Vec<GateDefinition>,
}

#[derive(Debug)]
struct Frame {
    captured: Option<String>,
    token: u64,
}

#[derive(Debug, Default)]
struct FrameworkState {
    active: Option<String>,
    stack: Vec<Frame>,
    next_token: u64,
}

/// Registry plus the mutex-guarded active-framework value.
#[derive(Debug)]
pub struct FrameworkManager {
    frameworks: HashMap<String, FrameworkDefinition>,
    state: Mutex<FrameworkState>,
}

impl FrameworkManager {
    pub fn new(definitions: Vec<FrameworkDefinition>) -> Self {
        let frameworks = definitions
            .into_iter()
            .map(|def| (def.name.clone(), def))
            .collect();
        Self {
            frameworks,
            state: Mutex::new(FrameworkState::default()),
        }
    }

    pub fn with_builtins() -> Self {
        Self::new(builtin_frameworks())
    }

    /// Known lookup names, sorted.
    pub fn known(&self) -> Vec<String> {
        let mut names: Vec<String> = self.frameworks.keys().cloned().collect();
        names.sort_unstable();
        names
    }

    pub fn get(&self, lookup_name: &str) -> Option<&FrameworkDefinition> {
        self.frameworks.get(&lookup_name.to_uppercase())
    }

    pub fn active(&self) -> Option<String> {
        self.state.lock().expect("framework state poisoned").active.clone()
    }

    /// Switch the standing active framework (outside any override).
    pub fn set_active(&self, name: Option<&str>) -> Result<(), EngineError> {
        let key = match name {
            Some(name) => Some(self.validated_key(name)?),
            None => None,
        };
        let mut state = self.state.lock().expect("framework state poisoned");
        state.active = key;
        Ok(())
    }

    /// Run `work` with `target` active, restoring the captured framework
    /// afterward regardless of the outcome.
    ///
    /// An unknown target aborts before `work` runs — no partial state. A
    /// restoration failure is logged but never masks the primary outcome.
    pub fn with_override<T>(
        &self,
        target: &str,
        work: impl FnOnce() -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        let key = self.validated_key(target)?;

        let (captured, token) = {
            let mut state = self.state.lock().expect("framework state poisoned");
            let captured = state.active.clone();
            let token = state.next_token;
            state.next_token += 1;
            state.stack.push(Frame {
                captured: captured.clone(),
                token,
            });
            state.active = Some(key.clone());
            (captured, token)
        };
        debug!(target = %key, captured = ?captured, "framework override applied");

        let result = work();

        if let Err(err) = self.restore(token, captured.as_deref()) {
            // The wrapped work's outcome is what propagates; the restore
            // failure only reaches the logging channel.
            error!(target = %key, captured = ?captured, %err, "framework restoration failed");
        }

        result
    }

    /// Pop this override's frame and restore its captured value.
    ///
    /// Fails when the frame is no longer on top (an interleaved override did
    /// not unwind in order) — the frame is dropped but the active value is
    /// left for the still-open override to restore.
    fn restore(&self, token: u64, captured: Option<&str>) -> Result<(), EngineError> {
        let mut state = self.state.lock().expect("framework state poisoned");
        match state.stack.last() {
            Some(frame) if frame.token == token => {
                state.stack.pop();
                state.active = captured.map(str::to_string);
                debug!(restored = ?state.active, "framework restored");
                Ok(())
            }
            _ => {
                state.stack.retain(|frame| frame.token != token);
                Err(EngineError::InvalidArgument(
                    "framework override frames unwound out of order".to_string(),
                ))
            }
        }
    }

    fn validated_key(&self, name: &str) -> Result<String, EngineError> {
        let key = name.to_uppercase();
        if !self.frameworks.contains_key(&key) {
            return Err(EngineError::UnknownFramework {
                name: name.to_string(),
                known: self.known(),
            });
        }
        Ok(key)
    }
}

/// The stock methodologies.
pub fn builtin_frameworks() -> Vec<FrameworkDefinition> {
    vec![
        FrameworkDefinition {
            name: "CAGEERF".to_string(),
            display_name: "CAGEERF".to_string(),
            description: "Context, Analysis, Goals, Execution, Evaluation, Refinement, Framing"
                .to_string(),
            preamble: "Work through Context, Analysis, Goals, Execution, Evaluation, Refinement \
                       and Framing in order, labeling each phase."
                .to_string(),
            gates: vec![GateDefinition::guidance(
                "structured-coverage",
                &["Every CAGEERF phase appears in the output, in order."],
                GateTier::Framework,
            )],
        },
        FrameworkDefinition {
            name: "REACT".to_string(),
            display_name: "ReACT".to_string(),
            description: "Interleaved reasoning and acting".to_string(),
            preamble: "Alternate explicit Thought / Action / Observation entries until the task \
                       is done, then state the final answer."
                .to_string(),
            gates: vec![GateDefinition::guidance(
                "reasoning-trace",
                &["Each action is preceded by the thought that motivated it."],
                GateTier::Framework,
            )],
        },
        FrameworkDefinition {
            name: "5W1H".to_string(),
            display_name: "5W1H".to_string(),
            description: "Who, What, When, Where, Why, How".to_string(),
            preamble: "Answer Who, What, When, Where, Why and How explicitly before concluding."
                .to_string(),
            gates: Vec::new(),
        },
        FrameworkDefinition {
            name: "SCAMPER".to_string(),
            display_name: "SCAMPER".to_string(),
            description: "Substitute, Combine, Adapt, Modify, Put to other use, Eliminate, Reverse"
                .to_string(),
            preamble: "Generate variants via Substitute, Combine, Adapt, Modify, Put-to-other-use, \
                       Eliminate and Reverse moves."
                .to_string(),
            gates: Vec::new(),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_restores_previous_framework_on_success() {
        let manager = FrameworkManager::with_builtins();
        manager.set_active(Some("CAGEERF")).expect("set active");

        let seen = manager
            .with_override("ReACT", || Ok(manager.active()))
            .expect("override");
        assert_eq!(seen.as_deref(), Some("REACT"));
        assert_eq!(manager.active().as_deref(), Some("CAGEERF"));
    }

    #[test]
    fn override_restores_even_when_work_fails() {
        let manager = FrameworkManager::with_builtins();
        manager.set_active(Some("CAGEERF")).expect("set active");

        let result: Result<(), EngineError> = manager.with_override("ReACT", || {
            Err(EngineError::InvalidArgument("boom".to_string()))
        });
        assert!(result.is_err());
        assert_eq!(manager.active().as_deref(), Some("CAGEERF"));
    }

    #[test]
    fn unknown_target_aborts_before_work_runs() {
        let manager = FrameworkManager::with_builtins();
        let mut ran = false;
        let result = manager.with_override("NOPE", || {
            ran = true;
            Ok(())
        });
        assert!(matches!(result, Err(EngineError::UnknownFramework { .. })));
        assert!(!ran);
        assert_eq!(manager.active(), None);
    }

    #[test]
    fn nested_overrides_restore_the_immediate_parent() {
        let manager = FrameworkManager::with_builtins();
        manager.set_active(Some("5W1H")).expect("set active");

        manager
            .with_override("CAGEERF", || {
                assert_eq!(manager.active().as_deref(), Some("CAGEERF"));
                manager.with_override("ReACT", || {
                    assert_eq!(manager.active().as_deref(), Some("REACT"));
                    Ok(())
                })?;
                // Inner override restored its immediate parent, not 5W1H.
                assert_eq!(manager.active().as_deref(), Some("CAGEERF"));
                Ok(())
            })
            .expect("override");
        assert_eq!(manager.active().as_deref(), Some("5W1H"));
    }

    #[test]
    fn no_prior_framework_restores_to_none() {
        let manager = FrameworkManager::with_builtins();
        manager
            .with_override("SCAMPER", || Ok(()))
            .expect("override");
        assert_eq!(manager.active(), None);
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let manager = FrameworkManager::with_builtins();
        assert!(manager.get("react").is_some());
        assert!(manager.get("ReACT").is_some());
    }
}
