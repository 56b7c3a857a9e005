//! Persisted registry for call-time temporary gates.
//!
//! Temporary gates are scoped to an execution, a chain, or one step of a
//! chain, and they expire: removed by the periodic sweep or by explicit
//! chain-completion cleanup, whichever comes first. The whole registry sits
//! behind one mutex so a reader never observes a half-deleted entry, and it
//! is rewritten atomically on every mutation so it survives restarts.

use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::gates::GateDefinition;

/// What a temporary gate is attached to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GateOwner {
    Execution { execution_id: String },
    Chain { session_id: String },
    Step { session_id: String, step_number: u32 },
}

/// One registered temporary gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemporaryGate {
    pub gate: GateDefinition,
    pub owner: GateOwner,
}

/// Mutex-guarded, file-backed registry.
#[derive(Debug)]
pub struct TemporaryGateRegistry {
    path: PathBuf,
    inner: Mutex<Vec<TemporaryGate>>,
}

impl TemporaryGateRegistry {
    /// Open (or create) the registry at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("read gate registry {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("parse gate registry {}", path.display()))?
        } else {
            Vec::new()
        };
        Ok(Self {
            path,
            inner: Mutex::new(entries),
        })
    }

    pub fn register(&self, gate: TemporaryGate) -> Result<()> {
        let mut entries = self.inner.lock().expect("gate registry poisoned");
        debug!(id = %gate.gate.id, owner = ?gate.owner, "temporary gate registered");
        entries.push(gate);
        self.persist(&entries)
    }

    /// Gates visible to `step_number` of a chain: chain-scoped ones apply to
    /// every step, step-scoped ones only to their own.
    pub fn for_chain_step(&self, session_id: &str, step_number: u32) -> Vec<GateDefinition> {
        let entries = self.inner.lock().expect("gate registry poisoned");
        entries
            .iter()
            .filter(|entry| match &entry.owner {
                GateOwner::Chain { session_id: owner } => owner == session_id,
                GateOwner::Step {
                    session_id: owner,
                    step_number: step,
                } => owner == session_id && *step == step_number,
                GateOwner::Execution { .. } => false,
            })
            .map(|entry| entry.gate.clone())
            .collect()
    }

    pub fn for_execution(&self, execution_id: &str) -> Vec<GateDefinition> {
        let entries = self.inner.lock().expect("gate registry poisoned");
        entries
            .iter()
            .filter(|entry| {
                matches!(&entry.owner, GateOwner::Execution { execution_id: owner } if owner == execution_id)
            })
            .map(|entry| entry.gate.clone())
            .collect()
    }

    /// Chain-completion cleanup: drop every gate owned by the chain.
    pub fn remove_chain(&self, session_id: &str) -> Result<usize> {
        let mut entries = self.inner.lock().expect("gate registry poisoned");
        let before = entries.len();
        entries.retain(|entry| match &entry.owner {
            GateOwner::Chain { session_id: owner } | GateOwner::Step { session_id: owner, .. } => {
                owner != session_id
            }
            GateOwner::Execution { .. } => true,
        });
        let removed = before - entries.len();
        if removed > 0 {
            debug!(session_id, removed, "chain gates cleaned up");
            self.persist(&entries)?;
        }
        Ok(removed)
    }

    /// Drop every gate whose `expires_at` has passed.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut entries = self.inner.lock().expect("gate registry poisoned");
        let before = entries.len();
        entries.retain(|entry| match entry.gate.expires_at {
            Some(expires_at) => expires_at > now,
            None => true,
        });
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, "expired temporary gates swept");
            self.persist(&entries)?;
        }
        Ok(removed)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("gate registry poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn persist(&self, entries: &[TemporaryGate]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create gate registry dir {}", parent.display()))?;
        }
        let mut buf = serde_json::to_string_pretty(entries)?;
        buf.push('\n');
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, &buf)
            .with_context(|| format!("write temp gate registry {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("replace gate registry {}", self.path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::gates::GateTier;
    use chrono::Duration;

    fn temp_gate(id: &str, owner: GateOwner, expires_at: Option<DateTime<Utc>>) -> TemporaryGate {
        let mut gate = GateDefinition::validation(id, &["criterion"], GateTier::Temporary);
        gate.expires_at = expires_at;
        TemporaryGate { gate, owner }
    }

    #[test]
    fn chain_gates_are_visible_to_every_step() {
        let temp = tempfile::tempdir().expect("tempdir");
        let registry =
            TemporaryGateRegistry::open(temp.path().join("gates.json")).expect("registry");
        registry
            .register(temp_gate(
                "chain-wide",
                GateOwner::Chain {
                    session_id: "research#1".to_string(),
                },
                None,
            ))
            .expect("register");
        registry
            .register(temp_gate(
                "step-two-only",
                GateOwner::Step {
                    session_id: "research#1".to_string(),
                    step_number: 2,
                },
                None,
            ))
            .expect("register");

        let step1 = registry.for_chain_step("research#1", 1);
        assert_eq!(step1.len(), 1);
        assert_eq!(step1[0].id, "chain-wide");

        let step2 = registry.for_chain_step("research#1", 2);
        assert_eq!(step2.len(), 2);

        assert!(registry.for_chain_step("other#1", 1).is_empty());
    }

    #[test]
    fn chain_completion_cleanup_removes_owned_gates() {
        let temp = tempfile::tempdir().expect("tempdir");
        let registry =
            TemporaryGateRegistry::open(temp.path().join("gates.json")).expect("registry");
        registry
            .register(temp_gate(
                "mine",
                GateOwner::Chain {
                    session_id: "research#1".to_string(),
                },
                None,
            ))
            .expect("register");
        registry
            .register(temp_gate(
                "other",
                GateOwner::Execution {
                    execution_id: "exec-1".to_string(),
                },
                None,
            ))
            .expect("register");

        let removed = registry.remove_chain("research#1").expect("cleanup");
        assert_eq!(removed, 1);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.for_execution("exec-1").len(), 1);
    }

    #[test]
    fn sweep_drops_only_expired_gates() {
        let temp = tempfile::tempdir().expect("tempdir");
        let registry =
            TemporaryGateRegistry::open(temp.path().join("gates.json")).expect("registry");
        let now = Utc::now();
        registry
            .register(temp_gate(
                "stale",
                GateOwner::Execution {
                    execution_id: "exec-1".to_string(),
                },
                Some(now - Duration::minutes(5)),
            ))
            .expect("register");
        registry
            .register(temp_gate(
                "fresh",
                GateOwner::Execution {
                    execution_id: "exec-2".to_string(),
                },
                Some(now + Duration::minutes(5)),
            ))
            .expect("register");

        let removed = registry.sweep_expired(now).expect("sweep");
        assert_eq!(removed, 1);
        assert_eq!(registry.for_execution("exec-2").len(), 1);
        assert!(registry.for_execution("exec-1").is_empty());
    }

    #[test]
    fn registry_survives_reopen() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("gates.json");
        {
            let registry = TemporaryGateRegistry::open(&path).expect("registry");
            registry
                .register(temp_gate(
                    "persisted",
                    GateOwner::Chain {
                        session_id: "research#1".to_string(),
                    },
                    None,
                ))
                .expect("register");
        }
        let reopened = TemporaryGateRegistry::open(&path).expect("registry");
        assert_eq!(reopened.for_chain_step("research#1", 1).len(), 1);
    }
}
