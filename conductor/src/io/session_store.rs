//! Session persistence behind a repository interface.
//!
//! The state machine never knows which backing store is used; the default
//! [`JsonDirStore`] keeps one JSON file per session, written atomically and
//! validated on load against an embedded schema plus semantic invariants so
//! a record survives process restarts with referential correctness intact.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use jsonschema::validator_for;
use serde_json::Value;
use tracing::debug;

use crate::core::session::{ChainSession, parse_session_id, validate_session_invariants};

const SESSION_SCHEMA: &str = include_str!("../../schemas/chain_session/v1.schema.json");

/// Repository interface for chain sessions.
pub trait SessionStore: Send + Sync {
    fn load(&self, session_id: &str) -> Result<Option<ChainSession>>;
    fn save(&self, session: &ChainSession) -> Result<()>;
    fn remove(&self, session_id: &str) -> Result<()>;
    fn list_ids(&self) -> Result<Vec<String>>;
}

/// Derive the next run number for a prompt from the persisted sessions, so
/// `<promptId>#<run>` ids never collide — including across restarts.
pub fn next_run_number(store: &dyn SessionStore, prompt_id: &str) -> Result<u32> {
    let mut max_run = 0;
    for id in store.list_ids()? {
        if let Some((owner, run)) = parse_session_id(&id)
            && owner == prompt_id
        {
            max_run = max_run.max(run);
        }
    }
    Ok(max_run + 1)
}

/// One JSON file per session under a state directory.
#[derive(Debug, Clone)]
pub struct JsonDirStore {
    dir: PathBuf,
}

impl JsonDirStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("create session dir {}", dir.display()))?;
        Ok(Self { dir })
    }

    fn path_for(&self, session_id: &str) -> PathBuf {
        // `#` is awkward in shell globs; swap it for the on-disk name.
        self.dir.join(format!("{}.json", session_id.replace('#', "@")))
    }
}

impl SessionStore for JsonDirStore {
    fn load(&self, session_id: &str) -> Result<Option<ChainSession>> {
        let path = self.path_for(session_id);
        if !path.exists() {
            return Ok(None);
        }
        let contents =
            fs::read_to_string(&path).with_context(|| format!("read session {}", path.display()))?;
        let value: Value = serde_json::from_str(&contents)
            .with_context(|| format!("parse session {}", path.display()))?;
        validate_schema(&value).with_context(|| format!("session {}", path.display()))?;
        let session: ChainSession = serde_json::from_value(value)
            .with_context(|| format!("deserialize session {}", path.display()))?;
        let errors = validate_session_invariants(&session);
        if !errors.is_empty() {
            return Err(anyhow!("session invariants failed: {}", errors.join("; ")));
        }
        debug!(session_id, state = ?session.state, "session loaded");
        Ok(Some(session))
    }

    fn save(&self, session: &ChainSession) -> Result<()> {
        let errors = validate_session_invariants(session);
        if !errors.is_empty() {
            return Err(anyhow!(
                "refusing to persist invalid session: {}",
                errors.join("; ")
            ));
        }
        let path = self.path_for(&session.session_id);
        let mut buf = serde_json::to_string_pretty(session)?;
        buf.push('\n');
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, &buf)
            .with_context(|| format!("write temp session {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &path)
            .with_context(|| format!("replace session {}", path.display()))?;
        debug!(session_id = %session.session_id, state = ?session.state, "session saved");
        Ok(())
    }

    fn remove(&self, session_id: &str) -> Result<()> {
        let path = self.path_for(session_id);
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("remove session {}", path.display()))?;
        }
        Ok(())
    }

    fn list_ids(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.dir)
            .with_context(|| format!("read session dir {}", self.dir.display()))?
        {
            let entry = entry.context("read session dir entry")?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(stem) = name.strip_suffix(".json") else {
                continue;
            };
            ids.push(stem.replace('@', "#"));
        }
        ids.sort_unstable();
        Ok(ids)
    }
}

fn validate_schema(value: &Value) -> Result<()> {
    let schema: Value = serde_json::from_str(SESSION_SCHEMA).context("parse session schema")?;
    let compiled = validator_for(&schema).map_err(|err| anyhow!("invalid schema: {}", err))?;
    if !compiled.is_valid(value) {
        let messages = compiled
            .iter_errors(value)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        return Err(anyhow!(
            "session schema validation failed: {}",
            messages.join("; ")
        ));
    }
    Ok(())
}

/// Convenience constructor rooted at `<state_dir>/sessions`.
pub fn open_default_store(state_dir: &Path) -> Result<JsonDirStore> {
    JsonDirStore::new(state_dir.join("sessions"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::sample_chain_session;

    #[test]
    fn save_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = JsonDirStore::new(temp.path()).expect("store");
        let session = sample_chain_session("research", 1);

        store.save(&session).expect("save");
        let loaded = store.load(&session.session_id).expect("load").expect("some");
        assert_eq!(loaded, session);
    }

    #[test]
    fn load_missing_returns_none() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = JsonDirStore::new(temp.path()).expect("store");
        assert!(store.load("research#9").expect("load").is_none());
    }

    #[test]
    fn sessions_survive_a_new_store_over_the_same_dir() {
        let temp = tempfile::tempdir().expect("tempdir");
        let session = sample_chain_session("research", 1);
        {
            let store = JsonDirStore::new(temp.path()).expect("store");
            store.save(&session).expect("save");
        }
        let reopened = JsonDirStore::new(temp.path()).expect("store");
        let loaded = reopened
            .load(&session.session_id)
            .expect("load")
            .expect("some");
        assert_eq!(loaded.session_id, "research#1");
    }

    #[test]
    fn corrupt_records_are_rejected_by_schema() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = JsonDirStore::new(temp.path()).expect("store");
        fs::write(
            temp.path().join("research@1.json"),
            r#"{"session_id": "research#1", "state": "definitely-not-a-state"}"#,
        )
        .expect("write");
        assert!(store.load("research#1").is_err());
    }

    #[test]
    fn run_numbers_increment_per_prompt() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = JsonDirStore::new(temp.path()).expect("store");
        assert_eq!(next_run_number(&store, "research").expect("next"), 1);

        store.save(&sample_chain_session("research", 1)).expect("save");
        store.save(&sample_chain_session("research", 2)).expect("save");
        store.save(&sample_chain_session("summary", 5)).expect("save");

        assert_eq!(next_run_number(&store, "research").expect("next"), 3);
        assert_eq!(next_run_number(&store, "summary").expect("next"), 6);
        assert_eq!(next_run_number(&store, "debug").expect("next"), 1);
    }
}
