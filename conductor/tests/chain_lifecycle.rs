//! End-to-end chain lifecycle against the file-backed store.
//!
//! These tests rebuild the engine between round-trips to prove sessions and
//! temporary gates survive process restarts for the remainder of their TTL.

use std::path::Path;
use std::sync::Arc;

use chrono::{Duration, Utc};

use conductor::core::gates::{GateDefinition, GateTier};
use conductor::core::session::SessionState;
use conductor::engine::{Engine, ExecutionRequest, InlineGateSpec};
use conductor::error::{EngineError, SessionStateError};
use conductor::io::config::EngineConfig;
use conductor::io::gate_store::TemporaryGateRegistry;
use conductor::io::session_store::{JsonDirStore, SessionStore};
use conductor::test_support::{ScriptedShellVerifier, sample_catalog};

fn engine_over(state_dir: &Path) -> Engine {
    Engine::new(
        sample_catalog(),
        Arc::new(JsonDirStore::new(state_dir.join("sessions")).expect("store")),
        Arc::new(
            TemporaryGateRegistry::open(state_dir.join("temporary_gates.json"))
                .expect("registry"),
        ),
        Box::new(ScriptedShellVerifier::new(Vec::new())),
        EngineConfig::default(),
        state_dir.to_path_buf(),
    )
}

#[test]
fn chain_survives_engine_restarts_end_to_end() {
    let temp = tempfile::tempdir().expect("tempdir");

    // Round-trip 1: start the chain.
    {
        let engine = engine_over(temp.path());
        let reply = engine
            .handle(&ExecutionRequest::command(">>research topic:'x' --> summary"))
            .expect("start");
        assert_eq!(reply.chain.expect("metadata").session_id, "research#1");
    }

    // Round-trip 2: a fresh engine (new process) resumes step 1.
    {
        let engine = engine_over(temp.path());
        let reply = engine
            .handle(&ExecutionRequest::resume("research#1", "FINDINGS: dusty moon"))
            .expect("resume");
        assert!(reply.content.contains("FINDINGS: dusty moon"));
        assert_eq!(reply.chain.expect("metadata").steps_executed, 1);
    }

    // Round-trip 3: another fresh engine completes the chain.
    {
        let engine = engine_over(temp.path());
        let reply = engine
            .handle(&ExecutionRequest::resume("research#1", "SUMMARY: it is dusty"))
            .expect("resume");
        assert!(reply.content.contains("complete"));

        let store = JsonDirStore::new(temp.path().join("sessions")).expect("store");
        let session = store.load("research#1").expect("load").expect("session");
        assert_eq!(session.state, SessionState::Completed);
        assert_eq!(
            session.step_results.get(&1).map(String::as_str),
            Some("FINDINGS: dusty moon")
        );
        assert_eq!(
            session.step_results.get(&2).map(String::as_str),
            Some("SUMMARY: it is dusty")
        );
    }
}

#[test]
fn temporary_gates_survive_restart_and_chain_cleanup_removes_them() {
    let temp = tempfile::tempdir().expect("tempdir");

    {
        let engine = engine_over(temp.path());
        let request = ExecutionRequest {
            command: Some(">>research topic:'x' --> summary".to_string()),
            gates: vec![InlineGateSpec::QuickCheck {
                name: "english-only".to_string(),
                description: "output is written in English".to_string(),
            }],
            ..ExecutionRequest::default()
        };
        engine.handle(&request).expect("start");
    }

    // After a restart the chain-scoped gate still gates step 1.
    {
        let engine = engine_over(temp.path());
        let review = engine
            .handle(&ExecutionRequest::resume("research#1", "findings"))
            .expect("resume");
        assert!(review.content.contains("english-only") || review.content.contains("English"));

        engine
            .handle(&ExecutionRequest::verdict(
                "research#1",
                "GATE_REVIEW: PASS - it is English",
            ))
            .expect("verdict");

        // Chain-scoped gates watch every step, so the final step is held for
        // review too before the chain completes.
        let review = engine
            .handle(&ExecutionRequest::resume("research#1", "summary"))
            .expect("final step");
        assert!(review.content.contains("<gate-review"));
        let done = engine
            .handle(&ExecutionRequest::verdict(
                "research#1",
                "GATE_REVIEW: PASS - still English",
            ))
            .expect("final verdict");
        assert!(done.content.contains("complete"));
    }

    // Chain completion cleaned the registry; a reopened registry agrees.
    let registry = TemporaryGateRegistry::open(temp.path().join("temporary_gates.json"))
        .expect("registry");
    assert!(registry.for_chain_step("research#1", 1).is_empty());
}

#[test]
fn temporary_tier_wins_over_framework_tier_in_rendered_output() {
    let temp = tempfile::tempdir().expect("tempdir");
    let engine = engine_over(temp.path());
    engine
        .frameworks()
        .set_active(Some("CAGEERF"))
        .expect("set active");

    // CAGEERF contributes a guidance gate with this id; the temporary
    // definition must replace it wholesale.
    let mut gate = GateDefinition::validation(
        "structured-coverage",
        &["custom temporary wording"],
        GateTier::Temporary,
    );
    gate.expires_at = Some(Utc::now() + Duration::minutes(30));
    let request = ExecutionRequest {
        command: Some(">>debug issue:'leak'".to_string()),
        gates: vec![InlineGateSpec::Full(gate)],
        ..ExecutionRequest::default()
    };
    let reply = engine.handle(&request).expect("handle");

    assert!(reply.content.contains("custom temporary wording"));
    assert!(!reply.content.contains("Every CAGEERF phase appears"));
}

#[test]
fn expired_session_is_inaccessible_with_restart_guidance() {
    let temp = tempfile::tempdir().expect("tempdir");
    {
        let engine = engine_over(temp.path());
        engine
            .handle(&ExecutionRequest::command(">>research topic:'x' --> summary"))
            .expect("start");
    }

    // Age the record past its TTL behind the engine's back.
    let store = JsonDirStore::new(temp.path().join("sessions")).expect("store");
    let mut session = store.load("research#1").expect("load").expect("session");
    session.expires_at = Utc::now() - Duration::hours(1);
    store.save(&session).expect("save");

    let engine = engine_over(temp.path());
    let err = engine
        .handle(&ExecutionRequest::resume("research#1", "late result"))
        .expect_err("should reject");
    match &err {
        EngineError::SessionState(SessionStateError::Expired { session_id }) => {
            assert_eq!(session_id, "research#1");
        }
        other => panic!("expected expired error, got {other:?}"),
    }
    assert!(err.to_string().contains("issue the command again"));

    let session = store.load("research#1").expect("load").expect("session");
    assert_eq!(session.state, SessionState::Expired);
}

#[test]
fn envelope_wrapped_chain_command_executes() {
    let temp = tempfile::tempdir().expect("tempdir");
    let engine = engine_over(temp.path());

    let inner = serde_json::json!({ "command": ">>research topic:'x' --> summary" }).to_string();
    let outer = serde_json::json!({ "command": inner }).to_string();
    let reply = engine
        .handle(&ExecutionRequest::command(&outer))
        .expect("handle");
    assert_eq!(reply.chain.expect("metadata").session_id, "research#1");
}
