//! CLI tests for `conductor parse`.
//!
//! Spawns the binary and verifies exit codes and plan output for valid and
//! unknown commands.

use std::process::Command;

#[test]
fn parse_prints_a_two_step_plan() {
    let output = Command::new(env!("CARGO_BIN_EXE_conductor"))
        .args(["parse", ">>research topic:'x' --> summary"])
        .output()
        .expect("conductor parse");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("\"steps\""));
    assert!(stdout.contains("\"research\""));
    assert!(stdout.contains("\"summary\""));
    assert!(stdout.contains("\"requires_session_state\": true"));
}

#[test]
fn parse_unknown_prompt_exits_nonzero() {
    let output = Command::new(env!("CARGO_BIN_EXE_conductor"))
        .args(["parse", ">>definitely_not_a_prompt"])
        .output()
        .expect("conductor parse");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("unknown prompt"));
}
