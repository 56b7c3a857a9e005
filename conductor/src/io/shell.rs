//! Shell-verification gates: pass/fail is a subprocess exit code.
//!
//! Non-zero exit, timeout, and spawn failure are all uniformly a gate FAIL
//! with captured output as the rationale — never an engine error. The
//! subprocess is killed when its budget is exceeded.

use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Duration;

use anyhow::Context;
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

use crate::core::gates::ShellCheck;

/// One shell check invocation.
#[derive(Debug, Clone)]
pub struct ShellCheckRequest {
    pub command: Vec<String>,
    pub workdir: PathBuf,
    pub attempts: u32,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

impl ShellCheckRequest {
    pub fn from_check(check: &ShellCheck, workdir: PathBuf, output_limit_bytes: usize) -> Self {
        Self {
            command: check.command.clone(),
            workdir,
            attempts: check.effective_attempts(),
            timeout: check.effective_timeout(),
            output_limit_bytes,
        }
    }
}

/// Verdict-shaped outcome of a shell check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellCheckOutcome {
    pub passed: bool,
    pub rationale: String,
    pub attempts_used: u32,
}

/// Seam for tests; the engine only sees this trait.
pub trait ShellVerifier: Send + Sync {
    fn verify(&self, request: &ShellCheckRequest) -> ShellCheckOutcome;
}

/// Spawns the command via the system shell runner.
pub struct SystemShellVerifier;

impl ShellVerifier for SystemShellVerifier {
    #[instrument(skip_all, fields(attempts = request.attempts, timeout_secs = request.timeout.as_secs()))]
    fn verify(&self, request: &ShellCheckRequest) -> ShellCheckOutcome {
        if request.command.is_empty() {
            return ShellCheckOutcome {
                passed: false,
                rationale: "shell check has an empty command".to_string(),
                attempts_used: 0,
            };
        }

        let attempts = request.attempts.max(1);
        let mut last_rationale = String::new();
        for attempt in 1..=attempts {
            match run_once(request) {
                Ok(()) => {
                    debug!(attempt, "shell check passed");
                    return ShellCheckOutcome {
                        passed: true,
                        rationale: format!("command succeeded on attempt {attempt}"),
                        attempts_used: attempt,
                    };
                }
                Err(rationale) => {
                    warn!(attempt, rationale = %rationale, "shell check attempt failed");
                    last_rationale = rationale;
                }
            }
        }

        ShellCheckOutcome {
            passed: false,
            rationale: last_rationale,
            attempts_used: attempts,
        }
    }
}

/// One attempt. The error string is the FAIL rationale.
fn run_once(request: &ShellCheckRequest) -> Result<(), String> {
    let mut cmd = Command::new(&request.command[0]);
    cmd.args(&request.command[1..])
        .current_dir(&request.workdir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let child = cmd
        .spawn()
        .with_context(|| format!("spawn {:?}", request.command));
    let mut child = match child {
        Ok(child) => child,
        Err(err) => return Err(format!("spawn failure: {err:#}")),
    };

    let status = match child.wait_timeout(request.timeout) {
        Ok(Some(status)) => status,
        Ok(None) => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(format!(
                "timed out after {}s and was killed",
                request.timeout.as_secs()
            ));
        }
        Err(err) => {
            let _ = child.kill();
            return Err(format!("wait failure: {err}"));
        }
    };

    let output = match child.wait_with_output() {
        Ok(output) => output,
        Err(err) => return Err(format!("collect output failure: {err}")),
    };

    if status.success() {
        return Ok(());
    }

    let mut rationale = format!("exit code {:?}", status.code());
    let stdout = truncated(&output.stdout, request.output_limit_bytes);
    let stderr = truncated(&output.stderr, request.output_limit_bytes);
    if !stdout.is_empty() {
        rationale.push_str("\nstdout:\n");
        rationale.push_str(&stdout);
    }
    if !stderr.is_empty() {
        rationale.push_str("\nstderr:\n");
        rationale.push_str(&stderr);
    }
    Err(rationale)
}

fn truncated(bytes: &[u8], limit: usize) -> String {
    let text = String::from_utf8_lossy(bytes);
    if text.len() <= limit {
        return text.trim_end().to_string();
    }
    let mut cut = limit;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}\n[truncated {} bytes]", &text[..cut], text.len() - cut)
}
