//! Expiry sweeping for sessions and temporary gates.
//!
//! The sweeper is low priority: the engine also sweeps lazily at request
//! entry, so embedders that never spawn the thread still converge.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::io::gate_store::TemporaryGateRegistry;
use crate::io::session_store::SessionStore;

/// What one sweep pass removed or expired.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub sessions_expired: usize,
    pub gates_removed: usize,
}

/// Run one sweep pass: mark idle sessions past TTL as expired (their gates
/// are cleaned up with them) and drop expired temporary gates.
pub fn sweep_once(
    store: &dyn SessionStore,
    gates: &TemporaryGateRegistry,
    now: DateTime<Utc>,
) -> Result<SweepReport> {
    let mut report = SweepReport::default();

    for session_id in store.list_ids()? {
        let Some(mut session) = store.load(&session_id)? else {
            continue;
        };
        if session.state.is_terminal() || !session.is_expired(now) {
            continue;
        }
        session.mark_expired();
        store.save(&session)?;
        report.gates_removed += gates.remove_chain(&session_id)?;
        report.sessions_expired += 1;
        debug!(session_id, "session expired by sweep");
    }

    report.gates_removed += gates.sweep_expired(now)?;
    Ok(report)
}

/// Spawn the periodic sweeper thread. Errors are logged, never fatal.
pub fn spawn_sweeper(
    store: Arc<dyn SessionStore>,
    gates: Arc<TemporaryGateRegistry>,
    interval: Duration,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        loop {
            thread::sleep(interval);
            match sweep_once(store.as_ref(), gates.as_ref(), Utc::now()) {
                Ok(report) => {
                    if report.sessions_expired > 0 || report.gates_removed > 0 {
                        debug!(?report, "sweep pass finished");
                    }
                }
                Err(err) => warn!(%err, "sweep pass failed"),
            }
        }
    })
}
