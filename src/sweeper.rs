//! The expiry sweep.
//!
//! A background task that wakes on a fixed interval, finds tasks whose
//! deadline passed while incomplete, flips them to expired, and opens one
//! punishment each. Runs for the life of the process; ticks never overlap
//! (sequential awaits in one task), and the expired guard in the engine
//! makes a duplicate pass harmless anyway.

use crate::auth::SharedState;
use crate::world::PunishmentKind;
use chrono::Utc;
use std::time::Duration;

/// Spawn the sweep loop. `interval_secs` is a deployment parameter
/// (settings.json), not a logic parameter.
pub fn spawn(state: SharedState, interval_secs: u64) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
        loop {
            interval.tick().await;
            sweep_once(&state);
        }
    })
}

/// One sweep pass. Returns how many tasks were expired.
///
/// Candidates are collected under the read lock, then each is expired
/// under its own write-lock hold; expire_task re-checks eligibility so a
/// task completed in between is skipped. A flush failure is logged and
/// the pass moves on — one bad task never suppresses the rest of the
/// batch.
pub fn sweep_once(state: &SharedState) -> usize {
    let now = Utc::now();
    let candidates = {
        let world = state.world.read().unwrap();
        world.expirable(now)
    };

    let mut expired = 0;
    for task_id in candidates {
        let kind = PunishmentKind::random();
        let mut world = state.world.write().unwrap();
        let Some(event) = world.expire_task(task_id, now, kind) else {
            continue;
        };
        if let Err(e) = state.save_file.flush(&world, &event) {
            eprintln!("sweep: flush failed for task {task_id}: {e}");
        }
        expired += 1;
    }
    expired
}

// ── Tests ──────────────────────────────────────────────────────
