//! Admin subcommands.

use serde_json::Value;

use crate::api::{Core, Workers};
use crate::types::Result;

pub fn force_close(core: &Core, horizon_hours: Option<i64>) -> Result<Value> {
    let closed = core.admin_force_close(horizon_hours)?;
    Ok(serde_json::json!({ "closed_transactions": closed }))
}

pub fn reap_contexts(core: &Core) -> Result<Value> {
    let reaped = core.admin_reap_contexts()?;
    Ok(serde_json::json!({ "reaped": reaped }))
}

pub fn reconcile(core: &Core) -> Result<Value> {
    let cleared = core.admin_reconcile()?;
    Ok(serde_json::json!({ "reconciled_notes": cleared }))
}

/// Run the enabled background workers in the foreground.
///
/// With `duration_secs = 0` this blocks until the process is killed; any
/// other value runs the workers for that long, then joins them.
pub fn daemon(core: &Core, duration_secs: u64) -> Result<Value> {
    let mut config = core.config().clone();
    // The daemon exists to run the workers; enable both for its lifetime.
    config.background.drift_sweeper = true;
    config.background.checkpoint_reconciler = true;

    let workers = Workers::spawn(core.shared_db(), &config, core.git_notes());
    tracing::info!("Background workers running (drift sweeper + reconciler)");

    if duration_secs == 0 {
        loop {
            std::thread::sleep(std::time::Duration::from_secs(60));
        }
    }

    std::thread::sleep(std::time::Duration::from_secs(duration_secs));
    workers.shutdown();
    Ok(serde_json::json!({ "ran_secs": duration_secs }))
}
