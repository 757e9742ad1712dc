//! Background workers: drift sweeper and checkpoint reconciler.
//!
//! Both are optional, off by default, idempotent per pass, and join on
//! shutdown. Each is a plain thread looping on an interval with a shared
//! stop flag; there is no hidden work beyond these two.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::checkpoint::{CheckpointLayer, GitNotes};
use crate::config::Config;
use crate::drift::{self, DriftSeverity};
use crate::store::SharedDatabase;

/// Handle over the spawned workers; drop or call [`Workers::shutdown`].
pub struct Workers {
    stop: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl Workers {
    /// Spawn whichever workers the config enables. With both disabled this
    /// returns an empty handle and spawns nothing.
    pub fn spawn(db: SharedDatabase, config: &Config, git: Option<GitNotes>) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let mut handles = Vec::new();

        if config.background.drift_sweeper {
            let db = db.clone();
            let drift_config = config.drift.clone();
            let interval = Duration::from_secs(config.background.drift_sweep_interval_secs);
            let stop_flag = stop.clone();
            handles.push(std::thread::spawn(move || {
                run_periodic(&stop_flag, interval, || sweep_drift(&db, &drift_config));
            }));
        }

        if config.background.checkpoint_reconciler {
            let db = db.clone();
            let interval = Duration::from_secs(config.background.reconcile_interval_secs);
            let stop_flag = stop.clone();
            // Re-discover per pass; a GitNotes handle is cheap and this keeps
            // the worker correct across repository moves.
            let repo_root = git.as_ref().map(|g| g.repo_root().to_path_buf());
            let notes_ref = config.git.notes_ref.clone();
            let timeout_secs = config.git.command_timeout_secs;
            handles.push(std::thread::spawn(move || {
                run_periodic(&stop_flag, interval, || {
                    let git = repo_root
                        .as_deref()
                        .and_then(|root| GitNotes::discover(root, &notes_ref, timeout_secs));
                    let layer = CheckpointLayer::new(&db, git);
                    if let Err(e) = layer.reconcile(64) {
                        tracing::warn!("Checkpoint reconciler pass failed: {}", e);
                    }
                });
            }));
        }

        Self { stop, handles }
    }

    /// Signal both workers and join them.
    pub fn shutdown(mut self) {
        self.stop.store(true, Ordering::SeqCst);
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                tracing::warn!("Background worker panicked during shutdown");
            }
        }
    }
}

impl Drop for Workers {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

/// Loop `pass` every `interval`, polling the stop flag often enough that
/// shutdown never waits for a full interval.
fn run_periodic(stop: &AtomicBool, interval: Duration, mut pass: impl FnMut()) {
    let tick = Duration::from_millis(100);
    loop {
        pass();
        let mut waited = Duration::ZERO;
        while waited < interval {
            if stop.load(Ordering::SeqCst) {
                return;
            }
            std::thread::sleep(tick);
            waited += tick;
        }
        if stop.load(Ordering::SeqCst) {
            return;
        }
    }
}

/// One sweep: write drift advisories for every open session.
fn sweep_drift(db: &SharedDatabase, config: &crate::config::DriftConfig) {
    let sessions = match db.list_sessions(None, true, 256) {
        Ok(sessions) => sessions,
        Err(e) => {
            tracing::warn!("Drift sweep cannot list sessions: {}", e);
            return;
        }
    };

    for session in sessions {
        match drift::analyze(db, &session.session_id, config) {
            Ok(report) if report.severity == DriftSeverity::Severe => {
                if let Err(e) = db.flag_session_drift(&session.session_id) {
                    tracing::warn!("Failed to flag drift on {}: {}", session.session_id, e);
                } else {
                    tracing::info!(
                        session_id = %session.session_id,
                        magnitude = report.magnitude,
                        "Drift advisory written"
                    );
                }
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("Drift sweep failed for {}: {}", session.session_id, e),
        }
    }
}
