//! Watches sessions for analyzer silence and forces terminal states.
//!
//! Two failure hypotheses get two distinct deadlines. A session with no
//! first progress report inside the short fast-fail window is treated as
//! "the analyzer never launched" (protocol handler missing, OS refused the
//! deep link) and fails fast. A session that did report in gets the long
//! deadline, sized for an LLM call plus document generation, and times out
//! as "launched but stuck". Both transitions go through the store's normal
//! `apply` path, so subscribers see exactly one terminal update either way
//! and can never hang indefinitely.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::config::TimeoutConfig;
use crate::errors::StoreError;
use crate::session::model::{FailureKind, SessionEvent, SessionFailure};
use crate::session::store::SessionStore;

pub struct TimeoutSupervisor {
    store: Arc<SessionStore>,
    timeouts: TimeoutConfig,
}

impl TimeoutSupervisor {
    pub fn new(store: Arc<SessionStore>, timeouts: TimeoutConfig) -> Self {
        Self { store, timeouts }
    }

    /// Run the periodic sweep until the shutdown signal arrives.
    pub fn spawn(self, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.timeouts.sweep_interval());
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        self.sweep(Utc::now());
                    }
                    _ = shutdown.recv() => break,
                }
            }
        })
    }

    /// One pass over the store: force expired sessions terminal, then reap.
    /// Returns the number of sessions forced into a terminal state.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let candidates = self.store.timeout_candidates(
            now,
            self.timeouts.fast_fail_window(),
            self.timeouts.long_deadline(),
        );

        let mut forced = 0;
        for (id, kind) in candidates {
            let message = match kind {
                FailureKind::AnalyzerNotLaunched => {
                    "the local analyzer never reported in; it may not be installed".to_string()
                }
                FailureKind::AnalyzerTimeout => format!(
                    "generation did not finish within {}s; the analyzer may have crashed",
                    self.timeouts.long_deadline_secs
                ),
                // Only the analyzer itself produces this kind.
                FailureKind::AnalyzerReportedError => continue,
            };
            let event = SessionEvent::Failed {
                sequence: None,
                failure: SessionFailure::new(kind, message),
            };
            match self.store.apply(&id, event) {
                Ok(_) => {
                    warn!(session_id = %id, kind = ?kind, "session forced terminal by supervisor");
                    forced += 1;
                }
                // A real report won the race between snapshot and apply.
                Err(StoreError::AlreadyTerminal { .. }) => {}
                Err(err) => {
                    debug!(session_id = %id, %err, "supervisor transition rejected");
                }
            }
        }

        let reaped = self.store.reap(
            now,
            self.timeouts.terminal_grace(),
            self.timeouts.abandoned_after(),
        );
        if reaped > 0 {
            debug!(reaped, "reaper removed sessions");
        }
        forced
    }
}
