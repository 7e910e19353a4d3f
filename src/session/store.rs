//! In-memory session registry, the single source of truth for job state.
//!
//! All mutation funnels through [`SessionStore::apply`], a compare-and-swap
//! style contract keyed by session id: events carrying a sequence at or
//! below the last applied one are rejected as stale, and nothing ever
//! overwrites a terminal session. Concurrent callbacks for the same id are
//! serialized by the registry lock, and accepted transitions are handed to
//! the progress hub while that lock is still held, so the order a
//! subscriber observes is the apply order. The hub's publish path never
//! blocks, so a slow subscriber cannot extend the critical section.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use crate::errors::StoreError;
use crate::hub::ProgressHub;
use crate::session::model::{
    FailureKind, GenerationSession, JobUpdate, RequestParams, SessionEvent, SessionKind,
    SessionStatus,
};

/// Process-wide registry of generation sessions.
pub struct SessionStore {
    sessions: Mutex<HashMap<String, GenerationSession>>,
    hub: Arc<ProgressHub>,
}

impl SessionStore {
    pub fn new(hub: Arc<ProgressHub>) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            hub,
        }
    }

    pub fn hub(&self) -> &Arc<ProgressHub> {
        &self.hub
    }

    /// Pre-register a session under a Control-Surface-minted id.
    ///
    /// Registration happens strictly before the deep link is handed out,
    /// which closes the window where the analyzer could call back before
    /// anything exists to route the event to.
    pub fn create(
        &self,
        id: &str,
        kind: SessionKind,
        params: RequestParams,
    ) -> Result<GenerationSession, StoreError> {
        let session = {
            let mut sessions = self.sessions.lock().expect("store lock poisoned");
            if sessions.contains_key(id) {
                return Err(StoreError::DuplicateId { id: id.to_string() });
            }
            let session = GenerationSession::new(id, kind, params);
            sessions.insert(id.to_string(), session.clone());
            session
        };
        self.hub.register(id);
        info!(session_id = %id, kind = ?kind, "session registered");
        Ok(session)
    }

    /// Snapshot of the current session state.
    pub fn get(&self, id: &str) -> Result<GenerationSession, StoreError> {
        let sessions = self.sessions.lock().expect("store lock poisoned");
        sessions
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() })
    }

    /// Record that the deep link has been handed to the Control Surface.
    ///
    /// Idempotent past `Created`: a session already running is left alone,
    /// a terminal one is rejected.
    pub fn mark_dispatched(&self, id: &str) -> Result<GenerationSession, StoreError> {
        let mut sessions = self.sessions.lock().expect("store lock poisoned");
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() })?;
        if session.status.is_terminal() {
            return Err(StoreError::AlreadyTerminal {
                id: id.to_string(),
                status: session.status,
            });
        }
        let transitioned = session.status == SessionStatus::Created;
        if transitioned {
            session.status = SessionStatus::Dispatched;
            session.last_event_at = Utc::now();
        }
        let session = session.clone();
        if transitioned {
            // Published under the registry lock to keep the subscriber's
            // view in apply order; the hub never blocks.
            self.hub
                .publish(id, JobUpdate::from_session(&session, Default::default()));
        }
        Ok(session)
    }

    /// Apply a state-changing event and publish the accepted transition.
    ///
    /// This is the only mutation path shared by analyzer callbacks and the
    /// timeout supervisor, which is what guarantees exactly one terminal
    /// update ever reaches a subscriber.
    pub fn apply(&self, id: &str, event: SessionEvent) -> Result<GenerationSession, StoreError> {
        let session = {
            let mut sessions = self.sessions.lock().expect("store lock poisoned");
            let session = sessions
                .get_mut(id)
                .ok_or_else(|| StoreError::NotFound { id: id.to_string() })?;

            if session.status.is_terminal() {
                return Err(StoreError::AlreadyTerminal {
                    id: id.to_string(),
                    status: session.status,
                });
            }
            if let Some(sequence) = event.sequence() {
                if let Some(last_applied) = session.last_sequence {
                    if sequence <= last_applied {
                        return Err(StoreError::StaleEvent {
                            id: id.to_string(),
                            sequence,
                            last_applied,
                        });
                    }
                }
                session.last_sequence = Some(sequence);
            }
            session.last_event_at = Utc::now();

            let details = match event {
                SessionEvent::Progress(ev) => {
                    session.status = SessionStatus::Running;
                    // Progress only moves forward, even if a newer report
                    // carries a smaller percentage.
                    session.progress = session.progress.max(ev.progress.min(100));
                    if !ev.message.is_empty() {
                        session.message = ev.message;
                    }
                    ev.details
                }
                SessionEvent::Completed { result, .. } => {
                    session.status = SessionStatus::Completed;
                    session.progress = 100;
                    session.result = Some(result);
                    Default::default()
                }
                SessionEvent::Failed { failure, .. } => {
                    session.status = failure.kind.terminal_status();
                    session.message = failure.message.clone();
                    session.error = Some(failure);
                    Default::default()
                }
            };
            let session = session.clone();
            // Published under the registry lock: the hub never blocks, and
            // this keeps the subscriber-observed order equal to the apply
            // order.
            self.hub
                .publish(id, JobUpdate::from_session(&session, details));
            session
        };

        if session.status.is_terminal() {
            info!(session_id = %id, status = ?session.status, "session reached terminal state");
        } else {
            debug!(session_id = %id, progress = session.progress, "progress applied");
        }
        Ok(session)
    }

    /// Non-terminal sessions that have outlived one of the supervisor's
    /// deadlines, with the failure kind each should be forced into.
    ///
    /// A session that never produced a progress report inside
    /// `fast_fail_window` is treated as "analyzer never launched"; one that
    /// did report but is still open past `long_deadline` as "launched but
    /// stuck".
    pub fn timeout_candidates(
        &self,
        now: DateTime<Utc>,
        fast_fail_window: Duration,
        long_deadline: Duration,
    ) -> Vec<(String, FailureKind)> {
        let sessions = self.sessions.lock().expect("store lock poisoned");
        sessions
            .values()
            .filter(|s| !s.status.is_terminal())
            .filter_map(|s| {
                let age = now - s.created_at;
                match s.status {
                    SessionStatus::Created | SessionStatus::Dispatched
                        if age > fast_fail_window =>
                    {
                        Some((s.id.clone(), FailureKind::AnalyzerNotLaunched))
                    }
                    _ if age > long_deadline => {
                        Some((s.id.clone(), FailureKind::AnalyzerTimeout))
                    }
                    _ => None,
                }
            })
            .collect()
    }

    /// Remove terminal sessions past the grace period, plus any non-terminal
    /// session past the abandonment window (backstop for a supervisor that
    /// is not running). Returns the number of sessions removed.
    pub fn reap(
        &self,
        now: DateTime<Utc>,
        terminal_grace: Duration,
        abandoned_after: Duration,
    ) -> usize {
        let removed: Vec<String> = {
            let mut sessions = self.sessions.lock().expect("store lock poisoned");
            let ids: Vec<String> = sessions
                .values()
                .filter(|s| {
                    if s.status.is_terminal() {
                        now - s.last_event_at > terminal_grace
                    } else {
                        now - s.created_at > abandoned_after
                    }
                })
                .map(|s| s.id.clone())
                .collect();
            for id in &ids {
                sessions.remove(id);
            }
            ids
        };
        for id in &removed {
            self.hub.remove(id);
            debug!(session_id = %id, "session reaped");
        }
        removed.len()
    }

    /// Number of live sessions, terminal or not.
    pub fn len(&self) -> usize {
        self.sessions.lock().expect("store lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
