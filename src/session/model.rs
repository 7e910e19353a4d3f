//! Core data model for generation sessions.
//!
//! A session is one document-generation job shared by three actors: the
//! browser tab that mints the id, this backend, and the locally installed
//! analyzer launched through an OS deep link. The backend never mints
//! session ids; it learns of one at pre-registration.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which result shape the session produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    /// One generated document (e.g. a single test scenario).
    SingleArtifact,
    /// A batch of documents driven by a pre-parsed metadata blob.
    MultiArtifact,
}

/// Lifecycle status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Pre-registered, deep link not yet handed out.
    Created,
    /// Deep link handed to the Control Surface for OS dispatch.
    Dispatched,
    /// At least one analyzer progress report accepted.
    Running,
    Completed,
    Error,
    TimedOut,
}

impl SessionStatus {
    /// Terminal states permit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Error | SessionStatus::TimedOut
        )
    }
}

/// Why a session ended in a failure state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// No first report inside the fast-fail window; the OS likely never
    /// launched the analyzer (protocol handler not installed).
    AnalyzerNotLaunched,
    /// The analyzer reported in at least once but never delivered a
    /// terminal report inside the long deadline.
    AnalyzerTimeout,
    /// The analyzer itself reported failure (bad repo path, LLM
    /// unreachable, ...). Message propagated verbatim.
    AnalyzerReportedError,
}

impl FailureKind {
    /// The terminal status a failure of this kind drives the session into.
    pub fn terminal_status(&self) -> SessionStatus {
        match self {
            FailureKind::AnalyzerTimeout => SessionStatus::TimedOut,
            FailureKind::AnalyzerNotLaunched | FailureKind::AnalyzerReportedError => {
                SessionStatus::Error
            }
        }
    }
}

/// Structured failure stored on the session, set exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl SessionFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Parameters handed to the analyzer through the deep link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestParams {
    /// Local repository the analyzer should diff.
    pub repo_path: String,
    /// Free-form analyzer options, passed through as query parameters.
    #[serde(default)]
    pub options: BTreeMap<String, String>,
    /// Pre-parsed metadata document for multi-artifact generation.
    /// Travels base64-encoded because it can exceed loose-parameter sizes.
    #[serde(default)]
    pub metadata: Option<Value>,
}

/// Inbound progress report from the analyzer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Percentage 0-100.
    pub progress: u8,
    /// Human-readable status line.
    #[serde(default)]
    pub message: String,
    /// Free-form key/value details.
    #[serde(default)]
    pub details: BTreeMap<String, Value>,
    /// Monotonic counter minted by the analyzer; reports at or below the
    /// last applied sequence are dropped as stale.
    pub sequence: u64,
}

/// A state change funneled through the store's `apply` path.
///
/// Every mutation of a registered session, including the supervisor's
/// forced timeouts, is expressed as one of these.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Progress(ProgressEvent),
    Completed {
        /// `None` when the analyzer omits a sequence on its final report.
        sequence: Option<u64>,
        result: Value,
    },
    Failed {
        /// `None` for supervisor-forced transitions, which carry no
        /// analyzer sequence.
        sequence: Option<u64>,
        failure: SessionFailure,
    },
}

impl SessionEvent {
    pub(crate) fn sequence(&self) -> Option<u64> {
        match self {
            SessionEvent::Progress(ev) => Some(ev.sequence),
            SessionEvent::Completed { sequence, .. } => *sequence,
            SessionEvent::Failed { sequence, .. } => *sequence,
        }
    }
}

/// One generation job, the unit of work owned by the session store.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationSession {
    pub id: String,
    pub kind: SessionKind,
    pub status: SessionStatus,
    /// 0-100, non-decreasing while running.
    pub progress: u8,
    /// Last human-readable status line.
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub last_event_at: DateTime<Utc>,
    pub request_params: RequestParams,
    /// Highest analyzer sequence applied so far, `None` before the first
    /// sequenced event. Kept optional so an analyzer whose counter starts
    /// at 0 is not rejected on its first report.
    #[serde(skip)]
    pub last_sequence: Option<u64>,
    /// Populated exactly once, on the transition into `Completed`.
    pub result: Option<Value>,
    /// Populated exactly once, on the transition into `Error`/`TimedOut`.
    pub error: Option<SessionFailure>,
}

impl GenerationSession {
    pub fn new(id: impl Into<String>, kind: SessionKind, params: RequestParams) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            kind,
            status: SessionStatus::Created,
            progress: 0,
            message: String::new(),
            created_at: now,
            last_event_at: now,
            request_params: params,
            last_sequence: None,
            result: None,
            error: None,
        }
    }
}

/// Wire document pushed to a progress subscriber on every accepted
/// transition. The terminal update carries the result or failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobUpdate {
    pub status: SessionStatus,
    pub progress: u8,
    pub message: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<SessionFailure>,
}

impl JobUpdate {
    /// Snapshot the subscriber-visible state of a session, attaching the
    /// details of the event that triggered the transition.
    pub fn from_session(session: &GenerationSession, details: BTreeMap<String, Value>) -> Self {
        Self {
            status: session.status,
            progress: session.progress,
            message: session.message.clone(),
            details,
            result: session.result.clone(),
            error: session.error.clone(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
