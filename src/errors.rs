//! Typed error hierarchy for the orchestration core.
//!
//! `StoreError` is the single mutation-rejection vocabulary of the session
//! store; the callback gateway translates it into the wire-level status
//! codes (404/409/422) in `gateway::api`.

use thiserror::Error;

use crate::session::model::SessionStatus;

/// Rejections from the session store's CAS-style mutation contract.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Session {id} already registered")]
    DuplicateId { id: String },

    #[error("Session {id} not found (never registered or already reaped)")]
    NotFound { id: String },

    #[error("Stale event for session {id}: sequence {sequence} <= last applied {last_applied}")]
    StaleEvent {
        id: String,
        sequence: u64,
        last_applied: u64,
    },

    #[error("Session {id} already terminal ({status:?})")]
    AlreadyTerminal { id: String, status: SessionStatus },
}
