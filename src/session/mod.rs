//! Session lifecycle: data model and the in-memory registry.

pub mod model;
pub mod store;

pub use model::{
    FailureKind, GenerationSession, JobUpdate, ProgressEvent, RequestParams, SessionEvent,
    SessionFailure, SessionKind, SessionStatus,
};
pub use store::SessionStore;
