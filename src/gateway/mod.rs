//! Callback gateway: the HTTP surface shared by the Control Surface and
//! the analyzer process.

pub mod api;
pub mod server;
pub mod stream;

pub use api::{ApiError, AppState, SharedState, gateway_router};
pub use server::{build_router, build_state, start_server};
