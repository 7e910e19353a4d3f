pub mod config;
pub mod errors;
pub mod gateway;
pub mod handoff;
pub mod hub;
pub mod session;
pub mod supervisor;
