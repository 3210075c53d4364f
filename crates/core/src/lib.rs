//! Core library for the bosun deploy orchestrator
//!
//! This crate contains the deploy/job execution engine: the command
//! execution primitive, job status and concurrent-safe output, the deploy
//! state machine with its buddy-approval gate, the lifecycle hook registry
//! for extensions, and the orchestrating deploy service. HTTP surfaces and
//! real persistence are the embedding application's concern; the engine
//! talks to them through the [`store::DeployStore`] and [`auth::AuthPolicy`]
//! traits.

pub mod auth;
pub mod deploy;
pub mod errors;
pub mod exec;
pub mod hooks;
pub mod job;
pub mod logging;
pub mod scanner;
pub mod service;
pub mod stage;
pub mod store;

/// Get the version of the core library
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
