//! Engine crate – health probes and bounded self-healing for the netmon stack.
//!
//! This crate holds the whole core: probes, failure classification, the
//! troubleshooting guide table, the auto-resolver and the orchestrator.
//! Network, DNS, database and container access sit behind the traits in
//! [`traits`], so the CLI wires real implementations and tests wire fakes.
//! Logging setup is left to the caller; the engine only emits `tracing`
//! events.

pub mod classify;
pub mod context;
pub mod guides;
pub mod orchestrator;
pub mod platform;
pub mod probes;
pub mod resolution;
pub mod settings;
pub mod traits;
pub mod types;

#[cfg(test)]
mod fakes;

// Re-exports for convenience
pub use context::AppContext;
pub use orchestrator::{EngineError, Orchestrator};
pub use resolution::{AutoResolver, MAX_ATTEMPTS};
pub use settings::Settings;
pub use types::{Disposition, ErrorKind, Report, ServiceId, Severity, TestError};
