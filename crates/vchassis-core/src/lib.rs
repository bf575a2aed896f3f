//! Topology provisioning, verification and convergence polling for vchassis.
//!
//! `Provisioner` realizes a `TopologySpec` as namespaces, bridges, interface
//! pairs and instances through an injected `CommandRunner`, recording every
//! step in a `ProvisionReport`, and tears it down again. `Verifier` runs
//! read-only checks against the result. Independently, `poll` turns a single
//! observation into a bounded retry, and `state::ConvergenceAssertions`
//! builds named wait-for-state predicates on top of it over a
//! `state::KeyedStateView`.

pub mod concurrency;
pub mod config;
pub mod context;
pub mod poll;
pub mod provision;
pub mod report;
pub mod state;
pub mod verify;

pub use concurrency::{install_signal_handler, lock_path_for, shutdown_requested, TopologyLock};
pub use config::{default_settings_path, PollingSettings, Settings};
pub use context::TopologyContext;
pub use poll::{poll, PollError, Polled, PollingConfig};
pub use provision::Provisioner;
pub use report::{ProvisionReport, RunningInstance, StepOutcome, StepRecord, StepTally};
pub use verify::{CheckKind, CheckResult, VerificationReport, Verifier};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("topology error: {0}")]
    Schema(#[from] vchassis_schema::SchemaError),
    #[error("runtime error: {0}")]
    Runtime(#[from] vchassis_runtime::RuntimeError),
    #[error("invalid settings: {0}")]
    Settings(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
