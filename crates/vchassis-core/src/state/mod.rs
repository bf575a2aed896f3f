//! Table-shaped access to the keyed stores of a running instance, and the
//! wait-for-state predicates built on the polling engine.

pub mod connector;
pub mod convergence;
pub mod view;

pub use connector::{Database, MemoryConnector, RedisCliConnector, StoreConnector};
pub use convergence::{ConvergenceAssertions, ConvergenceError};
pub use view::KeyedStateView;

use std::collections::BTreeMap;
use thiserror::Error;
use vchassis_runtime::CommandError;

/// Field -> value pairs of one key. Field names are unique and order is
/// irrelevant.
pub type Entry = BTreeMap<String, String>;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("store command failed: {0}")]
    Command(#[from] CommandError),
    #[error("malformed reply from {db}: {reply:?}")]
    Malformed { db: &'static str, reply: String },
}
