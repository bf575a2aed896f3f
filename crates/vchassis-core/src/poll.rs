use std::error::Error as StdError;
use std::fmt::Debug;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::trace;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(20);

/// Retry interval, maximum wait and timeout severity of a poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollingConfig {
    pub interval: Duration,
    pub timeout: Duration,
    /// A strict poll turns a timeout into `PollError::Timeout`; a lenient one
    /// returns the last observation with `converged == false`.
    pub strict: bool,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_POLL_TIMEOUT,
            strict: true,
        }
    }
}

impl PollingConfig {
    pub fn new(interval: Duration, timeout: Duration, strict: bool) -> Self {
        Self {
            interval,
            timeout,
            strict,
        }
    }

    #[must_use]
    pub fn lenient(mut self) -> Self {
        self.strict = false;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<(), PollError> {
        if self.interval.is_zero() {
            return Err(PollError::InvalidInterval);
        }
        Ok(())
    }
}

/// Result of a poll that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Polled<T> {
    pub converged: bool,
    /// Value returned by the last predicate invocation.
    pub value: T,
    pub elapsed: Duration,
    pub attempts: u32,
}

#[derive(Debug, Error)]
pub enum PollError {
    #[error("polling interval must be greater than zero")]
    InvalidInterval,
    #[error("observation failed: {0}")]
    Observation(#[source] Box<dyn StdError + Send + Sync>),
    #[error("timed out after {elapsed:?} ({attempts} attempts), last observed {last_observed}")]
    Timeout {
        elapsed: Duration,
        attempts: u32,
        last_observed: String,
    },
}

/// Evaluate `predicate` until it reports success or `config.timeout` has
/// elapsed since the first evaluation.
///
/// The predicate runs at least once, even with a zero timeout. Between
/// attempts the loop sleeps `config.interval`, shortened so that it never
/// sleeps past the deadline. A predicate error aborts the poll at once with
/// `PollError::Observation`; it is never treated as "not converged yet".
pub fn poll<T, E, F>(config: &PollingConfig, mut predicate: F) -> Result<Polled<T>, PollError>
where
    T: Debug,
    E: Into<Box<dyn StdError + Send + Sync>>,
    F: FnMut() -> Result<(bool, T), E>,
{
    config.validate()?;

    let start = Instant::now();
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        let (done, value) = predicate().map_err(|e| PollError::Observation(e.into()))?;
        let elapsed = start.elapsed();

        if done {
            trace!("converged after {attempts} attempts in {elapsed:?}");
            return Ok(Polled {
                converged: true,
                value,
                elapsed,
                attempts,
            });
        }

        if elapsed >= config.timeout {
            if config.strict {
                return Err(PollError::Timeout {
                    elapsed,
                    attempts,
                    last_observed: format!("{value:?}"),
                });
            }
            return Ok(Polled {
                converged: false,
                value,
                elapsed,
                attempts,
            });
        }

        trace!("attempt {attempts} not converged: {value:?}");
        thread::sleep(config.interval.min(config.timeout - elapsed));
    }
}
