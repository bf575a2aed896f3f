use super::{Entry, KeyedStateView, StateError};
use crate::poll::{poll, PollError, Polled, PollingConfig};
use std::collections::BTreeSet;
use std::error::Error as StdError;
use std::fmt::Debug;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Key placeholder for waits that observe a whole table.
const ALL_KEYS: &str = "*";

#[derive(Debug, Error)]
pub enum ConvergenceError {
    #[error("{db} {table}[{key}] did not converge after {elapsed:?}: expected {expected}, last observed {observed}")]
    Timeout {
        db: &'static str,
        table: String,
        key: String,
        expected: String,
        observed: String,
        elapsed: Duration,
    },
    #[error("failed to read {db} {table}[{key}]: {source}")]
    Store {
        db: &'static str,
        table: String,
        key: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
    #[error("invalid polling config: {0}")]
    InvalidPolling(#[source] PollError),
}

fn to_entry(pairs: &[(&str, &str)]) -> Entry {
    pairs
        .iter()
        .map(|(f, v)| ((*f).to_owned(), (*v).to_owned()))
        .collect()
}

fn describe(pairs: &[(&str, &str)]) -> String {
    format!("{:?}", to_entry(pairs))
}

/// Named wait-for-state predicates over one table.
///
/// Every wait performs one read per attempt through the view and hands the
/// result to the polling engine. With a strict config a wait that never
/// converges fails with `ConvergenceError::Timeout`, naming the table, key,
/// expected condition and the last value seen. With a lenient config it
/// returns that last value with `converged == false`.
#[derive(Clone)]
pub struct ConvergenceAssertions {
    view: KeyedStateView,
    polling: PollingConfig,
}

impl ConvergenceAssertions {
    pub fn new(view: KeyedStateView) -> Self {
        Self {
            view,
            polling: PollingConfig::default(),
        }
    }

    /// Same table, different polling for the waits made through the result.
    #[must_use]
    pub fn with_polling(&self, polling: PollingConfig) -> Self {
        Self {
            view: self.view.clone(),
            polling,
        }
    }

    pub fn view(&self) -> &KeyedStateView {
        &self.view
    }

    pub fn polling(&self) -> &PollingConfig {
        &self.polling
    }

    fn wait<T, F>(&self, key: &str, expected: String, mut check: F) -> Result<Polled<T>, ConvergenceError>
    where
        T: Debug,
        F: FnMut(&KeyedStateView) -> Result<(bool, T), StateError>,
    {
        let db = self.view.db().name;
        let table = self.view.table().to_owned();
        debug!("waiting for {db} {table}[{key}]: {expected}");

        poll(&self.polling, || check(&self.view)).map_err(|e| match e {
            PollError::Timeout {
                elapsed,
                last_observed,
                ..
            } => ConvergenceError::Timeout {
                db,
                table,
                key: key.to_owned(),
                expected,
                observed: last_observed,
                elapsed,
            },
            PollError::Observation(source) => ConvergenceError::Store {
                db,
                table,
                key: key.to_owned(),
                source,
            },
            invalid @ PollError::InvalidInterval => ConvergenceError::InvalidPolling(invalid),
        })
    }

    /// Wait until `key` exists; returns its fields.
    pub fn wait_for_entry(&self, key: &str) -> Result<Polled<Entry>, ConvergenceError> {
        self.wait(key, "entry to exist".to_owned(), |view| {
            Ok(match view.get(key)? {
                Some(entry) => (true, entry),
                None => (false, Entry::new()),
            })
        })
    }

    /// Wait until `key` is absent or has no fields.
    pub fn wait_for_deleted_entry(&self, key: &str) -> Result<Polled<Entry>, ConvergenceError> {
        self.wait(key, "entry to be deleted".to_owned(), |view| {
            let entry = view.get(key)?.unwrap_or_default();
            Ok((entry.is_empty(), entry))
        })
    }

    /// Alias of `wait_for_deleted_entry`: an absent entry counts as empty.
    pub fn wait_for_empty_entry(&self, key: &str) -> Result<Polled<Entry>, ConvergenceError> {
        self.wait_for_deleted_entry(key)
    }

    /// Wait until the table holds exactly `n` keys. Too many keys is as much
    /// a failure as too few.
    pub fn wait_for_n_keys(&self, n: usize) -> Result<Polled<Vec<String>>, ConvergenceError> {
        self.wait(ALL_KEYS, format!("exactly {n} keys"), |view| {
            let keys = view.keys()?;
            Ok((keys.len() == n, keys))
        })
    }

    /// Wait until the table's key set equals `expected`.
    pub fn wait_for_matching_keys(&self, expected: &[&str]) -> Result<Polled<Vec<String>>, ConvergenceError> {
        let want: BTreeSet<&str> = expected.iter().copied().collect();
        self.wait(ALL_KEYS, format!("keys {want:?}"), |view| {
            let keys = view.keys()?;
            let have: BTreeSet<&str> = keys.iter().map(String::as_str).collect();
            Ok((have == want, keys))
        })
    }

    /// Wait until none of `deleted` is present in the table.
    pub fn wait_for_deleted_keys(&self, deleted: &[&str]) -> Result<Polled<Vec<String>>, ConvergenceError> {
        self.wait(ALL_KEYS, format!("keys {deleted:?} to be deleted"), |view| {
            let keys = view.keys()?;
            let gone = !keys.iter().any(|k| deleted.contains(&k.as_str()));
            Ok((gone, keys))
        })
    }

    /// Wait until every pair in `expected` holds; other fields are ignored.
    pub fn wait_for_field_match(&self, key: &str, expected: &[(&str, &str)]) -> Result<Polled<Entry>, ConvergenceError> {
        self.wait(key, format!("fields {}", describe(expected)), |view| {
            let entry = view.get(key)?.unwrap_or_default();
            let matched = !entry.is_empty()
                && expected
                    .iter()
                    .all(|(f, v)| entry.get(*f).is_some_and(|have| have == v));
            Ok((matched, entry))
        })
    }

    /// Wait until the entry exists and none of the `forbidden` pairs hold.
    /// An absent entry never satisfies this wait.
    pub fn wait_for_field_negative_match(
        &self,
        key: &str,
        forbidden: &[(&str, &str)],
    ) -> Result<Polled<Entry>, ConvergenceError> {
        self.wait(key, format!("entry to exist without {}", describe(forbidden)), |view| {
            Ok(match view.get(key)? {
                Some(entry) => {
                    let clear = !forbidden
                        .iter()
                        .any(|(f, v)| entry.get(*f).is_some_and(|have| have == v));
                    (clear, entry)
                }
                None => (false, Entry::new()),
            })
        })
    }

    /// Wait until every field in `fields` is present, whatever its value.
    pub fn wait_for_fields(&self, key: &str, fields: &[&str]) -> Result<Polled<Entry>, ConvergenceError> {
        self.wait(key, format!("fields {fields:?} present"), |view| {
            let entry = view.get(key)?.unwrap_or_default();
            let present = !entry.is_empty() && fields.iter().all(|f| entry.contains_key(*f));
            Ok((present, entry))
        })
    }

    /// Wait until the entry holds exactly `expected` and nothing else.
    pub fn wait_for_exact_match(&self, key: &str, expected: &[(&str, &str)]) -> Result<Polled<Entry>, ConvergenceError> {
        let want = to_entry(expected);
        self.wait(key, format!("exactly {want:?}"), |view| {
            Ok(match view.get(key)? {
                Some(entry) => (entry == want, entry),
                None => (false, Entry::new()),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Database, MemoryConnector};
    use std::sync::Arc;
    use std::thread;

    fn fixture(timeout_ms: u64, strict: bool) -> (KeyedStateView, ConvergenceAssertions) {
        let view = KeyedStateView::new(Arc::new(MemoryConnector::new()), Database::APPL, "T");
        let waits = ConvergenceAssertions::new(view.clone()).with_polling(PollingConfig::new(
            Duration::from_millis(5),
            Duration::from_millis(timeout_ms),
            strict,
        ));
        (view, waits)
    }

    #[test]
    fn entry_already_present() {
        let (view, waits) = fixture(100, true);
        view.set("k", &[("a", "1")]).unwrap();
        let polled = waits.wait_for_entry("k").unwrap();
        assert!(polled.converged);
        assert_eq!(polled.value["a"], "1");
    }

    #[test]
    fn strict_timeout_names_table_key_and_expectation() {
        let (_, waits) = fixture(20, true);
        let err = waits.wait_for_entry("missing").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("APPL_DB"), "{msg}");
        assert!(msg.contains("T[missing]"), "{msg}");
        assert!(msg.contains("entry to exist"), "{msg}");
    }

    #[test]
    fn lenient_timeout_returns_last_observation() {
        let (view, waits) = fixture(20, false);
        view.set("k", &[("state", "down")]).unwrap();
        let polled = waits.wait_for_field_match("k", &[("state", "up")]).unwrap();
        assert!(!polled.converged);
        assert_eq!(polled.value["state"], "down");
    }

    #[test]
    fn field_match_ignores_unmentioned_fields() {
        let (view, waits) = fixture(100, true);
        view.set("k", &[("state", "up"), ("mtu", "9100")]).unwrap();
        assert!(waits.wait_for_field_match("k", &[("state", "up")]).unwrap().converged);
    }

    #[test]
    fn exact_match_rejects_extra_fields() {
        let (view, waits) = fixture(20, false);
        view.set("k", &[("state", "up"), ("mtu", "9100")]).unwrap();
        assert!(!waits.wait_for_exact_match("k", &[("state", "up")]).unwrap().converged);
        assert!(waits
            .wait_for_exact_match("k", &[("state", "up"), ("mtu", "9100")])
            .unwrap()
            .converged);
    }

    #[test]
    fn negative_match_requires_existing_entry() {
        let (view, waits) = fixture(20, false);
        let polled = waits
            .wait_for_field_negative_match("k", &[("state", "up")])
            .unwrap();
        assert!(!polled.converged);

        view.set("k", &[("state", "up")]).unwrap();
        assert!(!waits
            .wait_for_field_negative_match("k", &[("state", "up")])
            .unwrap()
            .converged);

        view.set("k", &[("state", "down")]).unwrap();
        assert!(waits
            .wait_for_field_negative_match("k", &[("state", "up")])
            .unwrap()
            .converged);
    }

    #[test]
    fn n_keys_is_exact() {
        let (view, waits) = fixture(20, false);
        for k in ["a", "b", "c"] {
            view.set(k, &[("f", "v")]).unwrap();
        }
        assert!(!waits.wait_for_n_keys(2).unwrap().converged);
        assert!(!waits.wait_for_n_keys(4).unwrap().converged);
        assert!(waits.wait_for_n_keys(3).unwrap().converged);
    }

    #[test]
    fn deleted_entry_accepts_absent_or_empty() {
        let (view, waits) = fixture(20, false);
        assert!(waits.wait_for_deleted_entry("k").unwrap().converged);
        view.set("k", &[]).unwrap();
        assert!(waits.wait_for_empty_entry("k").unwrap().converged);
        view.set("k", &[("f", "v")]).unwrap();
        assert!(!waits.wait_for_deleted_entry("k").unwrap().converged);
    }

    #[test]
    fn empty_entry_wait_is_the_deleted_wait() {
        let (view, waits) = fixture(20, true);
        assert!(waits.wait_for_empty_entry("absent").unwrap().converged);

        view.set("k", &[("f", "v")]).unwrap();
        let empty = waits.wait_for_empty_entry("k").unwrap_err().to_string();
        let deleted = waits.wait_for_deleted_entry("k").unwrap_err().to_string();
        assert!(empty.contains("entry to be deleted"), "{empty}");
        assert_eq!(empty.split(" after ").next(), deleted.split(" after ").next());
    }

    #[test]
    fn fields_present_with_any_value() {
        let (view, waits) = fixture(20, false);
        view.set("k", &[("oid", "0x1000000000001")]).unwrap();
        assert!(waits.wait_for_fields("k", &["oid"]).unwrap().converged);
        assert!(!waits.wait_for_fields("k", &["oid", "lanes"]).unwrap().converged);
    }

    #[test]
    fn matching_and_deleted_keys() {
        let (view, waits) = fixture(20, false);
        view.set("a", &[("f", "v")]).unwrap();
        view.set("b", &[("f", "v")]).unwrap();
        assert!(waits.wait_for_matching_keys(&["b", "a"]).unwrap().converged);
        assert!(!waits.wait_for_matching_keys(&["a"]).unwrap().converged);
        assert!(waits.wait_for_deleted_keys(&["c"]).unwrap().converged);
        assert!(!waits.wait_for_deleted_keys(&["a", "c"]).unwrap().converged);
    }

    #[test]
    fn entry_written_by_concurrent_producer() {
        let (view, waits) = fixture(2000, true);
        let producer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            view.set("k", &[("admin_status", "up")]).unwrap();
        });
        let polled = waits.wait_for_entry("k").unwrap();
        producer.join().unwrap();
        assert!(polled.converged);
        assert_eq!(polled.value["admin_status"], "up");
    }

    #[test]
    fn zero_interval_is_reported() {
        let (_, waits) = fixture(20, true);
        let waits = waits.with_polling(PollingConfig::new(Duration::ZERO, Duration::ZERO, true));
        assert!(matches!(
            waits.wait_for_entry("k"),
            Err(ConvergenceError::InvalidPolling(_))
        ));
    }
}
