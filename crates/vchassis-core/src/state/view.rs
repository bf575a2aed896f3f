use super::{Database, Entry, StateError, StoreConnector};
use std::sync::Arc;

/// One table of one database, bound to a connector.
#[derive(Clone)]
pub struct KeyedStateView {
    connector: Arc<dyn StoreConnector>,
    db: Database,
    table: String,
}

impl KeyedStateView {
    pub fn new(connector: Arc<dyn StoreConnector>, db: Database, table: &str) -> Self {
        Self {
            connector,
            db,
            table: table.to_owned(),
        }
    }

    pub fn db(&self) -> Database {
        self.db
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn get(&self, key: &str) -> Result<Option<Entry>, StateError> {
        self.connector.get(self.db, &self.table, key)
    }

    pub fn set(&self, key: &str, fields: &[(&str, &str)]) -> Result<(), StateError> {
        let entry: Entry = fields
            .iter()
            .map(|(f, v)| ((*f).to_owned(), (*v).to_owned()))
            .collect();
        self.connector.set(self.db, &self.table, key, &entry)
    }

    pub fn delete(&self, key: &str) -> Result<(), StateError> {
        self.connector.delete(self.db, &self.table, key)
    }

    pub fn keys(&self) -> Result<Vec<String>, StateError> {
        self.connector.keys(self.db, &self.table)
    }

    /// Full listing filtered client-side; the connector has no prefix query.
    pub fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StateError> {
        let mut keys = self.keys()?;
        keys.retain(|k| k.starts_with(prefix));
        Ok(keys)
    }
}
