use super::{Entry, StateError};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::trace;
use vchassis_runtime::{CommandRunner, HostCommand};

/// A numbered keyspace of the instance-local store, with the separator its
/// writers place between table name and key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Database {
    pub index: u32,
    pub name: &'static str,
    pub separator: char,
}

impl Database {
    pub const APPL: Database = Database {
        index: 0,
        name: "APPL_DB",
        separator: ':',
    };
    pub const ASIC: Database = Database {
        index: 1,
        name: "ASIC_DB",
        separator: ':',
    };
    pub const COUNTERS: Database = Database {
        index: 2,
        name: "COUNTERS_DB",
        separator: ':',
    };
    pub const CONFIG: Database = Database {
        index: 4,
        name: "CONFIG_DB",
        separator: '|',
    };
    pub const STATE: Database = Database {
        index: 6,
        name: "STATE_DB",
        separator: '|',
    };
    pub const CHASSIS_APP: Database = Database {
        index: 12,
        name: "CHASSIS_APP_DB",
        separator: '|',
    };

    const ALL: [Database; 6] = [
        Database::APPL,
        Database::ASIC,
        Database::COUNTERS,
        Database::CONFIG,
        Database::STATE,
        Database::CHASSIS_APP,
    ];

    pub fn from_index(index: u32) -> Option<Database> {
        Self::ALL.into_iter().find(|db| db.index == index)
    }

    /// Store key of `key` in `table`, e.g. `PORT_TABLE:Ethernet0`.
    pub fn full_key(&self, table: &str, key: &str) -> String {
        format!("{table}{}{key}", self.separator)
    }
}

impl fmt::Display for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Point access to a keyed store. Implementations perform exactly one round
/// trip per call; there is no prefix or range query at this layer.
pub trait StoreConnector: Send + Sync {
    fn get(&self, db: Database, table: &str, key: &str) -> Result<Option<Entry>, StateError>;

    /// Merge `fields` into the entry, creating it when absent.
    fn set(&self, db: Database, table: &str, key: &str, fields: &Entry) -> Result<(), StateError>;

    fn delete(&self, db: Database, table: &str, key: &str) -> Result<(), StateError>;

    /// Every key of `table`, without the table prefix.
    fn keys(&self, db: Database, table: &str) -> Result<Vec<String>, StateError>;
}

/// In-process store. Entries with no fields are kept, so "empty" and
/// "absent" remain distinguishable.
#[derive(Default)]
pub struct MemoryConnector {
    data: Mutex<BTreeMap<(u32, String, String), Entry>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_data<R>(&self, f: impl FnOnce(&mut BTreeMap<(u32, String, String), Entry>) -> R) -> R {
        let mut data = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut data)
    }
}

impl StoreConnector for MemoryConnector {
    fn get(&self, db: Database, table: &str, key: &str) -> Result<Option<Entry>, StateError> {
        Ok(self.with_data(|d| {
            d.get(&(db.index, table.to_owned(), key.to_owned()))
                .cloned()
        }))
    }

    fn set(&self, db: Database, table: &str, key: &str, fields: &Entry) -> Result<(), StateError> {
        self.with_data(|d| {
            d.entry((db.index, table.to_owned(), key.to_owned()))
                .or_default()
                .extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
        });
        Ok(())
    }

    fn delete(&self, db: Database, table: &str, key: &str) -> Result<(), StateError> {
        self.with_data(|d| d.remove(&(db.index, table.to_owned(), key.to_owned())));
        Ok(())
    }

    fn keys(&self, db: Database, table: &str) -> Result<Vec<String>, StateError> {
        Ok(self.with_data(|d| {
            d.keys()
                .filter(|(index, t, _)| *index == db.index && t == table)
                .map(|(_, _, k)| k.clone())
                .collect()
        }))
    }
}

/// Talks to the store inside a provisioned instance by running `redis-cli`
/// through a `CommandRunner`.
pub struct RedisCliConnector {
    runner: Arc<dyn CommandRunner>,
    instance: String,
}

impl RedisCliConnector {
    /// `instance` is the container name, as given by
    /// `TopologyContext::instance_name`.
    pub fn new(runner: Arc<dyn CommandRunner>, instance: &str) -> Self {
        Self {
            runner,
            instance: instance.to_owned(),
        }
    }

    fn redis(&self, db: Database, args: &[&str]) -> Result<String, StateError> {
        let index = db.index.to_string();
        let mut argv = vec!["redis-cli".to_owned(), "-n".to_owned(), index];
        argv.extend(args.iter().map(|a| (*a).to_owned()));
        let command = HostCommand::InstanceExec {
            instance: self.instance.clone(),
            argv,
        };
        trace!("{command}");
        Ok(self.runner.run(&command)?.stdout)
    }
}

/// Split a `redis-cli --csv` reply into its strings. Redis quotes every
/// string and escapes `"`, `\\`, control characters and non-printable bytes
/// (`\n`, `\xHH`, ...), so values containing newlines or commas keep their
/// framing.
fn parse_csv_reply(reply: &str) -> Option<Vec<String>> {
    let mut items = Vec::new();
    let mut chars = reply.trim_end_matches(['\r', '\n']).chars();
    let mut next = chars.next();
    while let Some(open) = next {
        if open != '"' {
            return None;
        }
        let mut bytes = Vec::new();
        loop {
            let c = match chars.next()? {
                '"' => break,
                '\\' => match chars.next()? {
                    'n' => '\n',
                    'r' => '\r',
                    't' => '\t',
                    'a' => '\u{7}',
                    'b' => '\u{8}',
                    'x' => {
                        let hex = [chars.next()?, chars.next()?];
                        let hex: String = hex.iter().collect();
                        bytes.push(u8::from_str_radix(&hex, 16).ok()?);
                        continue;
                    }
                    other => other,
                },
                other => other,
            };
            let mut buf = [0u8; 4];
            bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
        }
        items.push(String::from_utf8_lossy(&bytes).into_owned());
        next = match chars.next() {
            None => None,
            Some(',') => Some(chars.next()?),
            Some(_) => return None,
        };
    }
    Some(items)
}

/// `HGETALL` replies alternate field and value.
fn parse_hgetall(db: Database, reply: &str) -> Result<Entry, StateError> {
    let malformed = || StateError::Malformed {
        db: db.name,
        reply: reply.to_owned(),
    };
    let items = parse_csv_reply(reply).ok_or_else(malformed)?;
    if items.len() % 2 != 0 {
        return Err(malformed());
    }
    let mut entry = Entry::new();
    let mut items = items.into_iter();
    while let (Some(field), Some(value)) = (items.next(), items.next()) {
        entry.insert(field, value);
    }
    Ok(entry)
}

impl StoreConnector for RedisCliConnector {
    fn get(&self, db: Database, table: &str, key: &str) -> Result<Option<Entry>, StateError> {
        let reply = self.redis(db, &["--csv", "HGETALL", &db.full_key(table, key)])?;
        let entry = parse_hgetall(db, &reply)?;
        // Redis drops a hash with its last field.
        Ok((!entry.is_empty()).then_some(entry))
    }

    fn set(&self, db: Database, table: &str, key: &str, fields: &Entry) -> Result<(), StateError> {
        if fields.is_empty() {
            return Ok(());
        }
        let full_key = db.full_key(table, key);
        let mut args = vec!["HSET", full_key.as_str()];
        for (field, value) in fields {
            args.push(field);
            args.push(value);
        }
        self.redis(db, &args)?;
        Ok(())
    }

    fn delete(&self, db: Database, table: &str, key: &str) -> Result<(), StateError> {
        self.redis(db, &["DEL", &db.full_key(table, key)])?;
        Ok(())
    }

    fn keys(&self, db: Database, table: &str) -> Result<Vec<String>, StateError> {
        let prefix = db.full_key(table, "");
        let pattern = format!("{prefix}*");
        let reply = self.redis(db, &["KEYS", &pattern])?;
        let mut keys: Vec<String> = reply
            .lines()
            .filter_map(|line| line.strip_prefix(prefix.as_str()))
            .map(str::to_owned)
            .collect();
        keys.sort();
        Ok(keys)
    }
}
