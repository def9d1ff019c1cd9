//! Integrity stores: side tables mapping a record identity to its digest.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::errors::{HashguardError, Result};
use crate::fs_util::{is_regular_file, write_atomic};
use crate::storage::{Database, RecordType, Row};

/// Identity of a guarded record: validator, table, and primary key.
///
/// Renders as `validator.table.key` with `\` and `.` inside each component
/// escaped by a backslash, so distinct keys never render alike.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IntegrityKey {
    pub validator: String,
    pub table: String,
    pub primary_key: String,
}

impl IntegrityKey {
    #[must_use]
    pub fn new(
        validator: impl Into<String>,
        table: impl Into<String>,
        primary_key: impl Into<String>,
    ) -> Self {
        Self {
            validator: validator.into(),
            table: table.into(),
            primary_key: primary_key.into(),
        }
    }
}

fn escape_component(s: &str) -> String {
    s.replace('\\', "\\\\").replace('.', "\\.")
}

impl fmt::Display for IntegrityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}",
            escape_component(&self.validator),
            escape_component(&self.table),
            escape_component(&self.primary_key)
        )
    }
}

/// Keyed storage of expected digests, one per guarded record.
pub trait IntegrityStore: Send + Sync {
    /// The stored digest for `key`, if any.
    fn get(&self, key: &IntegrityKey) -> Result<Option<String>>;

    /// Store `digest` for `key`, replacing any previous value.
    fn upsert(&self, key: &IntegrityKey, digest: &str) -> Result<()>;

    /// Number of stored digests.
    fn len(&self) -> Result<usize>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// `(database, table)` holding the digests, when they live in a
    /// [`Database`]. Guards must never observe that table.
    fn backing_table(&self) -> Option<(&str, &str)> {
        None
    }
}

/// Process-local store. Digests are lost on exit.
#[derive(Debug, Default)]
pub struct MemoryStore {
    digests: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl IntegrityStore for MemoryStore {
    fn get(&self, key: &IntegrityKey) -> Result<Option<String>> {
        Ok(self.digests.lock().get(&key.to_string()).cloned())
    }

    fn upsert(&self, key: &IntegrityKey, digest: &str) -> Result<()> {
        self.digests
            .lock()
            .insert(key.to_string(), digest.to_string());
        Ok(())
    }

    fn len(&self) -> Result<usize> {
        Ok(self.digests.lock().len())
    }
}

/// Store persisted as a JSON object in a single file.
///
/// The whole file is rewritten atomically on every upsert.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    digests: Mutex<BTreeMap<String, String>>,
}

impl JsonFileStore {
    /// Open the store at `path`, starting empty if the file does not exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let digests = if is_regular_file(&path) {
            let content = std::fs::read_to_string(&path)?;
            if content.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&content)?
            }
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            path,
            digests: Mutex::new(digests),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl IntegrityStore for JsonFileStore {
    fn get(&self, key: &IntegrityKey) -> Result<Option<String>> {
        Ok(self.digests.lock().get(&key.to_string()).cloned())
    }

    fn upsert(&self, key: &IntegrityKey, digest: &str) -> Result<()> {
        let mut digests = self.digests.lock();
        let previous = digests.insert(key.to_string(), digest.to_string());
        let written = serde_json::to_vec_pretty(&*digests)
            .map_err(HashguardError::from)
            .and_then(|bytes| write_atomic(&self.path, &bytes));
        if let Err(e) = written {
            // Keep memory in step with the file.
            match previous {
                Some(old) => digests.insert(key.to_string(), old),
                None => digests.remove(&key.to_string()),
            };
            return Err(e);
        }
        Ok(())
    }

    fn len(&self) -> Result<usize> {
        Ok(self.digests.lock().len())
    }
}

/// Table name used by [`TableStore`].
pub const HASH_TABLE: &str = "hashes";

/// Store backed by a `hashes` table in a [`Database`].
#[derive(Debug)]
pub struct TableStore {
    db: Weak<Database>,
    db_name: String,
}

impl TableStore {
    /// Use `db` for digests, registering the `hashes` table if needed.
    pub fn new(db: &Arc<Database>) -> Result<Self> {
        if db.record_type(HASH_TABLE).is_err() {
            db.register_type(RecordType::new(
                "Hashes",
                HASH_TABLE,
                "hash_id",
                ["hash_id", "hash"],
            ))?;
        }
        Ok(Self {
            db: Arc::downgrade(db),
            db_name: db.name().to_string(),
        })
    }

    fn db(&self) -> Result<Arc<Database>> {
        self.db.upgrade().ok_or_else(|| HashguardError::NotFound {
            kind: "database",
            name: self.db_name.clone(),
        })
    }
}

impl IntegrityStore for TableStore {
    fn get(&self, key: &IntegrityKey) -> Result<Option<String>> {
        let row = self.db()?.load(HASH_TABLE, &key.to_string())?;
        Ok(row.and_then(|r| r.get("hash").and_then(|h| h.as_str().map(str::to_string))))
    }

    fn upsert(&self, key: &IntegrityKey, digest: &str) -> Result<()> {
        let row = Row::new()
            .with("hash_id", key.to_string())
            .with("hash", digest);
        self.db()?.save(HASH_TABLE, row)
    }

    fn len(&self) -> Result<usize> {
        Ok(self.db()?.load_all(HASH_TABLE)?.len())
    }

    fn backing_table(&self) -> Option<(&str, &str)> {
        Some((self.db_name.as_str(), HASH_TABLE))
    }
}
