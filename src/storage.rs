//! In-process record storage with load/persist observer slots.
//!
//! This is the persistence collaborator guards attach to: a catalog of
//! record types, one table of rows per type, and synchronous callbacks
//! fired on load and before persist. Observers run without any internal
//! lock held, so an observer may itself read or write the database.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::{HashguardError, Result};

/// A persisted record type: its table, primary key, and declared columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordType {
    pub name: String,
    pub table: String,
    pub primary_key: String,
    /// Columns that participate in integrity hashing, in order.
    pub columns: Vec<String>,
}

impl RecordType {
    #[must_use]
    pub fn new<I, S>(
        name: impl Into<String>,
        table: impl Into<String>,
        primary_key: impl Into<String>,
        columns: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            table: table.into(),
            primary_key: primary_key.into(),
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }
}

/// One stored record: a map of column name to JSON value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row(Map<String, Value>);

impl Row {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`set`](Self::set).
    #[must_use]
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(column, value);
        self
    }

    pub fn set(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(column.into(), value.into());
    }

    #[must_use]
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.0.get(column)
    }

    /// The value of `column` rendered as a key string.
    ///
    /// Strings are used verbatim; other values use their JSON text.
    #[must_use]
    pub fn key_of(&self, column: &str) -> Option<String> {
        self.0.get(column).map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }
}

/// Callbacks fired by [`Database`] for rows of an observed table.
pub trait RecordObserver: Send + Sync {
    /// A row was read. An error fails the load.
    fn on_load(&self, record_type: &RecordType, row: &Row) -> Result<()>;

    /// A row is about to be inserted or updated. An error aborts the write.
    fn on_before_persist(&self, _record_type: &RecordType, _row: &Row) -> Result<()> {
        Ok(())
    }

    /// A row was written after every observer accepted it. An error
    /// restores the row's previous contents and fails the write.
    fn on_after_persist(&self, _record_type: &RecordType, _row: &Row) -> Result<()> {
        Ok(())
    }
}

/// Callback fired when a new record type is registered.
pub trait TypeListener: Send + Sync {
    fn on_type_registered(&self, db: &Database, record_type: &RecordType) -> Result<()>;
}

struct Observer {
    table: String,
    name: String,
    observer: Arc<dyn RecordObserver>,
}

/// An in-memory database of typed tables.
pub struct Database {
    name: String,
    types: RwLock<BTreeMap<String, RecordType>>,
    tables: RwLock<HashMap<String, BTreeMap<String, Row>>>,
    observers: RwLock<Vec<Observer>>,
    listeners: RwLock<Vec<Arc<dyn TypeListener>>>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("name", &self.name)
            .field("types", &self.types.read().keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Database {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            types: RwLock::new(BTreeMap::new()),
            tables: RwLock::new(HashMap::new()),
            observers: RwLock::new(Vec::new()),
            listeners: RwLock::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add a record type and notify type listeners.
    ///
    /// If a listener fails the type and its empty table are removed again,
    /// so the registration can be retried.
    ///
    /// # Errors
    ///
    /// Returns [`HashguardError::DuplicateName`] if the table is already
    /// registered, or the first listener error.
    pub fn register_type(&self, record_type: RecordType) -> Result<()> {
        {
            let mut types = self.types.write();
            if types.contains_key(&record_type.table) {
                return Err(HashguardError::DuplicateName {
                    kind: "record type",
                    name: record_type.table.clone(),
                });
            }
            types.insert(record_type.table.clone(), record_type.clone());
            self.tables
                .write()
                .entry(record_type.table.clone())
                .or_default();
        }

        let listeners: Vec<_> = self.listeners.read().iter().cloned().collect();
        for listener in listeners {
            if let Err(e) = listener.on_type_registered(self, &record_type) {
                self.types.write().remove(&record_type.table);
                self.tables.write().remove(&record_type.table);
                return Err(e);
            }
        }
        Ok(())
    }

    /// All registered record types, ordered by table name.
    #[must_use]
    pub fn types(&self) -> Vec<RecordType> {
        self.types.read().values().cloned().collect()
    }

    pub fn record_type(&self, table: &str) -> Result<RecordType> {
        self.types
            .read()
            .get(table)
            .cloned()
            .ok_or_else(|| HashguardError::NotFound {
                kind: "record type",
                name: table.to_string(),
            })
    }

    /// Subscribe to future [`register_type`](Self::register_type) calls.
    pub fn on_type_registered(&self, listener: Arc<dyn TypeListener>) {
        self.listeners.write().push(listener);
    }

    /// Attach a named observer to a table.
    pub fn observe(&self, table: &str, name: &str, observer: Arc<dyn RecordObserver>) {
        self.observers.write().push(Observer {
            table: table.to_string(),
            name: name.to_string(),
            observer,
        });
    }

    /// Detach a named observer. Returns `false` if it was not attached.
    pub fn unobserve(&self, table: &str, name: &str) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|o| !(o.table == table && o.name == name));
        observers.len() != before
    }

    /// Insert a new row.
    ///
    /// # Errors
    ///
    /// Fails if the table is unknown, the row lacks its primary key, a row
    /// with that key exists, or an observer rejects the write.
    pub fn insert(&self, table: &str, row: Row) -> Result<()> {
        let (record_type, key) = self.locate(table, &row)?;
        if self.contains(table, &key) {
            return Err(HashguardError::DuplicateName {
                kind: "row",
                name: format!("{table}.{key}"),
            });
        }
        self.persist(&record_type, key, row)
    }

    /// Replace an existing row.
    ///
    /// # Errors
    ///
    /// Returns [`HashguardError::NotFound`] if no row has this key.
    pub fn update(&self, table: &str, row: Row) -> Result<()> {
        let (record_type, key) = self.locate(table, &row)?;
        if !self.contains(table, &key) {
            return Err(HashguardError::NotFound {
                kind: "row",
                name: format!("{table}.{key}"),
            });
        }
        self.persist(&record_type, key, row)
    }

    /// Insert or replace a row.
    pub fn save(&self, table: &str, row: Row) -> Result<()> {
        let (record_type, key) = self.locate(table, &row)?;
        self.persist(&record_type, key, row)
    }

    /// Write a row without notifying observers, as an external process would.
    pub fn write_unobserved(&self, table: &str, row: Row) -> Result<()> {
        let (_, key) = self.locate(table, &row)?;
        self.write(table, key, row);
        Ok(())
    }

    /// Read a row by primary key, running load observers on it.
    pub fn load(&self, table: &str, key: &str) -> Result<Option<Row>> {
        let record_type = self.record_type(table)?;
        let row = self
            .tables
            .read()
            .get(table)
            .and_then(|rows| rows.get(key))
            .cloned();
        if let Some(row) = &row {
            for observer in self.observers_for(table) {
                observer.on_load(&record_type, row)?;
            }
        }
        Ok(row)
    }

    /// Read every row of a table in key order, running load observers.
    pub fn load_all(&self, table: &str) -> Result<Vec<Row>> {
        let record_type = self.record_type(table)?;
        let rows: Vec<Row> = self
            .tables
            .read()
            .get(table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default();
        let observers = self.observers_for(table);
        for row in &rows {
            for observer in &observers {
                observer.on_load(&record_type, row)?;
            }
        }
        Ok(rows)
    }

    /// Remove a row. Stored digests for it are left in place.
    pub fn delete(&self, table: &str, key: &str) -> Result<bool> {
        self.record_type(table)?;
        Ok(self
            .tables
            .write()
            .get_mut(table)
            .and_then(|rows| rows.remove(key))
            .is_some())
    }

    fn locate(&self, table: &str, row: &Row) -> Result<(RecordType, String)> {
        let record_type = self.record_type(table)?;
        let key = row.key_of(&record_type.primary_key).ok_or_else(|| {
            HashguardError::config(format!(
                "row for table '{table}' has no primary key '{}'",
                record_type.primary_key
            ))
        })?;
        Ok((record_type, key))
    }

    fn contains(&self, table: &str, key: &str) -> bool {
        self.tables
            .read()
            .get(table)
            .is_some_and(|rows| rows.contains_key(key))
    }

    fn persist(&self, record_type: &RecordType, key: String, row: Row) -> Result<()> {
        let observers = self.observers_for(&record_type.table);
        for observer in &observers {
            observer.on_before_persist(record_type, &row)?;
        }
        let previous = self.write(&record_type.table, key.clone(), row.clone());
        for observer in &observers {
            if let Err(e) = observer.on_after_persist(record_type, &row) {
                let mut tables = self.tables.write();
                let rows = tables.entry(record_type.table.clone()).or_default();
                match previous {
                    Some(previous) => rows.insert(key, previous),
                    None => rows.remove(&key),
                };
                return Err(e);
            }
        }
        Ok(())
    }

    fn write(&self, table: &str, key: String, row: Row) -> Option<Row> {
        self.tables
            .write()
            .entry(table.to_string())
            .or_default()
            .insert(key, row)
    }

    fn observers_for(&self, table: &str) -> Vec<Arc<dyn RecordObserver>> {
        self.observers
            .read()
            .iter()
            .filter(|o| o.table == table)
            .map(|o| Arc::clone(&o.observer))
            .collect()
    }
}
