//! Row integrity guards: detect rows modified outside the observed write path.
//!
//! A [`RowGuard`] watches one table. Every committed write through the
//! [`Database`] stores the row's digest in an [`IntegrityStore`]; every load recomputes
//! the digest and fails with [`HashguardError::Validation`] if it differs
//! from the stored one.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::digest::Algorithm;
use crate::errors::{HashguardError, Result};
use crate::registry::ValidatorRegistry;
use crate::storage::{Database, RecordObserver, RecordType, Row, TypeListener};
use crate::store::{IntegrityKey, IntegrityStore};
use crate::validator::Validator;

/// Owner recorded for guards installed by [`GuardRegistry::activate`].
pub const BOOTSTRAP_OWNER: &str = "db_validator";

/// What a guard does when a loaded row has no stored digest yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingDigestPolicy {
    /// Accept the row and store its digest as the baseline.
    #[default]
    TrustOnFirstUse,
    /// Fail the load with [`HashguardError::MissingDigest`].
    Reject,
}

/// Outcome of a successful [`RowGuard::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// No digest was stored; the current one became the baseline.
    FirstObservation,
    /// The stored digest matched.
    Verified,
}

/// Binds a validator and an integrity store to one record type.
pub struct RowGuard {
    name: String,
    description: String,
    owner: String,
    record_type: RecordType,
    validator: Arc<Validator>,
    store: Arc<dyn IntegrityStore>,
    policy: MissingDigestPolicy,
}

impl std::fmt::Debug for RowGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowGuard")
            .field("name", &self.name)
            .field("table", &self.record_type.table)
            .field("validator", &self.validator.name())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl RowGuard {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    #[must_use]
    pub fn record_type(&self) -> &RecordType {
        &self.record_type
    }

    #[must_use]
    pub fn validator(&self) -> &Arc<Validator> {
        &self.validator
    }

    /// Store key for `row`. Independent of the row's content.
    pub fn key(&self, row: &Row) -> Result<IntegrityKey> {
        let primary_key = row.key_of(&self.record_type.primary_key).ok_or_else(|| {
            HashguardError::config(format!(
                "row for table '{}' has no primary key '{}'",
                self.record_type.table, self.record_type.primary_key
            ))
        })?;
        Ok(IntegrityKey::new(
            self.validator.name(),
            self.record_type.table.as_str(),
            primary_key,
        ))
    }

    /// Compare `row` against its stored digest.
    ///
    /// # Errors
    ///
    /// Returns [`HashguardError::Validation`] with both digests if they
    /// differ, or [`HashguardError::MissingDigest`] under
    /// [`MissingDigestPolicy::Reject`] when nothing is stored.
    pub fn check(&self, row: &Row) -> Result<Verdict> {
        let key = self.key(row)?;
        let computed = self.validator.hash(row)?;
        match self.store.get(&key)? {
            Some(stored) if stored == computed => {
                log::debug!("Verified hash for '{key}'");
                Ok(Verdict::Verified)
            }
            Some(stored) => Err(HashguardError::Validation {
                key: key.to_string(),
                stored,
                computed,
            }),
            None => match self.policy {
                MissingDigestPolicy::TrustOnFirstUse => {
                    log::info!("No stored hash for '{key}', trusting first observation");
                    self.store.upsert(&key, &computed)?;
                    Ok(Verdict::FirstObservation)
                }
                MissingDigestPolicy::Reject => Err(HashguardError::MissingDigest {
                    key: key.to_string(),
                }),
            },
        }
    }

    /// Compute and store the digest of `row`, returning it.
    pub fn store_digest(&self, row: &Row) -> Result<String> {
        let key = self.key(row)?;
        let digest = self.validator.hash(row)?;
        self.store.upsert(&key, &digest)?;
        log::debug!("Stored hash for '{key}'");
        Ok(digest)
    }
}

impl RecordObserver for RowGuard {
    fn on_load(&self, _record_type: &RecordType, row: &Row) -> Result<()> {
        self.check(row).map(|_| ())
    }

    fn on_before_persist(&self, _record_type: &RecordType, row: &Row) -> Result<()> {
        self.key(row).map(|_| ())
    }

    fn on_after_persist(&self, _record_type: &RecordType, row: &Row) -> Result<()> {
        self.store_digest(row).map(|_| ())
    }
}

/// Name-unique catalog of [`RowGuard`]s sharing one integrity store.
pub struct GuardRegistry {
    validators: Arc<ValidatorRegistry>,
    store: Arc<dyn IntegrityStore>,
    algorithm: Algorithm,
    policy: MissingDigestPolicy,
    guards: Mutex<BTreeMap<String, Arc<RowGuard>>>,
}

impl std::fmt::Debug for GuardRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardRegistry")
            .field("guards", &self.guards.lock().keys().collect::<Vec<_>>())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl GuardRegistry {
    #[must_use]
    pub fn new(validators: Arc<ValidatorRegistry>, store: Arc<dyn IntegrityStore>) -> Self {
        Self {
            validators,
            store,
            algorithm: Algorithm::default(),
            policy: MissingDigestPolicy::default(),
            guards: Mutex::new(BTreeMap::new()),
        }
    }

    #[must_use]
    pub fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    #[must_use]
    pub fn with_policy(mut self, policy: MissingDigestPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn IntegrityStore> {
        &self.store
    }

    /// Guard `table` in `db`.
    ///
    /// Registers a validator named `<name>.<table>` over the record type's
    /// columns and attaches the guard as an observer of the table.
    ///
    /// # Errors
    ///
    /// - [`HashguardError::DuplicateName`] if a guard or its validator name
    ///   is taken.
    /// - [`HashguardError::Configuration`] if `table` holds this registry's
    ///   own digests.
    /// - [`HashguardError::NotFound`] if `table` is not registered in `db`.
    pub fn register(
        &self,
        db: &Database,
        name: &str,
        description: &str,
        table: &str,
        owner: &str,
    ) -> Result<Arc<RowGuard>> {
        let mut guards = self.guards.lock();
        if guards.contains_key(name) {
            return Err(HashguardError::DuplicateName {
                kind: "guard",
                name: name.to_string(),
            });
        }
        if self.is_store_table(db, table) {
            return Err(HashguardError::config(format!(
                "table '{table}' stores integrity digests and cannot be guarded"
            )));
        }

        let record_type = db.record_type(table)?;
        let validator = self.validators.register(
            Validator::new(format!("{name}.{table}"), description)
                .with_algorithm(self.algorithm)
                .with_attributes(record_type.columns.iter().cloned())
                .with_owner(owner),
        )?;

        let guard = Arc::new(RowGuard {
            name: name.to_string(),
            description: description.to_string(),
            owner: owner.to_string(),
            record_type,
            validator,
            store: Arc::clone(&self.store),
            policy: self.policy,
        });
        db.observe(table, name, guard.clone());
        guards.insert(name.to_string(), Arc::clone(&guard));
        log::info!("Installed integrity guard '{name}' for table '{table}'");
        Ok(guard)
    }

    /// Remove a guard, detach it from `db`, and drop its validator.
    ///
    /// Digests it stored stay in the integrity store.
    ///
    /// # Errors
    ///
    /// Returns [`HashguardError::NotFound`] if no guard has this name.
    pub fn unregister(&self, db: &Database, name: &str) -> Result<()> {
        let guard = self
            .guards
            .lock()
            .remove(name)
            .ok_or_else(|| HashguardError::NotFound {
                kind: "guard",
                name: name.to_string(),
            })?;
        db.unobserve(&guard.record_type.table, name);
        match self.validators.unregister(guard.validator.name()) {
            Ok(_) | Err(HashguardError::NotFound { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Guards matching the optional name and owner filters, by name.
    #[must_use]
    pub fn get(&self, name: Option<&str>, owner: Option<&str>) -> Vec<Arc<RowGuard>> {
        self.guards
            .lock()
            .values()
            .filter(|g| name.is_none_or(|n| g.name == n))
            .filter(|g| owner.is_none_or(|o| g.owner == o))
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.guards.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.guards.lock().is_empty()
    }

    /// Guard every record type of `db`, now and as new types are registered.
    ///
    /// Subscribes before scanning existing types so that a type registered
    /// concurrently is seen by at least one path; the other path skips it.
    /// Returns the number of guards installed by the scan.
    ///
    /// # Errors
    ///
    /// A type that is already guarded is skipped. Any other failure, such as
    /// a validator already registered under the guard's validator name, is
    /// returned here and by [`Database::register_type`] for later types.
    pub fn activate(self: &Arc<Self>, db: &Database) -> Result<usize> {
        db.on_type_registered(Arc::new(GuardInstaller {
            registry: Arc::clone(self),
        }));
        let mut installed = 0;
        for record_type in db.types() {
            if self.install_default(db, &record_type)?.is_some() {
                installed += 1;
            }
        }
        Ok(installed)
    }

    /// Install the default guard for `record_type` unless one exists or the
    /// type holds this registry's digests.
    fn install_default(
        &self,
        db: &Database,
        record_type: &RecordType,
    ) -> Result<Option<Arc<RowGuard>>> {
        if self.is_store_table(db, &record_type.table) {
            return Ok(None);
        }
        let name = format!("{}_db_validator", record_type.name);
        let description = format!("Database validator for {}", record_type.name);
        match self.register(db, &name, &description, &record_type.table, BOOTSTRAP_OWNER) {
            Ok(guard) => Ok(Some(guard)),
            Err(HashguardError::DuplicateName { kind: "guard", .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn is_store_table(&self, db: &Database, table: &str) -> bool {
        self.store
            .backing_table()
            .is_some_and(|(db_name, store_table)| db_name == db.name() && store_table == table)
    }
}

struct GuardInstaller {
    registry: Arc<GuardRegistry>,
}

impl TypeListener for GuardInstaller {
    fn on_type_registered(&self, db: &Database, record_type: &RecordType) -> Result<()> {
        self.registry.install_default(db, record_type).map(|_| ())
    }
}
