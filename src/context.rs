//! Application-root context owning the validator and guard catalogs.
//!
//! Components obtain a [`Component`] handle scoped to their own name;
//! everything they register through it is owned by them.

use std::sync::Arc;

use crate::command::CommandValidator;
use crate::config::Config;
use crate::digest::Algorithm;
use crate::errors::Result;
use crate::file::FileValidator;
use crate::guard::{GuardRegistry, RowGuard};
use crate::registry::ValidatorRegistry;
use crate::storage::Database;
use crate::store::{IntegrityStore, JsonFileStore, MemoryStore};
use crate::validator::Validator;

/// Shared state for all validators and guards of one application.
#[derive(Debug)]
pub struct ValidationContext {
    config: Config,
    validators: Arc<ValidatorRegistry>,
    guards: Arc<GuardRegistry>,
}

impl ValidationContext {
    /// Build a context, opening the integrity store named by `config.hash_db`.
    pub fn new(config: Config) -> Result<Self> {
        config.check()?;
        let store: Arc<dyn IntegrityStore> = match &config.hash_db {
            Some(path) => Arc::new(JsonFileStore::open(path)?),
            None => Arc::new(MemoryStore::new()),
        };
        Self::with_store(config, store)
    }

    /// Build a context around an existing integrity store.
    pub fn with_store(config: Config, store: Arc<dyn IntegrityStore>) -> Result<Self> {
        config.check()?;
        let validators = Arc::new(ValidatorRegistry::new());
        let guards = Arc::new(
            GuardRegistry::new(Arc::clone(&validators), store)
                .with_algorithm(config.algorithm)
                .with_policy(config.missing_digest),
        );
        Ok(Self {
            config,
            validators,
            guards,
        })
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn validators(&self) -> &Arc<ValidatorRegistry> {
        &self.validators
    }

    #[must_use]
    pub fn guards(&self) -> &Arc<GuardRegistry> {
        &self.guards
    }

    /// Guard every record type in `db`, including types registered later.
    pub fn activate_guards(&self, db: &Database) -> Result<usize> {
        self.guards.activate(db)
    }

    /// Handle for the component called `owner`.
    #[must_use]
    pub fn component(&self, owner: impl Into<String>) -> Component {
        let owner = owner.into();
        let files = FileValidator::new(Arc::clone(&self.validators), owner.as_str())
            .with_algorithm(self.config.algorithm)
            .with_block_size(self.config.block_size);
        let commands = CommandValidator::new().with_default_timeout(self.config.command_timeout());
        Component {
            owner,
            algorithm: self.config.algorithm,
            validators: Arc::clone(&self.validators),
            guards: Arc::clone(&self.guards),
            files,
            commands,
        }
    }
}

/// A component's view of the context.
#[derive(Debug)]
pub struct Component {
    owner: String,
    algorithm: Algorithm,
    validators: Arc<ValidatorRegistry>,
    guards: Arc<GuardRegistry>,
    files: FileValidator,
    commands: CommandValidator,
}

impl Component {
    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// A validator preset with this component as owner and the configured
    /// algorithm, ready to customize and [`register`](Self::register).
    #[must_use]
    pub fn validator(&self, name: impl Into<String>, description: impl Into<String>) -> Validator {
        Validator::new(name, description)
            .with_algorithm(self.algorithm)
            .with_owner(self.owner.as_str())
    }

    /// Register `validator` under this component's ownership.
    pub fn register(&self, validator: Validator) -> Result<Arc<Validator>> {
        self.validators
            .register(validator.with_owner(self.owner.as_str()))
    }

    pub fn unregister(&self, name: &str) -> Result<()> {
        self.validators.unregister(name).map(|_| ())
    }

    /// This component's validators, optionally narrowed to one name.
    #[must_use]
    pub fn get(&self, name: Option<&str>) -> Vec<Arc<Validator>> {
        self.validators.get(name, Some(&self.owner))
    }

    #[must_use]
    pub fn files(&self) -> &FileValidator {
        &self.files
    }

    #[must_use]
    pub fn commands(&self) -> &CommandValidator {
        &self.commands
    }

    /// Guard `table` of `db` under this component's ownership.
    pub fn guard(
        &self,
        db: &Database,
        name: &str,
        description: &str,
        table: &str,
    ) -> Result<Arc<RowGuard>> {
        self.guards
            .register(db, name, description, table, &self.owner)
    }

    pub fn unguard(&self, db: &Database, name: &str) -> Result<()> {
        self.guards.unregister(db, name)
    }

    /// This component's guards, optionally narrowed to one name.
    #[must_use]
    pub fn guards(&self, name: Option<&str>) -> Vec<Arc<RowGuard>> {
        self.guards.get(name, Some(&self.owner))
    }
}
