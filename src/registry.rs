//! Catalog of named validators with unique names.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::errors::{HashguardError, Result};
use crate::validator::Validator;

/// Name-unique catalog of [`Validator`]s.
///
/// Handles returned by [`register`](Self::register) and [`get`](Self::get)
/// stay usable after the validator is unregistered.
#[derive(Debug, Default)]
pub struct ValidatorRegistry {
    validators: Mutex<BTreeMap<String, Arc<Validator>>>,
}

impl ValidatorRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a validator to the catalog.
    ///
    /// # Errors
    ///
    /// Returns [`HashguardError::DuplicateName`] if the name is taken.
    pub fn register(&self, validator: Validator) -> Result<Arc<Validator>> {
        let mut validators = self.validators.lock();
        if validators.contains_key(validator.name()) {
            return Err(HashguardError::DuplicateName {
                kind: "validator",
                name: validator.name().to_string(),
            });
        }
        let validator = Arc::new(validator);
        validators.insert(validator.name().to_string(), Arc::clone(&validator));
        Ok(validator)
    }

    /// Remove a validator from the catalog.
    ///
    /// # Errors
    ///
    /// Returns [`HashguardError::NotFound`] if no validator has this name.
    pub fn unregister(&self, name: &str) -> Result<Arc<Validator>> {
        self.validators
            .lock()
            .remove(name)
            .ok_or_else(|| HashguardError::NotFound {
                kind: "validator",
                name: name.to_string(),
            })
    }

    /// All validators matching the optional name and owner filters, by name.
    #[must_use]
    pub fn get(&self, name: Option<&str>, owner: Option<&str>) -> Vec<Arc<Validator>> {
        self.validators
            .lock()
            .values()
            .filter(|v| name.is_none_or(|n| v.name() == n))
            .filter(|v| owner.is_none_or(|o| v.owner() == o))
            .cloned()
            .collect()
    }

    /// The validator registered under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`HashguardError::NotFound`] if no validator has this name.
    pub fn get_one(&self, name: &str) -> Result<Arc<Validator>> {
        self.validators
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| HashguardError::NotFound {
                kind: "validator",
                name: name.to_string(),
            })
    }

    /// Returns the registered validator, registering `make()` first if absent.
    ///
    /// # Errors
    ///
    /// Returns [`HashguardError::DuplicateName`] if a validator with this
    /// name exists but `reusable` rejects it.
    pub(crate) fn get_or_register(
        &self,
        name: &str,
        make: impl FnOnce() -> Validator,
        reusable: impl FnOnce(&Validator) -> bool,
    ) -> Result<Arc<Validator>> {
        let mut validators = self.validators.lock();
        if let Some(existing) = validators.get(name) {
            if !reusable(existing) {
                return Err(HashguardError::DuplicateName {
                    kind: "validator",
                    name: name.to_string(),
                });
            }
            return Ok(Arc::clone(existing));
        }
        let validator = Arc::new(make());
        validators.insert(name.to_string(), Arc::clone(&validator));
        Ok(validator)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.validators.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.validators.lock().is_empty()
    }
}
