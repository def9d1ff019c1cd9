//! Named validators: attribute-scoped structural hashing and digest checks.
//!
//! A [`Validator`] binds a digest algorithm to an optional ordered list of
//! attributes. Without attributes the whole object is hashed; with
//! attributes only those fields participate, in declared order.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::digest::{Algorithm, DigestAlgorithm, DigestState};
use crate::errors::{HashguardError, Result};

/// Frame tag for an attribute the object does not have.
const ABSENT: u8 = 0x00;
/// Frame tag for an attribute followed by its length-prefixed value.
const PRESENT: u8 = 0x01;

/// A named binding of a digest algorithm and an attribute subset.
#[derive(Clone)]
pub struct Validator {
    name: String,
    description: String,
    algorithm: Arc<dyn DigestAlgorithm>,
    attributes: Option<Vec<String>>,
    owner: String,
}

impl Validator {
    /// Create a whole-object SHA-256 validator with no owner.
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            algorithm: Arc::new(Algorithm::default()),
            attributes: None,
            owner: String::new(),
        }
    }

    /// Use a different digest algorithm.
    #[must_use]
    pub fn with_algorithm(mut self, algorithm: impl DigestAlgorithm + 'static) -> Self {
        self.algorithm = Arc::new(algorithm);
        self
    }

    /// Use a shared digest algorithm.
    #[must_use]
    pub fn with_shared_algorithm(mut self, algorithm: Arc<dyn DigestAlgorithm>) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// Restrict hashing to these attributes. Duplicates keep their first position.
    #[must_use]
    pub fn with_attributes<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut ordered: Vec<String> = Vec::new();
        for attr in attributes {
            let attr = attr.into();
            if !ordered.contains(&attr) {
                ordered.push(attr);
            }
        }
        self.attributes = Some(ordered);
        self
    }

    /// Set the owning component.
    #[must_use]
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

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
    pub fn algorithm(&self) -> &dyn DigestAlgorithm {
        self.algorithm.as_ref()
    }

    #[must_use]
    pub fn attributes(&self) -> Option<&[String]> {
        self.attributes.as_deref()
    }

    /// Fresh digest state for incremental hashing.
    #[must_use]
    pub fn new_state(&self) -> DigestState {
        self.algorithm.new_state()
    }

    /// Feed a chunk of raw bytes into an existing state.
    pub fn update(&self, state: &mut DigestState, chunk: &[u8]) -> Result<()> {
        self.check_state(state)?;
        state.update(chunk);
        Ok(())
    }

    /// Hex digest of `data`. Missing attributes hash as absent.
    pub fn hash<T: Serialize + ?Sized>(&self, data: &T) -> Result<String> {
        let mut state = self.new_state();
        self.hash_into(&mut state, data, false)?;
        Ok(state.finalize())
    }

    /// Hex digest of `data`, failing if any configured attribute is missing.
    pub fn hash_strict<T: Serialize + ?Sized>(&self, data: &T) -> Result<String> {
        let mut state = self.new_state();
        self.hash_into(&mut state, data, true)?;
        Ok(state.finalize())
    }

    /// Feed the serialized form of `data` into an existing state.
    ///
    /// # Errors
    ///
    /// Returns [`HashguardError::MissingAttribute`] when `strict` is set and a
    /// configured attribute is absent, or [`HashguardError::Configuration`]
    /// when `state` was created by a different algorithm.
    pub fn hash_into<T: Serialize + ?Sized>(
        &self,
        state: &mut DigestState,
        data: &T,
        strict: bool,
    ) -> Result<()> {
        self.check_state(state)?;
        let value = serde_json::to_value(data)?;

        let Some(attributes) = &self.attributes else {
            state.update(&serde_json::to_vec(&value)?);
            return Ok(());
        };

        for attribute in attributes {
            match value.get(attribute.as_str()) {
                Some(field) => {
                    let bytes = serde_json::to_vec(field)?;
                    state.update(&[PRESENT]);
                    state.update(&(bytes.len() as u64).to_le_bytes());
                    state.update(&bytes);
                }
                None if strict => {
                    return Err(HashguardError::MissingAttribute {
                        attribute: attribute.clone(),
                    });
                }
                None => state.update(&[ABSENT]),
            }
        }
        Ok(())
    }

    /// Returns `true` if `data` hashes to `expected`. Never fails on mismatch.
    pub fn validate<T: Serialize + ?Sized>(&self, data: &T, expected: &str) -> Result<bool> {
        Ok(self.hash(data)? == expected)
    }

    fn check_state(&self, state: &DigestState) -> Result<()> {
        if state.algorithm() != self.algorithm.id() {
            return Err(HashguardError::config(format!(
                "validator '{}' uses {}, got a {} digest state",
                self.name,
                self.algorithm.id(),
                state.algorithm()
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Validator")
            .field("name", &self.name)
            .field("algorithm", &self.algorithm.id())
            .field("attributes", &self.attributes)
            .field("owner", &self.owner)
            .finish()
    }
}
