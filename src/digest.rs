//! Pluggable digest algorithms and resumable digest state.
//!
//! Any algorithm producing a fixed-size output can back a validator by
//! implementing [`DigestAlgorithm`]. The built-in [`Algorithm`] covers the
//! SHA-2 family.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::digest::DynDigest;
use sha2::{Sha224, Sha256, Sha384, Sha512};

/// A digest function that can start new hashing states.
pub trait DigestAlgorithm: Send + Sync {
    /// Stable identifier, e.g. `"sha256"`.
    fn id(&self) -> &str;

    /// Create a fresh, empty hashing state.
    fn new_state(&self) -> DigestState;
}

/// In-progress digest computation.
pub struct DigestState {
    algorithm: String,
    inner: Box<dyn DynDigest + Send + Sync>,
}

impl DigestState {
    /// Wrap any `DynDigest` implementation as a state for `algorithm`.
    #[must_use]
    pub fn new(algorithm: impl Into<String>, inner: Box<dyn DynDigest + Send + Sync>) -> Self {
        Self {
            algorithm: algorithm.into(),
            inner,
        }
    }

    /// Identifier of the algorithm this state belongs to.
    #[must_use]
    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    /// Feed raw bytes into the state.
    pub fn update(&mut self, bytes: &[u8]) {
        self.inner.update(bytes);
    }

    /// Hex digest of everything fed so far, leaving the state usable.
    #[must_use]
    pub fn hex_digest(&self) -> String {
        to_hex(&self.inner.box_clone().finalize())
    }

    /// Consume the state and return its hex digest.
    #[must_use]
    pub fn finalize(self) -> String {
        to_hex(&self.inner.finalize())
    }
}

impl fmt::Debug for DigestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DigestState")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

/// Lowercase hexadecimal encoding.
fn to_hex(bytes: &[u8]) -> String {
    use fmt::Write;
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut s, b| {
        let _ = write!(s, "{b:02x}");
        s
    })
}

/// Built-in SHA-2 digest algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    Sha224,
    #[default]
    Sha256,
    Sha384,
    Sha512,
}

impl DigestAlgorithm for Algorithm {
    fn id(&self) -> &str {
        match self {
            Algorithm::Sha224 => "sha224",
            Algorithm::Sha256 => "sha256",
            Algorithm::Sha384 => "sha384",
            Algorithm::Sha512 => "sha512",
        }
    }

    fn new_state(&self) -> DigestState {
        let inner: Box<dyn DynDigest + Send + Sync> = match self {
            Algorithm::Sha224 => Box::new(Sha224::default()),
            Algorithm::Sha256 => Box::new(Sha256::default()),
            Algorithm::Sha384 => Box::new(Sha384::default()),
            Algorithm::Sha512 => Box::new(Sha512::default()),
        };
        DigestState::new(self.id(), inner)
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}
