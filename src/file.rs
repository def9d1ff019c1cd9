//! File validators: streamed file digests and sidecar hash files.

use std::fs;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::digest::{Algorithm, DigestAlgorithm, DigestState};
use crate::errors::{HashguardError, Result};
use crate::fs_util::read_first_line;
use crate::registry::ValidatorRegistry;
use crate::validator::Validator;

/// Default read size for file hashing.
pub const DEFAULT_BLOCK_SIZE: usize = 65536;

/// Options for [`FileValidator::hash`].
#[derive(Debug, Clone, Default)]
pub struct FileHashOptions {
    /// Validator to hash with; the component default when unset.
    pub validator: Option<Arc<Validator>>,
    /// Write the hex digest to this file.
    pub hash_file: Option<PathBuf>,
    /// Read size; the configured default when unset.
    pub block_size: Option<usize>,
}

impl FileHashOptions {
    #[must_use]
    pub fn with_validator(mut self, validator: Arc<Validator>) -> Self {
        self.validator = Some(validator);
        self
    }

    #[must_use]
    pub fn with_hash_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.hash_file = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = Some(block_size);
        self
    }
}

/// Expected digest for [`FileValidator::validate`].
///
/// Exactly one of `digest` and `hash_file` must be set.
#[derive(Debug, Clone, Default)]
pub struct FileCheck {
    pub digest: Option<String>,
    /// File whose first line holds the expected digest.
    pub hash_file: Option<PathBuf>,
    pub validator: Option<Arc<Validator>>,
    pub block_size: Option<usize>,
}

impl FileCheck {
    /// Compare against a literal digest.
    #[must_use]
    pub fn digest(digest: impl Into<String>) -> Self {
        Self {
            digest: Some(digest.into()),
            ..Self::default()
        }
    }

    /// Compare against the first line of a hash file.
    #[must_use]
    pub fn hash_file(path: impl Into<PathBuf>) -> Self {
        Self {
            hash_file: Some(path.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_digest(mut self, digest: impl Into<String>) -> Self {
        self.digest = Some(digest.into());
        self
    }

    #[must_use]
    pub fn with_hash_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.hash_file = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_validator(mut self, validator: Arc<Validator>) -> Self {
        self.validator = Some(validator);
        self
    }

    #[must_use]
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = Some(block_size);
        self
    }
}

/// Hashes and validates files on behalf of one component.
#[derive(Debug)]
pub struct FileValidator {
    registry: Arc<ValidatorRegistry>,
    owner: String,
    algorithm: Algorithm,
    block_size: usize,
    default: Mutex<Option<Arc<Validator>>>,
}

impl FileValidator {
    #[must_use]
    pub fn new(registry: Arc<ValidatorRegistry>, owner: impl Into<String>) -> Self {
        Self {
            registry,
            owner: owner.into(),
            algorithm: Algorithm::default(),
            block_size: DEFAULT_BLOCK_SIZE,
            default: Mutex::new(None),
        }
    }

    /// Algorithm for the lazily created default validator.
    #[must_use]
    pub fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// Read size used when a call does not specify one.
    #[must_use]
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    /// The component's default validator, registered on first use.
    ///
    /// A validator already registered under the default name is reused only
    /// if it hashes whole objects with this component's algorithm and owner.
    ///
    /// # Errors
    ///
    /// Returns [`HashguardError::DuplicateName`] if the default name is held
    /// by an incompatible validator.
    pub fn default_validator(&self) -> Result<Arc<Validator>> {
        let mut slot = self.default.lock();
        if let Some(validator) = slot.as_ref() {
            return Ok(Arc::clone(validator));
        }
        let name = format!("file_validator_{}", self.owner);
        let validator = self.registry.get_or_register(
            &name,
            || {
                Validator::new(
                    name.as_str(),
                    format!("File validator for component {}", self.owner),
                )
                .with_algorithm(self.algorithm)
                .with_owner(self.owner.as_str())
            },
            |existing| {
                existing.algorithm().id() == self.algorithm.id()
                    && existing.attributes().is_none()
                    && existing.owner() == self.owner
            },
        )?;
        *slot = Some(Arc::clone(&validator));
        Ok(validator)
    }

    /// Hex digest of the file contents.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read, the hash file cannot be written, or
    /// the block size is zero.
    pub fn hash(&self, file: &Path, options: &FileHashOptions) -> Result<String> {
        Ok(self.hash_state(file, options)?.finalize())
    }

    /// Like [`hash`](Self::hash) but returns the digest state, which can be
    /// extended with more data.
    pub fn hash_state(&self, file: &Path, options: &FileHashOptions) -> Result<DigestState> {
        let validator = match &options.validator {
            Some(v) => Arc::clone(v),
            None => self.default_validator()?,
        };
        let block_size = options.block_size.unwrap_or(self.block_size);
        if block_size == 0 {
            return Err(HashguardError::config("block size must be greater than zero"));
        }

        let mut reader = fs::File::open(file)?;
        let mut buf = vec![0u8; block_size];
        let mut state = validator.new_state();
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            validator.update(&mut state, &buf[..n])?;
        }

        if let Some(hash_file) = &options.hash_file {
            fs::write(hash_file, state.hex_digest())?;
        }
        Ok(state)
    }

    /// Returns `true` if the file hashes to the expected digest.
    ///
    /// # Errors
    ///
    /// Returns [`HashguardError::Configuration`] unless exactly one of
    /// `check.digest` and `check.hash_file` is set, and IO errors for
    /// missing files.
    pub fn validate(&self, file: &Path, check: &FileCheck) -> Result<bool> {
        let expected = match (&check.digest, &check.hash_file) {
            (None, None) => {
                return Err(HashguardError::config("digest or hash file must be set"));
            }
            (Some(_), Some(_)) => {
                return Err(HashguardError::config(
                    "only one of digest and hash file may be set",
                ));
            }
            (Some(digest), None) => digest.clone(),
            (None, Some(hash_file)) => read_first_line(hash_file)?,
        };

        let options = FileHashOptions {
            validator: check.validator.clone(),
            hash_file: None,
            block_size: check.block_size,
        };
        Ok(self.hash(file, &options)? == expected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{tempdir, TempDir};

    fn setup(files: &[(&str, &[u8])]) -> (TempDir, FileValidator) {
        let dir = tempdir().unwrap();
        for (name, content) in files {
            fs::write(dir.path().join(name), content).unwrap();
        }
        let validator = FileValidator::new(Arc::new(ValidatorRegistry::new()), "my_plugin");
        (dir, validator)
    }

    #[test]
    fn same_content_same_hash() {
        let (dir, fv) = setup(&[("a.txt", b"content"), ("b.txt", b"content")]);
        let opts = FileHashOptions::default();
        let a = fv.hash(&dir.path().join("a.txt"), &opts).unwrap();
        let b = fv.hash(&dir.path().join("b.txt"), &opts).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn different_content_different_hash() {
        let (dir, fv) = setup(&[("a.txt", b"content"), ("c.txt", b"content_3")]);
        let opts = FileHashOptions::default();
        let a = fv.hash(&dir.path().join("a.txt"), &opts).unwrap();
        let c = fv.hash(&dir.path().join("c.txt"), &opts).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn file_hash_equals_raw_sha256() {
        let (dir, fv) = setup(&[("abc.txt", b"abc")]);
        let digest = fv
            .hash(&dir.path().join("abc.txt"), &FileHashOptions::default())
            .unwrap();
        assert_eq!(
            digest,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn block_size_does_not_change_digest() {
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let (dir, fv) = setup(&[("big.bin", &data)]);
        let path = dir.path().join("big.bin");
        let small = fv
            .hash(&path, &FileHashOptions::default().with_block_size(1024))
            .unwrap();
        let large = fv
            .hash(&path, &FileHashOptions::default().with_block_size(65536))
            .unwrap();
        let odd = fv
            .hash(&path, &FileHashOptions::default().with_block_size(7))
            .unwrap();
        assert_eq!(small, large);
        assert_eq!(small, odd);
    }

    #[test]
    fn zero_block_size_rejected() {
        let (dir, fv) = setup(&[("a.txt", b"content")]);
        let err = fv
            .hash(
                &dir.path().join("a.txt"),
                &FileHashOptions::default().with_block_size(0),
            )
            .unwrap_err();
        assert!(matches!(err, HashguardError::Configuration { .. }));
    }

    #[test]
    fn hash_file_holds_digest_on_first_line() {
        let (dir, fv) = setup(&[("a.txt", b"content")]);
        let hash_file = dir.path().join("a.hash");
        let digest = fv
            .hash(
                &dir.path().join("a.txt"),
                &FileHashOptions::default().with_hash_file(&hash_file),
            )
            .unwrap();
        assert_eq!(read_first_line(&hash_file).unwrap(), digest);
    }

    #[test]
    fn hash_state_can_be_finalized_later() {
        let (dir, fv) = setup(&[("a.txt", b"content")]);
        let path = dir.path().join("a.txt");
        let state = fv.hash_state(&path, &FileHashOptions::default()).unwrap();
        assert_eq!(
            state.finalize(),
            fv.hash(&path, &FileHashOptions::default()).unwrap()
        );
    }

    #[test]
    fn default_validator_is_registered_once() {
        let registry = Arc::new(ValidatorRegistry::new());
        let fv = FileValidator::new(Arc::clone(&registry), "my_plugin");
        let first = fv.default_validator().unwrap();
        let second = fv.default_validator().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.name(), "file_validator_my_plugin");
        assert_eq!(first.owner(), "my_plugin");
        assert_eq!(registry.get(None, Some("my_plugin")).len(), 1);
    }

    #[test]
    fn default_name_held_by_other_algorithm_is_refused() {
        let (dir, _) = setup(&[("a.txt", b"content")]);
        let registry = Arc::new(ValidatorRegistry::new());
        registry
            .register(
                Validator::new("file_validator_my_plugin", "custom")
                    .with_algorithm(Algorithm::Sha512)
                    .with_owner("my_plugin"),
            )
            .unwrap();
        let fv = FileValidator::new(Arc::clone(&registry), "my_plugin");
        let err = fv
            .hash(&dir.path().join("a.txt"), &FileHashOptions::default())
            .unwrap_err();
        assert!(matches!(
            err,
            HashguardError::DuplicateName {
                kind: "validator",
                ..
            }
        ));
    }

    #[test]
    fn matching_registered_default_is_reused() {
        let registry = Arc::new(ValidatorRegistry::new());
        let existing = registry
            .register(Validator::new("file_validator_my_plugin", "mine").with_owner("my_plugin"))
            .unwrap();
        let fv = FileValidator::new(Arc::clone(&registry), "my_plugin");
        assert!(Arc::ptr_eq(&fv.default_validator().unwrap(), &existing));
    }

    #[test]
    fn explicit_validator_changes_algorithm() {
        let (dir, fv) = setup(&[("a.txt", b"content")]);
        let path = dir.path().join("a.txt");
        let sha512 = Arc::new(Validator::new("x", "sha512").with_algorithm(Algorithm::Sha512));
        let digest = fv
            .hash(&path, &FileHashOptions::default().with_validator(sha512))
            .unwrap();
        assert_eq!(digest.len(), 128);
    }

    #[test]
    fn validate_with_literal_digest() {
        let (dir, fv) = setup(&[("a.txt", b"content")]);
        let path = dir.path().join("a.txt");
        let digest = fv.hash(&path, &FileHashOptions::default()).unwrap();
        assert!(fv.validate(&path, &FileCheck::digest(&digest)).unwrap());
        assert!(!fv.validate(&path, &FileCheck::digest("NoWay")).unwrap());
    }

    #[test]
    fn validate_with_hash_file_matches_literal() {
        let (dir, fv) = setup(&[("a.txt", b"content"), ("bad.hash", b"NoWay")]);
        let path = dir.path().join("a.txt");
        let hash_file = dir.path().join("a.hash");
        let digest = fv
            .hash(&path, &FileHashOptions::default().with_hash_file(&hash_file))
            .unwrap();
        let via_file = fv.validate(&path, &FileCheck::hash_file(&hash_file)).unwrap();
        let via_literal = fv.validate(&path, &FileCheck::digest(digest)).unwrap();
        assert!(via_file);
        assert_eq!(via_file, via_literal);
        assert!(!fv
            .validate(&path, &FileCheck::hash_file(dir.path().join("bad.hash")))
            .unwrap());
    }

    #[test]
    fn validate_with_hash_file_and_small_blocks() {
        let (dir, fv) = setup(&[("a.txt", b"content")]);
        let path = dir.path().join("a.txt");
        let hash_file = dir.path().join("a.hash");
        fv.hash(&path, &FileHashOptions::default().with_hash_file(&hash_file))
            .unwrap();
        let check = FileCheck::hash_file(&hash_file).with_block_size(1024);
        assert!(fv.validate(&path, &check).unwrap());
    }

    #[test]
    fn validate_requires_digest_or_hash_file() {
        let (dir, fv) = setup(&[("a.txt", b"content")]);
        let err = fv
            .validate(&dir.path().join("a.txt"), &FileCheck::default())
            .unwrap_err();
        assert!(matches!(err, HashguardError::Configuration { .. }));
    }

    #[test]
    fn validate_rejects_both_digest_and_hash_file() {
        let (dir, fv) = setup(&[("a.txt", b"content")]);
        let check = FileCheck::digest("No").with_hash_file("NoFilePath");
        let err = fv.validate(&dir.path().join("a.txt"), &check).unwrap_err();
        assert!(matches!(err, HashguardError::Configuration { .. }));
    }

    #[test]
    fn validate_missing_hash_file_is_not_found() {
        let (dir, fv) = setup(&[("a.txt", b"content")]);
        let check = FileCheck::hash_file(dir.path().join("NoFilePath"));
        let err = fv.validate(&dir.path().join("a.txt"), &check).unwrap_err();
        assert!(
            matches!(err, HashguardError::Io(ref e) if e.kind() == ErrorKind::NotFound),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn hash_missing_file_is_not_found() {
        let (dir, fv) = setup(&[]);
        let err = fv
            .hash(&dir.path().join("missing.txt"), &FileHashOptions::default())
            .unwrap_err();
        assert!(matches!(err, HashguardError::Io(ref e) if e.kind() == ErrorKind::NotFound));
    }
}
