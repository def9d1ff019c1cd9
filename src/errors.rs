use thiserror::Error;

/// Errors that can occur while hashing, validating, or guarding data.
#[derive(Error, Debug)]
pub enum HashguardError {
    /// Contradictory or incomplete parameters.
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// A validator or guard with this name is already registered.
    #[error("{kind} '{name}' already registered")]
    DuplicateName { kind: &'static str, name: String },

    /// No validator or guard with this name is registered.
    #[error("{kind} '{name}' does not exist")]
    NotFound { kind: &'static str, name: String },

    /// Command exited with a code outside the allow-list.
    #[error("for command '{command}' got return code {code}, which is not in {allowed:?}")]
    NotAllowedReturnCode {
        command: String,
        code: i32,
        allowed: Vec<i32>,
    },

    /// Command did not finish within its timeout.
    #[error("command '{command}' timed out after {timeout:?}")]
    CommandTimeoutExpired {
        command: String,
        timeout: std::time::Duration,
    },

    /// Stored digest does not match the recomputed digest.
    #[error("stored hash {stored} for '{key}' not valid, calculated {computed}")]
    Validation {
        key: String,
        stored: String,
        computed: String,
    },

    /// No stored digest exists and the guard does not trust first use.
    #[error("no stored hash for '{key}'")]
    MissingDigest { key: String },

    /// Strict hashing requested an attribute the object does not have.
    #[error("data has no attribute called '{attribute}'")]
    MissingAttribute { attribute: String },

    /// Command output could not be decoded with the requested charset.
    #[error("cannot decode output of '{command}' as {charset}")]
    Decode {
        command: String,
        charset: &'static str,
    },

    /// Filesystem I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML deserialization error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),
}

impl HashguardError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}

/// Convenience alias for `Result<T, HashguardError>`.
pub type Result<T> = std::result::Result<T, HashguardError>;
