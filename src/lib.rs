pub mod command;
pub mod config;
pub mod context;
pub mod digest;
pub mod errors;
pub mod file;
mod fs_util;
pub mod guard;
pub mod registry;
pub mod storage;
pub mod store;
pub mod validator;

// Re-export key types at crate root for convenience.
pub use command::{AllowedReturnCodes, Charset, CommandCheck, CommandRunner, CommandValidator};
pub use config::Config;
pub use context::{Component, ValidationContext};
pub use digest::{Algorithm, DigestAlgorithm, DigestState};
pub use errors::{HashguardError, Result};
pub use file::{FileCheck, FileHashOptions, FileValidator};
pub use guard::{GuardRegistry, MissingDigestPolicy, RowGuard, Verdict};
pub use registry::ValidatorRegistry;
pub use storage::{Database, RecordType, Row};
pub use store::{IntegrityKey, IntegrityStore, JsonFileStore, MemoryStore, TableStore};
pub use validator::Validator;
