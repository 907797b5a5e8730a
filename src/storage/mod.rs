//! Device-local key-value persistence.
//!
//! Session state is rehydrated from here on start. Values are opaque
//! strings; callers own the encoding.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use std::path::PathBuf;

use thiserror::Error;

/// Namespaced key holding the persisted session subset.
pub const SESSION_KEY: &str = "persist:session";
/// Namespaced key holding per-owner favorites.
pub const FAVORITES_KEY: &str = "persist:favorites";
/// Locally cached bearer token used by biometric login.
pub const CACHED_TOKEN_KEY: &str = "token";
/// Whether the user opted into biometric login.
pub const BIOMETRIC_ENABLED_KEY: &str = "biometric_enabled";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Failed to access state file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("State file '{path}' is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Durable string key-value storage.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<(), StorageError>;

    fn get_flag(&self, key: &str) -> Result<bool, StorageError> {
        Ok(matches!(self.get(key)?.as_deref(), Some("true")))
    }

    fn set_flag(&self, key: &str, value: bool) -> Result<(), StorageError> {
        self.set(key, if value { "true" } else { "false" })
    }
}
