//! Configuration loading and shared access.

mod loader;
mod store;
mod types;

pub use loader::ConfigError;
pub use store::ConfigStore;
pub use types::{
    ApiConfig, CacheConfig, Config, RealtimeConfig, StorageConfig, ValidationConfig,
};
