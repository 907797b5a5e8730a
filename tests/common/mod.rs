//! Shared test utilities and mock infrastructure.

#![allow(dead_code, unused_imports)]

pub mod mock_backend;

use carlease::config::{Config, ConfigStore};
use carlease::notice::RecordingNotifier;
use carlease::session::{AuthToken, User};
use carlease::storage::{KeyValueStore, MemoryStore};
use carlease::AppContext;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Config pointing every domain at `base_url` with short timeouts.
pub fn test_config(base_url: &str) -> Config {
    let mut config = Config::default();
    config.api.base_url = base_url.to_string();
    config.api.timeout_seconds = 2;
    config.api.connect_timeout_seconds = 1;
    config
}

pub struct TestApp {
    pub ctx: AppContext,
    pub storage: Arc<MemoryStore>,
    pub notices: Arc<RecordingNotifier>,
}

/// Context over in-memory storage, talking to `base_url`.
pub fn make_app(base_url: &str) -> TestApp {
    make_app_with_storage(base_url, Arc::new(MemoryStore::new()))
}

pub fn make_app_with_storage(base_url: &str, storage: Arc<MemoryStore>) -> TestApp {
    let config = ConfigStore::new(test_config(base_url), PathBuf::from("/tmp/carlease-test.toml"));
    let notices = Arc::new(RecordingNotifier::new());
    let ctx = AppContext::bootstrap(config, storage.clone(), notices.clone())
        .expect("Failed to build context");
    TestApp {
        ctx,
        storage,
        notices,
    }
}

pub fn alice() -> User {
    User::new("u-alice", "Alice", "alice@example.com")
}

pub fn bob() -> User {
    User::new("u-bob", "Bob", "bob@example.com")
}

pub fn token(value: &str) -> AuthToken {
    AuthToken::new(value)
}

/// Poll `condition` until it holds or `timeout` passes.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
