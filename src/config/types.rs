use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration container.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub realtime: RealtimeConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
}

/// Backend REST API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Scheme + host (+ port) of the backend (e.g., "https://api.carlease.app").
    pub base_url: String,
    /// Base path of the public catalog domain.
    #[serde(default = "default_catalog_path")]
    pub catalog_path: String,
    /// Base path of the auth domain.
    #[serde(default = "default_auth_path")]
    pub auth_path: String,
    /// Base path of the lease domain.
    #[serde(default = "default_lease_path")]
    pub lease_path: String,
    /// Base path of the payment domain.
    #[serde(default = "default_payment_path")]
    pub payment_path: String,
    /// Total request deadline in seconds (default: 30).
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u32,
    /// Connection timeout in seconds (default: 5).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u32,
}

/// Real-time notification channel settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// WebSocket origin (e.g., "wss://api.carlease.app/events").
    pub url: String,
    /// Event name announcing an account removed by an administrator.
    #[serde(default = "default_revocation_event")]
    pub revocation_event: String,
    /// First reconnect delay in milliseconds (default: 500).
    #[serde(default = "default_reconnect_backoff_ms")]
    pub reconnect_backoff_ms: u64,
    /// Upper bound for the reconnect delay in milliseconds (default: 30000).
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Connect/handshake timeout in seconds (default: 10).
    #[serde(default = "default_ws_connect_timeout")]
    pub connect_timeout_seconds: u32,
}

/// Query cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Grace period before an unsubscribed entry is evicted (default: 60).
    #[serde(default = "default_keep_unused")]
    pub keep_unused_seconds: u64,
}

/// Device-local storage settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path of the state file. Defaults to `<data dir>/carlease/state.json`.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Client-side input validation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Number of digits in an OTP code (default: 4).
    #[serde(default = "default_otp_digits")]
    pub otp_digits: usize,
    /// Minimum accepted password length (default: 6).
    #[serde(default = "default_min_password_len")]
    pub min_password_len: usize,
}

fn default_catalog_path() -> String {
    "/api/public".to_string()
}

fn default_auth_path() -> String {
    "/api/auth".to_string()
}

fn default_lease_path() -> String {
    "/api/lease".to_string()
}

fn default_payment_path() -> String {
    "/api/payment".to_string()
}

fn default_timeout() -> u32 {
    30
}

fn default_connect_timeout() -> u32 {
    5
}

fn default_revocation_event() -> String {
    "userDeleted".to_string()
}

fn default_reconnect_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_ws_connect_timeout() -> u32 {
    10
}

fn default_keep_unused() -> u64 {
    60
}

fn default_otp_digits() -> usize {
    4
}

fn default_min_password_len() -> usize {
    6
}

impl ApiConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.timeout_seconds))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.connect_timeout_seconds))
    }
}

impl RealtimeConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.connect_timeout_seconds))
    }
}

impl CacheConfig {
    pub fn keep_unused(&self) -> Duration {
        Duration::from_secs(self.keep_unused_seconds)
    }
}

impl StorageConfig {
    /// Resolve the state file path, falling back to the platform data dir.
    pub fn resolved_path(&self) -> PathBuf {
        if let Some(path) = &self.path {
            return path.clone();
        }
        let data_dir = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
        data_dir.join("carlease").join("state.json")
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:5000".to_string(),
            catalog_path: default_catalog_path(),
            auth_path: default_auth_path(),
            lease_path: default_lease_path(),
            payment_path: default_payment_path(),
            timeout_seconds: default_timeout(),
            connect_timeout_seconds: default_connect_timeout(),
        }
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:5000/events".to_string(),
            revocation_event: default_revocation_event(),
            reconnect_backoff_ms: default_reconnect_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            connect_timeout_seconds: default_ws_connect_timeout(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            keep_unused_seconds: default_keep_unused(),
        }
    }
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            otp_digits: default_otp_digits(),
            min_password_len: default_min_password_len(),
        }
    }
}
