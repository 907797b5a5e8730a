//! Third-party and device sign-in.
//!
//! Google, Apple and biometric flows all end in the same
//! [`IdentityResult`] shape, which the [`IdentityBridge`] turns into a
//! session login.

mod biometric;
mod bridge;

pub use biometric::{BiometricLogin, BiometricPrompt};
pub use bridge::IdentityBridge;

use async_trait::async_trait;
use thiserror::Error;

use crate::api::ApiError;
use crate::session::{SessionError, User};
use crate::storage::StorageError;

/// Credentials produced by a successful provider flow.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentityResult {
    /// Provider-side profile picture, if it shared one.
    pub profile: Option<String>,
    pub data: IdentityData,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IdentityData {
    pub token: String,
    pub user: User,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IdentityOutcome {
    SignedIn(IdentityResult),
    /// The provider does not exist on this platform or device.
    Unsupported,
}

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Sign-in was cancelled")]
    Cancelled,

    #[error("{provider} sign-in failed: {message}")]
    Provider { provider: String, message: String },

    #[error("{0} returned no usable token")]
    MissingToken(String),

    #[error("Biometric login is not set up on this device")]
    BiometricUnavailable,

    #[error("Saved session is no longer valid")]
    TokenRejected,

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// One external sign-in flow (Google, Apple, ...).
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Display name used in notices and logs.
    fn name(&self) -> &str;

    async fn sign_in(&self) -> Result<IdentityOutcome, IdentityError>;
}
