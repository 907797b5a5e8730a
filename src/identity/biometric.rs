//! Device-biometric login backed by a locally cached bearer token.

use std::sync::Arc;

use async_trait::async_trait;

use super::IdentityError;
use crate::api::AuthApi;
use crate::notice::{Notice, Notifier};
use crate::session::{AuthToken, SessionStore, User};
use crate::storage::{KeyValueStore, BIOMETRIC_ENABLED_KEY, CACHED_TOKEN_KEY};

/// Platform fingerprint / face prompt.
#[async_trait]
pub trait BiometricPrompt: Send + Sync {
    /// Whether the device has enrolled biometrics at all.
    fn is_supported(&self) -> bool;

    /// `Ok` once the user passed the check; [`IdentityError::Cancelled`] if
    /// they backed out.
    async fn authenticate(&self, reason: &str) -> Result<(), IdentityError>;
}

pub struct BiometricLogin {
    storage: Arc<dyn KeyValueStore>,
    auth: AuthApi,
    session: SessionStore,
    notifier: Arc<dyn Notifier>,
    prompt: Arc<dyn BiometricPrompt>,
}

impl BiometricLogin {
    pub fn new(
        storage: Arc<dyn KeyValueStore>,
        auth: AuthApi,
        session: SessionStore,
        notifier: Arc<dyn Notifier>,
        prompt: Arc<dyn BiometricPrompt>,
    ) -> Self {
        Self {
            storage,
            auth,
            session,
            notifier,
            prompt,
        }
    }

    /// True only with a supported prompt, a cached token and the opt-in flag.
    pub fn is_available(&self) -> bool {
        if !self.prompt.is_supported() {
            return false;
        }
        match (self.enabled(), self.cached_token()) {
            (Ok(enabled), Ok(token)) => enabled && token.is_some(),
            (Err(e), _) | (_, Err(e)) => {
                tracing::warn!(error = %e, "Could not read biometric settings");
                false
            }
        }
    }

    /// Opt in, caching `token` for later biometric logins.
    pub fn enable(&self, token: &AuthToken) -> Result<(), IdentityError> {
        if token.is_empty() {
            return Err(IdentityError::MissingToken("Biometric".to_string()));
        }
        self.storage.set(CACHED_TOKEN_KEY, token.expose())?;
        self.storage.set_flag(BIOMETRIC_ENABLED_KEY, true)?;
        tracing::info!("Biometric login enabled");
        Ok(())
    }

    pub fn disable(&self) -> Result<(), IdentityError> {
        self.storage.remove(CACHED_TOKEN_KEY)?;
        self.storage.set_flag(BIOMETRIC_ENABLED_KEY, false)?;
        tracing::info!("Biometric login disabled");
        Ok(())
    }

    /// Prompt, check the cached token with the server and sign in with it.
    ///
    /// A token the server refuses is forgotten together with the opt-in,
    /// so biometrics are not offered again until re-enabled.
    pub async fn login(&self) -> Result<User, IdentityError> {
        if !self.is_available() {
            return Err(IdentityError::BiometricUnavailable);
        }
        let token = self
            .cached_token()?
            .ok_or(IdentityError::BiometricUnavailable)?;

        let _guard = self.session.begin_auth()?;
        match self.prompt.authenticate("Sign in to your account").await {
            Ok(()) => {}
            Err(IdentityError::Cancelled) => {
                tracing::debug!("Biometric prompt cancelled");
                return Err(IdentityError::Cancelled);
            }
            Err(e) => {
                tracing::warn!(error = %e, "Biometric prompt failed");
                self.notifier
                    .notify(Notice::error("Biometric sign-in", e.to_string()));
                return Err(e);
            }
        }

        match self.auth.validate_token(&token).await {
            Ok(user) => {
                let user = self.auth.establish(user, token)?;
                tracing::info!(user_id = %user.id, "Signed in with biometrics");
                Ok(user)
            }
            Err(e) if e.is_rejection() => {
                tracing::warn!(error = %e, "Cached token rejected, disabling biometric login");
                if let Err(clear) = self.disable() {
                    tracing::warn!(error = %clear, "Failed to clear biometric settings");
                }
                self.notifier.notify(Notice::warning(
                    "Biometric login disabled",
                    "Your saved session has expired. Please sign in with your password.",
                ));
                Err(IdentityError::TokenRejected)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn enabled(&self) -> Result<bool, IdentityError> {
        Ok(self.storage.get_flag(BIOMETRIC_ENABLED_KEY)?)
    }

    fn cached_token(&self) -> Result<Option<AuthToken>, IdentityError> {
        Ok(self
            .storage
            .get(CACHED_TOKEN_KEY)?
            .map(AuthToken::new)
            .filter(|token| !token.is_empty()))
    }
}
