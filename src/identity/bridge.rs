use std::sync::Arc;

use super::{IdentityError, IdentityOutcome, IdentityProvider};
use crate::api::AuthApi;
use crate::notice::{Notice, Notifier};
use crate::session::{AuthToken, SessionError, SessionStore, User};

/// Runs an [`IdentityProvider`] under the session's auth mutex and signs in
/// with whatever it returns.
#[derive(Clone)]
pub struct IdentityBridge {
    auth: AuthApi,
    session: SessionStore,
    notifier: Arc<dyn Notifier>,
}

impl IdentityBridge {
    pub fn new(auth: AuthApi, session: SessionStore, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            auth,
            session,
            notifier,
        }
    }

    /// `Ok(None)` when the provider is not supported here. On failure the
    /// existing session is left untouched.
    pub async fn sign_in(&self, provider: &dyn IdentityProvider) -> Result<Option<User>, IdentityError> {
        let name = provider.name().to_string();
        let _guard = self.session.begin_auth()?;

        let outcome = match provider.sign_in().await {
            Ok(outcome) => outcome,
            Err(IdentityError::Cancelled) => {
                tracing::debug!(provider = %name, "Sign-in cancelled");
                return Err(IdentityError::Cancelled);
            }
            Err(e) => {
                tracing::warn!(provider = %name, error = %e, "Identity provider failed");
                self.notifier
                    .notify(Notice::error(format!("{} sign-in", name), e.to_string()));
                return Err(e);
            }
        };

        let result = match outcome {
            IdentityOutcome::SignedIn(result) => result,
            IdentityOutcome::Unsupported => {
                tracing::info!(provider = %name, "Identity provider unsupported");
                self.notifier.notify(Notice::info(
                    format!("{} sign-in", name),
                    format!("{} sign-in is not available on this device.", name),
                ));
                return Ok(None);
            }
        };

        let mut user = result.data.user;
        if user.profile_image_url.is_none() {
            user.profile_image_url = result.profile;
        }

        match self.auth.establish(user, AuthToken::new(result.data.token)) {
            Ok(user) => {
                tracing::info!(provider = %name, user_id = %user.id, "Signed in with identity provider");
                Ok(Some(user))
            }
            Err(SessionError::EmptyToken) => {
                let e = IdentityError::MissingToken(name.clone());
                self.notifier
                    .notify(Notice::error(format!("{} sign-in", name), e.to_string()));
                Err(e)
            }
            Err(e) => Err(e.into()),
        }
    }
}
