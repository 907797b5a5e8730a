//! Account endpoints and the session transitions they drive.
//!
//! Every call that can change who is signed in claims the session's auth
//! mutex first, so a second submission while one is in flight fails with
//! [`SessionError::Busy`](crate::session::SessionError::Busy) instead of
//! racing it.

use std::sync::Arc;

use serde_json::json;

use super::cache::{CacheTag, QueryCache, QueryKey, QueryResult};
use super::client::{Ack, ApiRequest, Domain, HttpClient};
use super::error::ApiError;
use super::models::{AuthPayload, ProfileUpdate, SignupPayload, TokenValidation};
use super::validation;
use crate::config::ValidationConfig;
use crate::notice::{Notice, Notifier};
use crate::session::{AuthToken, SessionError, SessionStore, User};

/// Tags whose data belongs to one account and must not outlive it.
const ACCOUNT_TAGS: [CacheTag; 3] = [CacheTag::Auth, CacheTag::Lease, CacheTag::Payment];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignupForm {
    pub name: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SignupOutcome {
    /// The server signed the new account in straight away.
    SignedIn(User),
    /// An OTP was mailed; call [`AuthApi::verify_email`] with it.
    VerificationRequired { message: Option<String> },
}

/// Outcome of checking the stored token at start-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Revalidation {
    /// Nothing to check.
    NoSession,
    Valid,
    /// The server refused the token and the session was torn down.
    Revoked,
}

#[derive(Clone)]
pub struct AuthApi {
    http: Arc<HttpClient>,
    cache: QueryCache,
    notifier: Arc<dyn Notifier>,
    rules: ValidationConfig,
}

impl AuthApi {
    pub fn new(
        http: Arc<HttpClient>,
        cache: QueryCache,
        notifier: Arc<dyn Notifier>,
        rules: ValidationConfig,
    ) -> Self {
        Self {
            http,
            cache,
            notifier,
            rules,
        }
    }

    fn session(&self) -> &SessionStore {
        self.http.session()
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<User, ApiError> {
        let email = validation::email(email)?;
        validation::required("Password", password)?;

        let _guard = self.session().begin_auth()?;
        let request = ApiRequest::post(Domain::Auth, "/login")
            .json(&json!({ "email": email, "password": password }))?;
        let payload: AuthPayload = self.http.send(request).await?;

        Ok(self.establish(payload.user, AuthToken::new(payload.token))?)
    }

    pub async fn signup(&self, form: &SignupForm) -> Result<SignupOutcome, ApiError> {
        let name = validation::required("Name", &form.name)?;
        let email = validation::email(&form.email)?;
        let password = validation::password(&form.password, self.rules.min_password_len)?;
        validation::confirmation(password, &form.confirm_password)?;

        let _guard = self.session().begin_auth()?;
        let request = ApiRequest::post(Domain::Auth, "/signup").json(&json!({
            "name": name,
            "email": email,
            "password": password,
        }))?;
        let payload: SignupPayload = self.http.send(request).await?;

        match (payload.user, payload.token) {
            (Some(user), Some(token)) if !token.trim().is_empty() => Ok(
                SignupOutcome::SignedIn(self.establish(user, AuthToken::new(token))?),
            ),
            _ => {
                tracing::info!(email = %email, "Account created, email verification pending");
                Ok(SignupOutcome::VerificationRequired {
                    message: payload.message,
                })
            }
        }
    }

    /// Sign out on the server and locally.
    ///
    /// The local session is torn down even when the server call fails; the
    /// failure is still returned.
    pub async fn logout(&self) -> Result<(), ApiError> {
        let _guard = self.session().begin_auth()?;

        let remote = if self.session().token().is_some() {
            self.http
                .send_ack(ApiRequest::post(Domain::Auth, "/logout"))
                .await
                .map(|_| ())
        } else {
            Ok(())
        };

        self.session().logout();
        self.cache.invalidate(&ACCOUNT_TAGS);

        if let Err(e) = &remote {
            tracing::warn!(error = %e, "Server logout failed, local session cleared");
        }
        remote
    }

    /// Resolve the account `token` belongs to without touching the session.
    pub async fn validate_token(&self, token: &AuthToken) -> Result<User, ApiError> {
        if token.is_empty() {
            return Err(SessionError::EmptyToken.into());
        }
        let request = ApiRequest::post(Domain::Auth, "/validate-token").bearer(token.clone());
        let validated: TokenValidation = self.http.send(request).await?;
        Ok(validated.user)
    }

    /// Check the rehydrated session against the server.
    ///
    /// A rejected token signs the user out with a notice. Transport failures
    /// leave the session alone and are returned.
    pub async fn revalidate_session(&self) -> Result<Revalidation, ApiError> {
        let Some(token) = self.session().token() else {
            return Ok(Revalidation::NoSession);
        };

        match self.validate_token(&token).await {
            Ok(user) => {
                // Profile may have changed on another device.
                if let Err(e) = self.session().update_user(user) {
                    tracing::debug!(error = %e, "Session changed during revalidation");
                }
                Ok(Revalidation::Valid)
            }
            Err(e) if e.is_rejection() => {
                tracing::warn!(error = %e, "Stored session rejected");
                self.session().logout();
                self.cache.invalidate(&ACCOUNT_TAGS);
                self.notifier.notify(Notice::warning(
                    "Session expired",
                    "Please sign in again.",
                ));
                Ok(Revalidation::Revoked)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn forgot_password(&self, email: &str) -> Result<Ack, ApiError> {
        let email = validation::email(email)?;
        let request =
            ApiRequest::post(Domain::Auth, "/forgot-password").json(&json!({ "email": email }))?;
        self.acknowledged(request).await
    }

    /// Check a password-reset code before asking for the new password.
    pub async fn match_otp(&self, email: &str, otp: &str) -> Result<Ack, ApiError> {
        let email = validation::email(email)?;
        let otp = validation::otp(otp, self.rules.otp_digits)?;

        let _guard = self.session().begin_auth()?;
        let request = ApiRequest::post(Domain::Auth, "/match-otp")
            .json(&json!({ "email": email, "otp": otp }))?;
        self.acknowledged(request).await
    }

    pub async fn resend_otp(&self, email: &str) -> Result<Ack, ApiError> {
        let email = validation::email(email)?;
        let request =
            ApiRequest::post(Domain::Auth, "/resend-otp").json(&json!({ "email": email }))?;
        self.acknowledged(request).await
    }

    pub async fn reset_password(
        &self,
        email: &str,
        otp: &str,
        password: &str,
        confirm: &str,
    ) -> Result<Ack, ApiError> {
        let email = validation::email(email)?;
        let otp = validation::otp(otp, self.rules.otp_digits)?;
        let password = validation::password(password, self.rules.min_password_len)?;
        validation::confirmation(password, confirm)?;

        let _guard = self.session().begin_auth()?;
        let request = ApiRequest::post(Domain::Auth, "/reset-password").json(&json!({
            "email": email,
            "otp": otp,
            "password": password,
        }))?;
        self.acknowledged(request).await
    }

    /// Confirm a new account with the mailed code.
    ///
    /// Returns the signed-in user when the server issues a token with the
    /// confirmation, `None` when the user still has to log in.
    pub async fn verify_email(&self, email: &str, otp: &str) -> Result<Option<User>, ApiError> {
        let email = validation::email(email)?;
        let otp = validation::otp(otp, self.rules.otp_digits)?;

        let _guard = self.session().begin_auth()?;
        let request = ApiRequest::post(Domain::Auth, "/verify-email")
            .json(&json!({ "email": email, "otp": otp }))?;
        let payload: SignupPayload = self.http.send(request).await?;

        match (payload.user, payload.token) {
            (Some(user), Some(token)) if !token.trim().is_empty() => {
                Ok(Some(self.establish(user, AuthToken::new(token))?))
            }
            _ => {
                self.cache.invalidate(&[CacheTag::Auth]);
                if let Some(message) = payload.message {
                    self.notifier.notify(Notice::success("Email verified", message));
                }
                Ok(None)
            }
        }
    }

    pub async fn change_password(
        &self,
        current: &str,
        password: &str,
        confirm: &str,
    ) -> Result<Ack, ApiError> {
        validation::required("Current password", current)?;
        let password = validation::password(password, self.rules.min_password_len)?;
        validation::confirmation(password, confirm)?;
        if self.session().token().is_none() {
            return Err(SessionError::NotAuthenticated.into());
        }

        let _guard = self.session().begin_auth()?;
        let request = ApiRequest::post(Domain::Auth, "/change-password").json(&json!({
            "currentPassword": current,
            "newPassword": password,
        }))?;
        self.acknowledged(request).await
    }

    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<User, ApiError> {
        if let Some(name) = &update.name {
            validation::required("Name", name)?;
        }
        if self.session().token().is_none() {
            return Err(SessionError::NotAuthenticated.into());
        }

        let request = ApiRequest::post(Domain::Auth, "/update-profile").json(update)?;
        let user: User = self.http.send(request).await?;

        self.session().update_user(user.clone())?;
        self.cache.invalidate(&[CacheTag::Auth]);
        Ok(user)
    }

    pub fn profile_key(user_id: &str) -> QueryKey {
        QueryKey::new(CacheTag::Auth, "profile").param("userId", user_id)
    }

    /// Signed-in user's profile as the server sees it.
    pub async fn profile(&self) -> QueryResult<User> {
        let Some(user) = self.session().user() else {
            return Err(Arc::new(SessionError::NotAuthenticated.into()));
        };
        let http = self.http.clone();
        self.cache
            .fetch(&Self::profile_key(&user.id), move || async move {
                http.send::<User>(ApiRequest::get(Domain::Auth, "/profile"))
                    .await
            })
            .await
    }

    /// Sign `user` in with `token`. Every sign-in path ends here, whichever
    /// credential produced the token.
    pub fn establish(&self, user: User, token: AuthToken) -> Result<User, SessionError> {
        self.session().login(user.clone(), token)?;
        // Whatever was cached belonged to the previous account.
        self.cache.invalidate(&ACCOUNT_TAGS);
        Ok(user)
    }

    /// Send an Auth mutation; on success cached Auth reads are stale.
    async fn acknowledged(&self, request: ApiRequest) -> Result<Ack, ApiError> {
        let ack = self.http.send_ack(request).await?;
        self.cache.invalidate(&[CacheTag::Auth]);
        Ok(ack)
    }
}
