//! Provider and biometric sign-in flows.

mod common;

use async_trait::async_trait;
use carlease::api::{ApiError, LeaseApi, QueryKey, QueryStatus};
use carlease::identity::{
    BiometricPrompt, IdentityData, IdentityError, IdentityOutcome, IdentityProvider,
    IdentityResult,
};
use carlease::notice::NoticeKind;
use carlease::session::{AuthMode, SessionError};
use carlease::storage::{KeyValueStore, BIOMETRIC_ENABLED_KEY, CACHED_TOKEN_KEY};
use common::mock_backend::{MockBackend, MockResponse};
use common::{alice, bob, make_app, token};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct FakeProvider {
    outcome: fn() -> Result<IdentityOutcome, IdentityError>,
}

#[async_trait]
impl IdentityProvider for FakeProvider {
    fn name(&self) -> &str {
        "Google"
    }

    async fn sign_in(&self) -> Result<IdentityOutcome, IdentityError> {
        (self.outcome)()
    }
}

fn signed_in() -> Result<IdentityOutcome, IdentityError> {
    Ok(IdentityOutcome::SignedIn(IdentityResult {
        profile: Some("https://cdn.example.com/alice.png".to_string()),
        data: IdentityData {
            token: "google-tok".to_string(),
            user: alice(),
        },
    }))
}

fn unsupported() -> Result<IdentityOutcome, IdentityError> {
    Ok(IdentityOutcome::Unsupported)
}

fn failing() -> Result<IdentityOutcome, IdentityError> {
    Err(IdentityError::Provider {
        provider: "Google".to_string(),
        message: "play services missing".to_string(),
    })
}

fn tokenless() -> Result<IdentityOutcome, IdentityError> {
    Ok(IdentityOutcome::SignedIn(IdentityResult {
        profile: None,
        data: IdentityData {
            token: String::new(),
            user: alice(),
        },
    }))
}

/// Prompt that always passes and counts how often it was shown.
#[derive(Default)]
struct CountingPrompt {
    shown: AtomicUsize,
}

#[async_trait]
impl BiometricPrompt for CountingPrompt {
    fn is_supported(&self) -> bool {
        true
    }

    async fn authenticate(&self, _reason: &str) -> Result<(), IdentityError> {
        self.shown.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct CancellingPrompt;

#[async_trait]
impl BiometricPrompt for CancellingPrompt {
    fn is_supported(&self) -> bool {
        true
    }

    async fn authenticate(&self, _reason: &str) -> Result<(), IdentityError> {
        Err(IdentityError::Cancelled)
    }
}

struct FailingPrompt;

#[async_trait]
impl BiometricPrompt for FailingPrompt {
    fn is_supported(&self) -> bool {
        true
    }

    async fn authenticate(&self, _reason: &str) -> Result<(), IdentityError> {
        Err(IdentityError::Provider {
            provider: "Biometrics".to_string(),
            message: "sensor locked out".to_string(),
        })
    }
}

/// Seed a lease query so sign-in has account data to drop.
async fn seed_lease_query(app: &common::TestApp) -> QueryKey {
    let key = LeaseApi::leases_key("u-alice");
    app.ctx
        .cache
        .fetch(&key, || async { Ok::<u32, ApiError>(1) })
        .await
        .unwrap();
    assert!(matches!(
        app.ctx.cache.status::<u32>(&key),
        QueryStatus::Success(_)
    ));
    key
}

#[tokio::test]
async fn test_provider_sign_in_logs_in() {
    let app = make_app("http://127.0.0.1:9");
    let provider = FakeProvider { outcome: signed_in };

    let user = app.ctx.identity.sign_in(&provider).await.unwrap().unwrap();

    assert_eq!(user.id, "u-alice");
    assert_eq!(
        user.profile_image_url.as_deref(),
        Some("https://cdn.example.com/alice.png")
    );
    assert_eq!(app.ctx.session.mode(), AuthMode::Authenticated);
    assert_eq!(app.ctx.session.token().unwrap().expose(), "google-tok");
    assert!(!app.ctx.session.is_loading());
}

#[tokio::test]
async fn test_unsupported_provider_leaves_session_alone() {
    let app = make_app("http://127.0.0.1:9");
    app.ctx.session.continue_as_guest();

    let result = app
        .ctx
        .identity
        .sign_in(&FakeProvider {
            outcome: unsupported,
        })
        .await
        .unwrap();

    assert!(result.is_none());
    assert_eq!(app.ctx.session.mode(), AuthMode::Guest);
    let notices = app.notices.notices();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].kind, NoticeKind::Info);
}

#[tokio::test]
async fn test_provider_failure_keeps_existing_session() {
    let app = make_app("http://127.0.0.1:9");
    app.ctx.session.login(bob(), token("bob-tok")).unwrap();

    let err = app
        .ctx
        .identity
        .sign_in(&FakeProvider { outcome: failing })
        .await
        .unwrap_err();

    assert!(matches!(err, IdentityError::Provider { .. }));
    assert_eq!(app.ctx.session.user().unwrap().id, "u-bob");
    assert_eq!(app.notices.count(), 1);
    assert!(!app.ctx.session.is_loading());
}

#[tokio::test]
async fn test_provider_without_token_is_refused() {
    let app = make_app("http://127.0.0.1:9");

    let err = app
        .ctx
        .identity
        .sign_in(&FakeProvider { outcome: tokenless })
        .await
        .unwrap_err();

    assert!(matches!(err, IdentityError::MissingToken(_)));
    assert_eq!(app.ctx.session.mode(), AuthMode::Anonymous);
}

#[tokio::test]
async fn test_provider_sign_in_respects_auth_mutex() {
    let app = make_app("http://127.0.0.1:9");
    let _held = app.ctx.session.begin_auth().unwrap();

    let err = app
        .ctx
        .identity
        .sign_in(&FakeProvider { outcome: signed_in })
        .await
        .unwrap_err();

    assert!(matches!(err, IdentityError::Session(SessionError::Busy)));
    assert_eq!(app.ctx.session.mode(), AuthMode::Anonymous);
}

#[tokio::test]
async fn test_biometric_availability_needs_token_and_flag() {
    let app = make_app("http://127.0.0.1:9");
    let biometric = app.ctx.biometric(Arc::new(CountingPrompt::default()));
    assert!(!biometric.is_available());

    app.storage.set_flag(BIOMETRIC_ENABLED_KEY, true).unwrap();
    assert!(!biometric.is_available());

    biometric.enable(&token("cached")).unwrap();
    assert!(biometric.is_available());

    biometric.disable().unwrap();
    assert!(!biometric.is_available());
    assert!(!app.storage.contains(CACHED_TOKEN_KEY));
}

#[tokio::test]
async fn test_biometric_login_with_valid_token() {
    let mock = MockBackend::start().await;
    mock.route(
        "POST",
        "/api/auth/validate-token",
        MockResponse::json(
            r#"{"success": true,
                "user": {"_id": "u-alice", "name": "Alice", "email": "alice@example.com"}}"#,
        ),
    )
    .await;
    let app = make_app(&mock.base_url());
    let prompt = Arc::new(CountingPrompt::default());
    let biometric = app.ctx.biometric(prompt.clone());
    biometric.enable(&token("cached-tok")).unwrap();

    let user = biometric.login().await.unwrap();

    assert_eq!(user.id, "u-alice");
    assert_eq!(prompt.shown.load(Ordering::SeqCst), 1);
    assert_eq!(app.ctx.session.token().unwrap().expose(), "cached-tok");

    let request = &mock.captured_requests().await[0];
    assert_eq!(request.header("authorization"), Some("Bearer cached-tok"));
}

#[tokio::test]
async fn test_biometric_rejected_token_is_forgotten() {
    let mock = MockBackend::start().await;
    mock.route(
        "POST",
        "/api/auth/validate-token",
        MockResponse::error(401, "Invalid token"),
    )
    .await;
    let app = make_app(&mock.base_url());
    let biometric = app.ctx.biometric(Arc::new(CountingPrompt::default()));
    biometric.enable(&token("revoked-tok")).unwrap();

    let err = biometric.login().await.unwrap_err();

    assert!(matches!(err, IdentityError::TokenRejected));
    assert!(!app.storage.contains(CACHED_TOKEN_KEY));
    assert!(!app.storage.get_flag(BIOMETRIC_ENABLED_KEY).unwrap());
    assert!(!biometric.is_available());
    assert_eq!(app.ctx.session.mode(), AuthMode::Anonymous);
    assert!(!app.ctx.session.is_loading());

    let notices = app.notices.notices();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].kind, NoticeKind::Warning);

    // Not offered again.
    assert!(matches!(
        biometric.login().await,
        Err(IdentityError::BiometricUnavailable)
    ));
    assert_eq!(mock.hits("POST", "/api/auth/validate-token").await, 1);
}

#[tokio::test]
async fn test_biometric_network_failure_keeps_cached_token() {
    let mock = MockBackend::start().await;
    mock.route(
        "POST",
        "/api/auth/validate-token",
        MockResponse::error(502, "Bad gateway"),
    )
    .await;
    let app = make_app(&mock.base_url());
    let biometric = app.ctx.biometric(Arc::new(CountingPrompt::default()));
    biometric.enable(&token("cached-tok")).unwrap();

    let err = biometric.login().await.unwrap_err();

    assert!(matches!(err, IdentityError::Api(_)));
    assert!(biometric.is_available());
}

#[tokio::test]
async fn test_biometric_cancel_sends_nothing() {
    let mock = MockBackend::start().await;
    let app = make_app(&mock.base_url());
    let biometric = app.ctx.biometric(Arc::new(CancellingPrompt));
    biometric.enable(&token("cached-tok")).unwrap();

    assert!(matches!(
        biometric.login().await,
        Err(IdentityError::Cancelled)
    ));
    assert!(mock.captured_requests().await.is_empty());
    assert!(biometric.is_available());
    assert!(!app.ctx.session.is_loading());
}

#[tokio::test]
async fn test_biometric_prompt_failure_is_reported() {
    let mock = MockBackend::start().await;
    let app = make_app(&mock.base_url());
    let biometric = app.ctx.biometric(Arc::new(FailingPrompt));
    biometric.enable(&token("cached-tok")).unwrap();

    let err = biometric.login().await.unwrap_err();

    assert!(matches!(err, IdentityError::Provider { .. }));
    let notices = app.notices.notices();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].kind, NoticeKind::Error);
    assert!(mock.captured_requests().await.is_empty());
    assert!(biometric.is_available());
    assert!(!app.ctx.session.is_loading());
}

#[tokio::test]
async fn test_provider_sign_in_drops_account_queries() {
    let app = make_app("http://127.0.0.1:9");
    let key = seed_lease_query(&app).await;

    app.ctx
        .identity
        .sign_in(&FakeProvider { outcome: signed_in })
        .await
        .unwrap()
        .unwrap();

    assert!(matches!(
        app.ctx.cache.status::<u32>(&key),
        QueryStatus::Idle
    ));
}

#[tokio::test]
async fn test_biometric_login_drops_account_queries() {
    let mock = MockBackend::start().await;
    mock.route(
        "POST",
        "/api/auth/validate-token",
        MockResponse::json(
            r#"{"success": true,
                "user": {"_id": "u-alice", "name": "Alice", "email": "alice@example.com"}}"#,
        ),
    )
    .await;
    let app = make_app(&mock.base_url());
    let key = seed_lease_query(&app).await;
    let biometric = app.ctx.biometric(Arc::new(CountingPrompt::default()));
    biometric.enable(&token("cached-tok")).unwrap();

    biometric.login().await.unwrap();

    assert!(matches!(
        app.ctx.cache.status::<u32>(&key),
        QueryStatus::Idle
    ));
}
