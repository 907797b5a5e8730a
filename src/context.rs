//! Explicit wiring of every long-lived service.

use std::sync::Arc;

use crate::api::{ApiError, AuthApi, CatalogApi, HttpClient, LeaseApi, PaymentApi, QueryCache};
use crate::config::{Config, ConfigStore};
use crate::identity::{BiometricLogin, BiometricPrompt, IdentityBridge};
use crate::notice::Notifier;
use crate::realtime::{ChannelError, EventChannel, RevocationWatcher, WebSocketChannel};
use crate::session::SessionStore;
use crate::storage::KeyValueStore;

/// Everything a front end needs, built once at start and passed around.
#[derive(Clone)]
pub struct AppContext {
    pub config: ConfigStore,
    pub storage: Arc<dyn KeyValueStore>,
    pub notifier: Arc<dyn Notifier>,
    pub session: SessionStore,
    pub cache: QueryCache,
    pub catalog: CatalogApi,
    pub auth: AuthApi,
    pub lease: LeaseApi,
    pub payment: PaymentApi,
    pub identity: IdentityBridge,
}

impl AppContext {
    /// Rehydrate the session from `storage` and build the API clients.
    pub fn bootstrap(
        config: ConfigStore,
        storage: Arc<dyn KeyValueStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, ApiError> {
        let Config {
            api,
            cache,
            validation,
            ..
        } = config.get();

        let session = SessionStore::rehydrate(storage.clone(), notifier.clone());
        let cache = QueryCache::new(cache.keep_unused());
        let http = Arc::new(HttpClient::new(api, session.clone())?);

        let auth = AuthApi::new(http.clone(), cache.clone(), notifier.clone(), validation);

        tracing::debug!(mode = %session.mode(), "Application context ready");

        Ok(Self {
            catalog: CatalogApi::new(http.clone(), cache.clone()),
            lease: LeaseApi::new(http.clone(), cache.clone()),
            payment: PaymentApi::new(http, cache.clone()),
            identity: IdentityBridge::new(auth.clone(), session.clone(), notifier.clone()),
            auth,
            config,
            storage,
            notifier,
            session,
            cache,
        })
    }

    pub fn biometric(&self, prompt: Arc<dyn BiometricPrompt>) -> BiometricLogin {
        BiometricLogin::new(
            self.storage.clone(),
            self.auth.clone(),
            self.session.clone(),
            self.notifier.clone(),
            prompt,
        )
    }

    /// Follow the session on `channel` and sign out on account deletion.
    pub fn watch_revocations(&self, channel: Arc<dyn EventChannel>) -> RevocationWatcher {
        let event = self.config.get().realtime.revocation_event;
        RevocationWatcher::start(channel, self.session.clone(), self.notifier.clone(), event)
    }

    /// Open the configured WebSocket and arm the revocation watcher on it.
    pub fn connect_realtime(
        &self,
    ) -> Result<(Arc<WebSocketChannel>, RevocationWatcher), ChannelError> {
        let channel = Arc::new(WebSocketChannel::spawn(&self.config.get().realtime)?);
        let watcher = self.watch_revocations(channel.clone());
        Ok((channel, watcher))
    }
}
