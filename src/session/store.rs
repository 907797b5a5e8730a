//! Shared session store.
//!
//! The only mutation surface for session state. Every action runs the
//! reducer under the write lock, persists the whitelisted subset and then
//! publishes the new snapshot, so observers never see a half-applied action.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::RwLock;
use scopeguard::ScopeGuard;
use thiserror::Error;
use tokio::sync::watch;

use super::intent::SessionIntent;
use super::reducer::SessionReducer;
use super::state::{Auth, AuthMode, Favorites, PersistedSession, SessionState, User};
use super::token::AuthToken;
use crate::mvi::Reducer;
use crate::notice::{Notice, Notifier};
use crate::storage::{KeyValueStore, StorageError, FAVORITES_KEY, SESSION_KEY};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("Cannot sign in with an empty token")]
    EmptyToken,

    #[error("Another sign-in request is already in progress")]
    Busy,

    #[error("No user is signed in")]
    NotAuthenticated,
}

/// Clears the `loading` flag when dropped.
pub type AuthGuard = ScopeGuard<SessionStore, fn(SessionStore)>;

#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    state: RwLock<SessionState>,
    storage: Arc<dyn KeyValueStore>,
    notifier: Arc<dyn Notifier>,
    changes: watch::Sender<SessionState>,
}

impl SessionStore {
    /// Build the store from whatever the key-value store holds.
    ///
    /// Missing or corrupt records fall back to an anonymous session.
    pub fn rehydrate(storage: Arc<dyn KeyValueStore>, notifier: Arc<dyn Notifier>) -> Self {
        let auth = load_auth(storage.as_ref());
        let favorites = load_favorites(storage.as_ref());
        let state = SessionState::new(auth, favorites);

        tracing::debug!(mode = %state.mode(), "Session rehydrated");

        let (changes, _) = watch::channel(state.clone());
        Self {
            inner: Arc::new(SessionInner {
                state: RwLock::new(state),
                storage,
                notifier,
                changes,
            }),
        }
    }

    pub fn snapshot(&self) -> SessionState {
        self.inner.state.read().clone()
    }

    /// Receiver that yields every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.changes.subscribe()
    }

    pub fn mode(&self) -> AuthMode {
        self.inner.state.read().mode()
    }

    pub fn token(&self) -> Option<AuthToken> {
        self.inner.state.read().token().cloned()
    }

    pub fn user(&self) -> Option<User> {
        self.inner.state.read().user().cloned()
    }

    pub fn is_loading(&self) -> bool {
        self.inner.state.read().is_loading()
    }

    pub fn favorites(&self) -> BTreeSet<String> {
        self.inner.state.read().favorites()
    }

    pub fn login(&self, user: User, token: AuthToken) -> Result<(), SessionError> {
        if token.is_empty() {
            return Err(SessionError::EmptyToken);
        }
        let user_id = user.id.clone();
        self.dispatch(SessionIntent::Login { user, token });
        tracing::info!(user_id = %user_id, "Signed in");
        Ok(())
    }

    /// Safe to call when already signed out.
    pub fn logout(&self) {
        if self.dispatch(SessionIntent::Logout) {
            tracing::info!("Signed out");
        }
    }

    pub fn continue_as_guest(&self) {
        if self.dispatch(SessionIntent::ContinueAsGuest) {
            tracing::info!("Continuing as guest");
        }
    }

    pub fn set_loading(&self, loading: bool) {
        self.dispatch(SessionIntent::SetLoading(loading));
    }

    /// Claim the auth mutex.
    ///
    /// Fails with [`SessionError::Busy`] while another auth request holds it.
    /// The returned guard resets `loading` on drop, whatever the exit path.
    pub fn begin_auth(&self) -> Result<AuthGuard, SessionError> {
        let outcome = self.transition(SessionIntent::SetLoading(true), |state| {
            !state.is_loading()
        });
        if outcome == Transition::Rejected {
            return Err(SessionError::Busy);
        }
        Ok(scopeguard::guard(self.clone(), release_loading as fn(SessionStore)))
    }

    pub fn add_favorite(&self, car_id: impl Into<String>) {
        self.dispatch(SessionIntent::AddFavorite(car_id.into()));
    }

    pub fn remove_favorite(&self, car_id: &str) {
        self.dispatch(SessionIntent::RemoveFavorite(car_id.to_string()));
    }

    /// Replace the signed-in user's profile after a server-side update.
    pub fn update_user(&self, user: User) -> Result<(), SessionError> {
        let user_id = user.id.clone();
        let outcome = self.transition(SessionIntent::UpdateUser(user), |state| {
            state.user().is_some_and(|current| current.id == user_id)
        });
        match outcome {
            Transition::Rejected => Err(SessionError::NotAuthenticated),
            Transition::Unchanged | Transition::Applied => Ok(()),
        }
    }

    /// Apply an intent. Returns whether the state changed.
    fn dispatch(&self, intent: SessionIntent) -> bool {
        self.transition(intent, |_| true) == Transition::Applied
    }

    /// Apply `intent` only if `precondition` holds on the current state.
    fn transition(
        &self,
        intent: SessionIntent,
        precondition: impl FnOnce(&SessionState) -> bool,
    ) -> Transition {
        let mut state = self.inner.state.write();
        if !precondition(&state) {
            return Transition::Rejected;
        }

        let previous = state.clone();
        let next = SessionReducer::reduce(previous.clone(), intent);
        if next == previous {
            return Transition::Unchanged;
        }

        // Persist while still holding the lock so disk writes follow apply order.
        let persist_result = self.persist(&previous, &next);
        *state = next.clone();
        self.inner.changes.send_replace(next);
        drop(state);

        if let Err(e) = persist_result {
            tracing::warn!(error = %e, "Failed to persist session, keeping in-memory state");
            self.inner.notifier.notify(Notice::warning(
                "Session not saved",
                "Your session could not be saved and may be lost when the app restarts.",
            ));
        }
        Transition::Applied
    }

    fn persist(&self, previous: &SessionState, next: &SessionState) -> Result<(), StorageError> {
        let storage = self.inner.storage.as_ref();

        if previous.auth() != next.auth() {
            let record = PersistedSession::from(next.auth());
            let json = serde_json::to_string(&record).map_err(|e| StorageError::Unavailable(
                format!("failed to encode session: {}", e),
            ))?;
            storage.set(SESSION_KEY, &json)?;
        }

        if previous.all_favorites() != next.all_favorites() {
            let json = serde_json::to_string(next.all_favorites()).map_err(|e| {
                StorageError::Unavailable(format!("failed to encode favorites: {}", e))
            })?;
            storage.set(FAVORITES_KEY, &json)?;
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    Rejected,
    Unchanged,
    Applied,
}

fn release_loading(store: SessionStore) {
    store.set_loading(false);
}

fn load_auth(storage: &dyn KeyValueStore) -> Auth {
    let raw = match storage.get(SESSION_KEY) {
        Ok(Some(raw)) => raw,
        Ok(None) => return Auth::Anonymous,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to read persisted session");
            return Auth::Anonymous;
        }
    };

    let record = match serde_json::from_str::<PersistedSession>(&raw) {
        Ok(record) => record,
        Err(e) => {
            tracing::warn!(error = %e, "Persisted session is corrupt, starting anonymous");
            return Auth::Anonymous;
        }
    };

    record.into_auth().unwrap_or_else(|| {
        tracing::warn!("Persisted session violates token invariant, starting anonymous");
        Auth::Anonymous
    })
}

fn load_favorites(storage: &dyn KeyValueStore) -> Favorites {
    match storage.get(FAVORITES_KEY) {
        Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Persisted favorites are corrupt, starting empty");
            Favorites::default()
        }),
        Ok(None) => Favorites::default(),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to read persisted favorites");
            Favorites::default()
        }
    }
}
