use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::token::AuthToken;
use crate::mvi::State;

/// Owner bucket used for favorites while nobody is signed in.
const DEVICE_OWNER: &str = "device";

/// Signed-in user's profile.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(alias = "_id", default)]
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(default, alias = "profileImage")]
    pub profile_image_url: Option<String>,
    #[serde(default, alias = "drivingLicense")]
    pub driving_license_url: Option<String>,
}

impl User {
    pub fn new(id: impl Into<String>, name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            email: email.into(),
            profile_image_url: None,
            driving_license_url: None,
        }
    }
}

/// Discriminant of [`Auth`], used for display and persistence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AuthMode {
    #[default]
    Anonymous,
    Guest,
    Authenticated,
}

impl std::fmt::Display for AuthMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthMode::Anonymous => write!(f, "anonymous"),
            AuthMode::Guest => write!(f, "guest"),
            AuthMode::Authenticated => write!(f, "authenticated"),
        }
    }
}

/// Who is using the app. A token exists only inside `Authenticated`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Auth {
    #[default]
    Anonymous,
    Guest,
    Authenticated { user: User, token: AuthToken },
}

impl Auth {
    pub fn mode(&self) -> AuthMode {
        match self {
            Auth::Anonymous => AuthMode::Anonymous,
            Auth::Guest => AuthMode::Guest,
            Auth::Authenticated { .. } => AuthMode::Authenticated,
        }
    }

    pub fn user(&self) -> Option<&User> {
        match self {
            Auth::Authenticated { user, .. } => Some(user),
            _ => None,
        }
    }

    pub fn token(&self) -> Option<&AuthToken> {
        match self {
            Auth::Authenticated { token, .. } => Some(token),
            _ => None,
        }
    }

    fn favorites_owner(&self) -> String {
        match self {
            Auth::Authenticated { user, .. } => format!("user:{}", user.id),
            _ => DEVICE_OWNER.to_string(),
        }
    }
}

/// Favorite car ids, bucketed per owner.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Favorites(BTreeMap<String, BTreeSet<String>>);

impl Favorites {
    fn bucket(&self, owner: &str) -> Option<&BTreeSet<String>> {
        self.0.get(owner)
    }

    pub(crate) fn insert(&mut self, owner: String, car_id: String) {
        self.0.entry(owner).or_default().insert(car_id);
    }

    pub(crate) fn remove(&mut self, owner: &str, car_id: &str) {
        if let Some(bucket) = self.0.get_mut(owner) {
            bucket.remove(car_id);
            if bucket.is_empty() {
                self.0.remove(owner);
            }
        }
    }
}

/// Full session snapshot.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionState {
    pub(crate) auth: Auth,
    pub(crate) favorites: Favorites,
    pub(crate) loading: bool,
}

impl State for SessionState {}

impl SessionState {
    pub(crate) fn new(auth: Auth, favorites: Favorites) -> Self {
        Self {
            auth,
            favorites,
            loading: false,
        }
    }

    pub fn auth(&self) -> &Auth {
        &self.auth
    }

    pub fn mode(&self) -> AuthMode {
        self.auth.mode()
    }

    pub fn user(&self) -> Option<&User> {
        self.auth.user()
    }

    pub fn token(&self) -> Option<&AuthToken> {
        self.auth.token()
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// Favorites of whoever currently owns the session.
    pub fn favorites(&self) -> BTreeSet<String> {
        self.favorites
            .bucket(&self.auth.favorites_owner())
            .cloned()
            .unwrap_or_default()
    }

    pub fn is_favorite(&self, car_id: &str) -> bool {
        self.favorites
            .bucket(&self.auth.favorites_owner())
            .is_some_and(|bucket| bucket.contains(car_id))
    }

    pub(crate) fn favorites_owner(&self) -> String {
        self.auth.favorites_owner()
    }

    pub(crate) fn all_favorites(&self) -> &Favorites {
        &self.favorites
    }
}

/// On-disk shape of the whitelisted session fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PersistedSession {
    pub auth_mode: AuthMode,
    #[serde(default)]
    pub user: Option<User>,
    #[serde(default)]
    pub token: Option<AuthToken>,
}

impl From<&Auth> for PersistedSession {
    fn from(auth: &Auth) -> Self {
        Self {
            auth_mode: auth.mode(),
            user: auth.user().cloned(),
            token: auth.token().cloned(),
        }
    }
}

impl PersistedSession {
    /// Rebuild the session; `None` when the record breaks the token invariant.
    pub fn into_auth(self) -> Option<Auth> {
        match (self.auth_mode, self.user, self.token) {
            (AuthMode::Anonymous, None, None) => Some(Auth::Anonymous),
            (AuthMode::Guest, None, None) => Some(Auth::Guest),
            (AuthMode::Authenticated, Some(user), Some(token)) if !token.is_empty() => {
                Some(Auth::Authenticated { user, token })
            }
            _ => None,
        }
    }
}
