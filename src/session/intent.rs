use super::state::User;
use super::token::AuthToken;
use crate::mvi::Intent;

#[derive(Debug, Clone)]
pub enum SessionIntent {
    /// Replace whatever session exists with an authenticated one.
    /// Ignored when the token is empty.
    Login { user: User, token: AuthToken },
    Logout,
    ContinueAsGuest,
    SetLoading(bool),
    AddFavorite(String),
    RemoveFavorite(String),
    /// Refresh the signed-in user's profile. Ignored for any other user id.
    UpdateUser(User),
}

impl Intent for SessionIntent {}
