use super::intent::SessionIntent;
use super::state::{Auth, SessionState};
use crate::mvi::Reducer;

pub struct SessionReducer;

impl Reducer for SessionReducer {
    type State = SessionState;
    type Intent = SessionIntent;

    fn reduce(state: Self::State, intent: Self::Intent) -> Self::State {
        match intent {
            SessionIntent::Login { user, token } => {
                if token.is_empty() {
                    return state;
                }
                SessionState {
                    auth: Auth::Authenticated { user, token },
                    ..state
                }
            }
            SessionIntent::Logout => SessionState {
                auth: Auth::Anonymous,
                ..state
            },
            SessionIntent::ContinueAsGuest => SessionState {
                auth: Auth::Guest,
                ..state
            },
            SessionIntent::SetLoading(loading) => SessionState { loading, ..state },
            SessionIntent::AddFavorite(car_id) => {
                let mut state = state;
                let owner = state.favorites_owner();
                state.favorites.insert(owner, car_id);
                state
            }
            SessionIntent::RemoveFavorite(car_id) => {
                let mut state = state;
                let owner = state.favorites_owner();
                state.favorites.remove(&owner, &car_id);
                state
            }
            SessionIntent::UpdateUser(updated) => match state.auth {
                Auth::Authenticated { user, token } if user.id == updated.id => SessionState {
                    auth: Auth::Authenticated {
                        user: updated,
                        token,
                    },
                    ..state
                },
                auth => SessionState { auth, ..state },
            },
        }
    }
}
