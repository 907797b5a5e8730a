//! Authentication/session state machine.
//!
//! `Anonymous`, `Guest` and `Authenticated` are mutually exclusive; only the
//! last one carries a user and a bearer token.

mod intent;
mod reducer;
mod state;
mod store;
mod token;

pub use intent::SessionIntent;
pub use reducer::SessionReducer;
pub use state::{Auth, AuthMode, SessionState, User};
pub use store::{AuthGuard, SessionError, SessionStore};
pub use token::AuthToken;
