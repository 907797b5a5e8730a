//! Base trait for intents (user/system actions).

/// Marker trait for intent objects.
///
/// Intents represent:
/// - User actions (login, logout, toggling a favorite)
/// - System events (server responses, pushed notifications)
///
/// Intents are processed by reducers to produce new states.
pub trait Intent: Send + 'static {}
