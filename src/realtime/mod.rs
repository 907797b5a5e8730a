//! Server-pushed events.

mod channel;
mod revocation;
mod websocket;

pub use channel::{ChannelError, EventChannel, EventFrame, EventHandler, EventHub, SubscriptionToken};
pub use revocation::RevocationWatcher;
pub use websocket::{ConnectionState, WebSocketChannel};
