//! Event subscription registry.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// Callback for one named event. Runs on the dispatching task and must not
/// block for long.
pub type EventHandler = Arc<dyn Fn(&Value) + Send + Sync>;

/// Identifies one registration; hand it back to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(Uuid);

impl SubscriptionToken {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SubscriptionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Invalid channel URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Connection failed: {0}")]
    Connect(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Connection attempt timed out after {0}s")]
    ConnectTimeout(u64),

    #[error("Malformed event frame: {0}")]
    MalformedFrame(String),
}

/// Source of server-pushed events.
pub trait EventChannel: Send + Sync {
    fn subscribe(&self, event: &str, handler: EventHandler) -> SubscriptionToken;

    /// Returns whether the token was still registered. Once this returns the
    /// handler will not be called again.
    fn unsubscribe(&self, token: SubscriptionToken) -> bool;
}

/// Wire shape of a pushed event.
#[derive(Debug, Clone, Deserialize)]
pub struct EventFrame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl EventFrame {
    pub fn parse(text: &str) -> Result<Self, ChannelError> {
        serde_json::from_str(text).map_err(|e| ChannelError::MalformedFrame(e.to_string()))
    }
}

/// In-process registry that delivers events one at a time.
///
/// Dispatch is serialized: a second `dispatch` waits for the first to run
/// all its handlers. Handlers may unsubscribe (themselves or others) from
/// inside a dispatch.
#[derive(Default)]
pub struct EventHub {
    handlers: Mutex<HashMap<String, Vec<(SubscriptionToken, EventHandler)>>>,
    dispatch_lock: ReentrantMutex<()>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `data` to every handler registered for `event`, in
    /// registration order. Returns how many handlers ran.
    pub fn dispatch(&self, event: &str, data: &Value) -> usize {
        let _serial = self.dispatch_lock.lock();

        let snapshot: Vec<(SubscriptionToken, EventHandler)> = match self.handlers.lock().get(event)
        {
            Some(list) => list.clone(),
            None => {
                tracing::trace!(event = %event, "No handlers for event");
                return 0;
            }
        };

        let mut delivered = 0;
        for (token, handler) in snapshot {
            // An earlier handler may have removed this one.
            if !self.is_registered(event, token) {
                continue;
            }
            handler(data);
            delivered += 1;
        }
        tracing::debug!(event = %event, delivered, "Event dispatched");
        delivered
    }

    pub fn dispatch_frame(&self, frame: &EventFrame) -> usize {
        self.dispatch(&frame.event, &frame.data)
    }

    pub fn handler_count(&self, event: &str) -> usize {
        self.handlers.lock().get(event).map_or(0, Vec::len)
    }

    fn is_registered(&self, event: &str, token: SubscriptionToken) -> bool {
        self.handlers
            .lock()
            .get(event)
            .is_some_and(|list| list.iter().any(|(t, _)| *t == token))
    }
}

impl EventChannel for EventHub {
    fn subscribe(&self, event: &str, handler: EventHandler) -> SubscriptionToken {
        let token = SubscriptionToken::new();
        self.handlers
            .lock()
            .entry(event.to_string())
            .or_default()
            .push((token, handler));
        tracing::debug!(event = %event, token = %token, "Subscribed");
        token
    }

    fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        let removed = {
            let mut handlers = self.handlers.lock();
            let mut removed = false;
            handlers.retain(|_, list| {
                let before = list.len();
                list.retain(|(t, _)| *t != token);
                removed |= list.len() != before;
                !list.is_empty()
            });
            removed
        };
        // Wait out a dispatch running on another thread.
        drop(self.dispatch_lock.lock());
        if removed {
            tracing::debug!(token = %token, "Unsubscribed");
        }
        removed
    }
}
