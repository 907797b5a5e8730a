//! Signs the user out when an administrator deletes their account.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::task::JoinHandle;

use super::channel::{EventChannel, EventHandler, SubscriptionToken};
use crate::notice::{Notice, Notifier};
use crate::session::SessionStore;

/// Keeps one account-deleted subscription alive for the signed-in user.
///
/// Follows the session: subscribes when it becomes authenticated,
/// resubscribes when the user changes and unsubscribes when it leaves the
/// authenticated state or the watcher stops.
pub struct RevocationWatcher {
    inner: Arc<WatcherInner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

struct WatcherInner {
    channel: Arc<dyn EventChannel>,
    session: SessionStore,
    notifier: Arc<dyn Notifier>,
    event: String,
    active: Mutex<Active>,
}

#[derive(Default)]
struct Active {
    stopped: bool,
    subscription: Option<(String, SubscriptionToken)>,
}

impl RevocationWatcher {
    /// Start following `session`. Must be called inside a Tokio runtime.
    pub fn start(
        channel: Arc<dyn EventChannel>,
        session: SessionStore,
        notifier: Arc<dyn Notifier>,
        event: impl Into<String>,
    ) -> Self {
        let inner = Arc::new(WatcherInner {
            channel,
            session,
            notifier,
            event: event.into(),
            active: Mutex::new(Active::default()),
        });

        // Subscribe before the first sync so no transition is missed.
        let mut changes = inner.session.subscribe();
        inner.sync();

        let follower = inner.clone();
        let task = tokio::spawn(async move {
            while changes.changed().await.is_ok() {
                follower.sync();
            }
        });

        Self {
            inner,
            task: Mutex::new(Some(task)),
        }
    }

    /// Reconcile the subscription with the current session now instead of
    /// waiting for the background task.
    pub fn refresh(&self) {
        self.inner.sync();
    }

    /// User id the watcher is currently subscribed for.
    pub fn watching(&self) -> Option<String> {
        self.inner
            .active
            .lock()
            .subscription
            .as_ref()
            .map(|(user_id, _)| user_id.clone())
    }

    /// Unsubscribe and stop following the session. Idempotent.
    pub fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        let mut active = self.inner.active.lock();
        active.stopped = true;
        if let Some((user_id, token)) = active.subscription.take() {
            self.inner.channel.unsubscribe(token);
            tracing::debug!(user_id = %user_id, "Revocation watch stopped");
        }
    }
}

impl Drop for RevocationWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

impl WatcherInner {
    fn sync(&self) {
        let mut active = self.active.lock();
        let wanted = if active.stopped {
            None
        } else {
            self.session.user().map(|user| user.id)
        };

        let current = active.subscription.as_ref().map(|(id, _)| id.as_str());
        if current == wanted.as_deref() {
            return;
        }

        if let Some((user_id, token)) = active.subscription.take() {
            self.channel.unsubscribe(token);
            tracing::debug!(user_id = %user_id, "Revocation watch released");
        }

        if let Some(user_id) = wanted {
            let token = self.channel.subscribe(&self.event, self.handler());
            tracing::debug!(user_id = %user_id, event = %self.event, "Revocation watch armed");
            active.subscription = Some((user_id, token));
        }
    }

    fn handler(&self) -> EventHandler {
        let session = self.session.clone();
        let notifier = self.notifier.clone();
        Arc::new(move |data: &Value| {
            let Some(deleted) = event_user_id(data) else {
                tracing::debug!(payload = %data, "Account-deleted event without id");
                return;
            };
            // Compare against whoever is signed in when the event lands.
            if session.user().map(|u| u.id).as_deref() != Some(deleted.as_str()) {
                return;
            }

            tracing::warn!(user_id = %deleted, "Account deleted remotely, signing out");
            notifier.notify(Notice::error(
                "Account removed",
                "Your account was deleted by an administrator.",
            ));
            session.logout();
        })
    }
}

/// `id` as a string, accepting numeric ids too.
fn event_user_id(data: &Value) -> Option<String> {
    match data.get("id")? {
        Value::String(id) if !id.is_empty() => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_id_accepts_strings_and_numbers() {
        assert_eq!(event_user_id(&json!({"id": "u1"})).as_deref(), Some("u1"));
        assert_eq!(event_user_id(&json!({"id": 7})).as_deref(), Some("7"));
        assert_eq!(event_user_id(&json!({"id": ""})), None);
        assert_eq!(event_user_id(&json!({"userId": "u1"})), None);
        assert_eq!(event_user_id(&Value::Null), None);
    }
}
