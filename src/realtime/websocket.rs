//! WebSocket event channel with transparent reconnects.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use super::channel::{ChannelError, EventChannel, EventFrame, EventHandler, EventHub, SubscriptionToken};
use crate::config::RealtimeConfig;

type Socket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    /// Waiting out the backoff before the next attempt.
    Disconnected,
    Closed,
}

/// One-shot close signal shared with the connection task.
#[derive(Clone, Default)]
struct CloseSignal {
    closed: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CloseSignal {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Returns false if already closed.
    fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.notify.notify_waiters();
        true
    }

    async fn wait(&self) {
        // Register before checking the flag so a concurrent close() is not lost.
        let notified = self.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_closed() {
            return;
        }
        notified.await;
    }
}

/// Persistent connection to the event endpoint.
///
/// Frames are `{"event": <name>, "data": <payload>}` text messages,
/// dispatched in receipt order. Lost connections are retried with
/// exponential backoff until [`close`](Self::close).
pub struct WebSocketChannel {
    hub: Arc<EventHub>,
    signal: CloseSignal,
    state: watch::Receiver<ConnectionState>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl WebSocketChannel {
    /// Start connecting in the background. Must be called inside a Tokio
    /// runtime.
    pub fn spawn(config: &RealtimeConfig) -> Result<Self, ChannelError> {
        let url = Url::parse(&config.url).map_err(|e| ChannelError::InvalidUrl {
            url: config.url.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(ChannelError::InvalidUrl {
                url: config.url.clone(),
                reason: "scheme must be ws or wss".to_string(),
            });
        }

        let hub = Arc::new(EventHub::new());
        let signal = CloseSignal::default();
        let (state_tx, state) = watch::channel(ConnectionState::Connecting);

        let connection = Connection {
            url,
            hub: hub.clone(),
            signal: signal.clone(),
            state: state_tx,
            initial_backoff: Duration::from_millis(config.reconnect_backoff_ms.max(1)),
            max_backoff: Duration::from_millis(config.max_backoff_ms.max(config.reconnect_backoff_ms)),
            connect_timeout: config.connect_timeout(),
        };
        let task = tokio::spawn(connection.run());

        Ok(Self {
            hub,
            signal,
            state,
            task: Mutex::new(Some(task)),
        })
    }

    pub fn hub(&self) -> &Arc<EventHub> {
        &self.hub
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Change stream of the connection state.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Stop reconnecting and drop the connection. Safe to call repeatedly.
    pub fn close(&self) {
        if self.signal.close() {
            tracing::info!("Event channel closing");
        }
    }

    /// Close and wait for the connection task to finish.
    pub async fn shutdown(&self) {
        self.close();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Event channel task ended abnormally");
            }
        }
    }
}

impl EventChannel for WebSocketChannel {
    fn subscribe(&self, event: &str, handler: EventHandler) -> SubscriptionToken {
        self.hub.subscribe(event, handler)
    }

    fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        self.hub.unsubscribe(token)
    }
}

impl Drop for WebSocketChannel {
    fn drop(&mut self) {
        self.signal.close();
    }
}

struct Connection {
    url: Url,
    hub: Arc<EventHub>,
    signal: CloseSignal,
    state: watch::Sender<ConnectionState>,
    initial_backoff: Duration,
    max_backoff: Duration,
    connect_timeout: Duration,
}

impl Connection {
    async fn run(self) {
        let mut backoff = self.initial_backoff;
        let mut attempt: u32 = 0;

        while !self.signal.is_closed() {
            attempt += 1;
            self.state.send_replace(ConnectionState::Connecting);

            let connected = tokio::select! {
                _ = self.signal.wait() => break,
                result = self.connect() => result,
            };

            match connected {
                Ok(socket) => {
                    tracing::info!(url = %self.url, attempt, "Event channel connected");
                    backoff = self.initial_backoff;
                    attempt = 0;
                    self.state.send_replace(ConnectionState::Connected);
                    self.pump(socket).await;
                    if self.signal.is_closed() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        url = %self.url,
                        attempt,
                        error = %e,
                        retry_in_ms = backoff.as_millis() as u64,
                        "Event channel connect failed"
                    );
                }
            }

            self.state.send_replace(ConnectionState::Disconnected);
            tokio::select! {
                _ = self.signal.wait() => break,
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = (backoff * 2).min(self.max_backoff);
        }

        self.state.send_replace(ConnectionState::Closed);
        tracing::debug!("Event channel stopped");
    }

    async fn connect(&self) -> Result<Socket, ChannelError> {
        match tokio::time::timeout(self.connect_timeout, connect_async(self.url.as_str())).await {
            Ok(Ok((socket, _response))) => Ok(socket),
            Ok(Err(e)) => Err(ChannelError::Connect(e)),
            Err(_) => Err(ChannelError::ConnectTimeout(self.connect_timeout.as_secs())),
        }
    }

    /// Read frames until the peer goes away or the channel is closed.
    async fn pump(&self, mut socket: Socket) {
        loop {
            let message = tokio::select! {
                _ = self.signal.wait() => {
                    if let Err(e) = socket.close(None).await {
                        tracing::debug!(error = %e, "Close handshake failed");
                    }
                    return;
                }
                message = socket.next() => message,
            };

            match message {
                Some(Ok(Message::Text(text))) => self.deliver(&text),
                Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                    Ok(text) => self.deliver(text),
                    Err(_) => tracing::debug!(len = bytes.len(), "Ignoring non-UTF-8 frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!(?frame, "Event channel closed by server");
                    return;
                }
                // Pings are answered by the protocol layer.
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "Event channel read failed");
                    return;
                }
                None => {
                    tracing::info!("Event channel stream ended");
                    return;
                }
            }
        }
    }

    fn deliver(&self, text: &str) {
        match EventFrame::parse(text) {
            Ok(frame) => {
                self.hub.dispatch_frame(&frame);
            }
            Err(e) => tracing::warn!(error = %e, "Dropping event frame"),
        }
    }
}
