//! Reconnecting notification channel.
//!
//! [`NotificationChannel`] owns at most one physical connection at a time.
//! A driver task opens the socket, dispatches every inbound event to the
//! registered handlers in arrival order, and on any close other than the
//! normal-closure code schedules a reconnect with exponential backoff:
//!
//! ```text
//! delay(n) = min(initial * 2^n, max)      n = 0, 1, 2, ...
//! ```
//!
//! The attempt counter resets on every successful open. After
//! `max_retries` consecutive failures the channel enters
//! [`ChannelState::Failed`] and stays there until `connect` is called again.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use kb_core::config::ReconnectConfig;
use kb_core::types::OrderId;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Interval;
use tokio_util::sync::CancellationToken;

use crate::envelope::{decode, ChannelEvent, ClientMessage, Inbound};
use crate::transport::{Connector, Frame, Socket, NORMAL_CLOSURE};

/// Callback invoked once per inbound event.
///
/// An `Err` or a panic is logged and does not affect other handlers.
pub type EventHandler = Arc<dyn Fn(&ChannelEvent) -> anyhow::Result<()> + Send + Sync>;

/// Observable connection state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelState {
    /// No connection and no pending reconnect.
    Disconnected,
    /// A connect attempt is in flight.
    Connecting,
    /// Connected; events are being delivered.
    Open,
    /// An intentional disconnect is in progress.
    Closing,
    /// Waiting `delay` before reconnect attempt number `attempt` (1-based).
    Reconnecting { attempt: u32, delay: Duration },
    /// Gave up after `attempts` consecutive reconnect attempts.
    Failed { attempts: u32 },
}

impl ChannelState {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Disconnected => "DISCONNECTED",
            Self::Connecting => "CONNECTING",
            Self::Open => "OPEN",
            Self::Closing => "CLOSING",
            Self::Reconnecting { .. } => "RECONNECTING",
            Self::Failed { .. } => "FAILED",
        }
    }

    /// Whether a driver owns the connection in this state.
    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Disconnected | Self::Failed { .. })
    }
}

/// Delay before reconnect attempt `attempt` (0-indexed).
pub fn reconnect_delay(initial: Duration, max: Duration, attempt: u32) -> Duration {
    initial
        .saturating_mul(2u32.saturating_pow(attempt))
        .min(max)
}

/// State shared between the channel handle and its driver task.
struct Shared {
    handlers: Mutex<Vec<(u64, EventHandler)>>,
    next_handler_id: AtomicU64,
    state: watch::Sender<ChannelState>,
    connections: AtomicU64,
    order_subscriptions: Mutex<Vec<OrderId>>,
    outbound: Mutex<Option<mpsc::UnboundedSender<ClientMessage>>>,
}

impl Shared {
    fn set_state(&self, state: ChannelState) {
        tracing::debug!(state = ?state, "channel state");
        self.state.send_replace(state);
    }

    fn dispatch_text(&self, text: &str) {
        match decode(text) {
            Ok(Inbound::Event(event)) => self.dispatch(&event),
            Ok(Inbound::Control(control)) => {
                tracing::trace!(control = ?control, "control frame");
            }
            Ok(Inbound::Unknown(kind)) => {
                tracing::debug!(kind = %kind, "ignoring envelope of unknown type");
            }
            Err(e) => {
                tracing::warn!(error = %e, len = text.len(), "dropping malformed payload");
            }
        }
    }

    fn dispatch(&self, event: &ChannelEvent) {
        // Handlers may subscribe or unsubscribe from inside a callback.
        let handlers: Vec<(u64, EventHandler)> = self.handlers.lock().clone();
        for (id, handler) in handlers {
            match std::panic::catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::error!(handler = id, kind = event.kind(), error = %e, "event handler failed");
                }
                Err(_) => {
                    tracing::error!(handler = id, kind = event.kind(), "event handler panicked");
                }
            }
        }
    }

    fn remove_handler(&self, id: u64) -> bool {
        let mut handlers = self.handlers.lock();
        let before = handlers.len();
        handlers.retain(|(hid, _)| *hid != id);
        handlers.len() != before
    }
}

/// Handle returned by [`NotificationChannel::subscribe`].
///
/// Dropping the handle does not unsubscribe; call
/// [`unsubscribe`](Self::unsubscribe).
#[must_use = "keep the subscription to be able to unsubscribe"]
pub struct Subscription {
    id: u64,
    shared: Weak<Shared>,
}

impl Subscription {
    /// Remove the handler. Idempotent.
    pub fn unsubscribe(&self) {
        if let Some(shared) = self.shared.upgrade() {
            if shared.remove_handler(self.id) {
                tracing::debug!(handler = self.id, "handler unsubscribed");
            }
        }
    }
}

struct Driver {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

#[derive(Clone)]
struct DriverSettings {
    url: String,
    reconnect: ReconnectConfig,
    ping_interval: Duration,
}

/// Client side of the push channel.
pub struct NotificationChannel {
    ws_url: String,
    reconnect: ReconnectConfig,
    ping_interval: Duration,
    connector: Arc<dyn Connector>,
    shared: Arc<Shared>,
    driver: Mutex<Option<Driver>>,
}

impl NotificationChannel {
    /// Create a disconnected channel. `ping_interval` of zero disables
    /// keepalive pings.
    pub fn new(
        ws_url: impl Into<String>,
        reconnect: ReconnectConfig,
        ping_interval: Duration,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let (state, _) = watch::channel(ChannelState::Disconnected);
        Self {
            ws_url: ws_url.into(),
            reconnect,
            ping_interval,
            connector,
            shared: Arc::new(Shared {
                handlers: Mutex::new(Vec::new()),
                next_handler_id: AtomicU64::new(1),
                state,
                connections: AtomicU64::new(0),
                order_subscriptions: Mutex::new(Vec::new()),
                outbound: Mutex::new(None),
            }),
            driver: Mutex::new(None),
        }
    }

    /// Endpoint for `role`: `{ws_url}/ws/{role}`.
    pub fn endpoint(&self, role: &str) -> String {
        format!("{}/ws/{}", self.ws_url.trim_end_matches('/'), role)
    }

    /// Start the connection for `role`.
    ///
    /// A no-op while a connection is open, being opened, closing, or
    /// waiting to reconnect. From `Disconnected` or `Failed` it replaces
    /// whatever driver is left and starts over. Must be called from within
    /// a tokio runtime.
    pub fn connect(&self, role: &str) {
        let mut driver = self.driver.lock();
        let state = self.state();
        if state.is_active() {
            tracing::info!(role, state = state.label(), "channel already active; connect ignored");
            return;
        }
        // A driver that published a terminal state writes nothing more.
        if let Some(stale) = driver.take() {
            stale.cancel.cancel();
        }

        let settings = DriverSettings {
            url: self.endpoint(role),
            reconnect: self.reconnect.clone(),
            ping_interval: self.ping_interval,
        };
        tracing::info!(url = %settings.url, "opening notification channel");

        let cancel = CancellationToken::new();
        self.shared.set_state(ChannelState::Connecting);
        let handle = tokio::spawn(run_driver(
            Arc::clone(&self.shared),
            Arc::clone(&self.connector),
            settings,
            cancel.clone(),
        ));
        *driver = Some(Driver { cancel, handle });
    }

    /// Close intentionally with the normal-closure code.
    ///
    /// Cancels any pending reconnect, clears every handler and remembered
    /// order subscription. Idempotent.
    pub async fn disconnect(&self) {
        let driver = self.driver.lock().take();
        if let Some(driver) = driver {
            if !driver.handle.is_finished() {
                self.shared.set_state(ChannelState::Closing);
            }
            driver.cancel.cancel();
            if let Err(e) = driver.handle.await {
                tracing::warn!(error = %e, "channel driver ended abnormally");
            }
        }
        self.shared.handlers.lock().clear();
        self.shared.order_subscriptions.lock().clear();
        *self.shared.outbound.lock() = None;
        if *self.shared.state.borrow() != ChannelState::Disconnected {
            tracing::info!("notification channel disconnected");
        }
        self.shared.set_state(ChannelState::Disconnected);
    }

    /// Register `handler`; it sees every event from now on.
    pub fn subscribe(&self, handler: EventHandler) -> Subscription {
        let id = self.shared.next_handler_id.fetch_add(1, Ordering::Relaxed);
        self.shared.handlers.lock().push((id, handler));
        Subscription {
            id,
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Ask the server for updates about `order_id`. Remembered and re-sent
    /// after every reconnect.
    pub fn subscribe_order(&self, order_id: OrderId) {
        {
            let mut subs = self.shared.order_subscriptions.lock();
            if subs.contains(&order_id) {
                return;
            }
            subs.push(order_id.clone());
        }
        if let Some(outbound) = self.shared.outbound.lock().as_ref() {
            let _ = outbound.send(ClientMessage::SubscribeOrder { order_id });
        }
    }

    pub fn state(&self) -> ChannelState {
        self.shared.state.borrow().clone()
    }

    /// Receiver notified on every state change.
    pub fn watch_state(&self) -> watch::Receiver<ChannelState> {
        self.shared.state.subscribe()
    }

    /// Physical connections opened so far.
    pub fn connection_count(&self) -> u64 {
        self.shared.connections.load(Ordering::Relaxed)
    }

    pub fn handler_count(&self) -> usize {
        self.shared.handlers.lock().len()
    }
}

impl Drop for NotificationChannel {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.get_mut().take() {
            driver.cancel.cancel();
        }
    }
}

enum SessionEnd {
    /// `disconnect()` was called.
    Cancelled,
    /// Server closed with the normal-closure code.
    Normal,
    /// Any other close or a broken connection.
    Abnormal(Option<u16>),
}

async fn run_driver(
    shared: Arc<Shared>,
    connector: Arc<dyn Connector>,
    settings: DriverSettings,
    cancel: CancellationToken,
) {
    let max_retries = settings.reconnect.max_retries;
    let mut attempt: u32 = 0;

    loop {
        shared.set_state(ChannelState::Connecting);
        let connected = tokio::select! {
            _ = cancel.cancelled() => return,
            result = connector.connect(&settings.url) => result,
        };

        match connected {
            Ok(mut socket) => {
                attempt = 0;
                let n = shared.connections.fetch_add(1, Ordering::Relaxed) + 1;
                shared.set_state(ChannelState::Open);
                tracing::info!(url = %settings.url, connection = n, "notification channel open");

                match run_session(&shared, socket.as_mut(), &settings, &cancel).await {
                    SessionEnd::Cancelled => return,
                    SessionEnd::Normal => {
                        tracing::info!(url = %settings.url, "server closed channel normally");
                        shared.set_state(ChannelState::Disconnected);
                        return;
                    }
                    SessionEnd::Abnormal(code) => {
                        tracing::warn!(url = %settings.url, code = ?code, "notification channel closed unexpectedly");
                    }
                }
            }
            Err(e) => {
                tracing::warn!(url = %settings.url, error = %e, attempt, "notification channel connect failed");
            }
        }

        if attempt >= max_retries {
            tracing::error!(
                url = %settings.url,
                attempts = attempt,
                "giving up on notification channel after max reconnect attempts"
            );
            shared.set_state(ChannelState::Failed { attempts: attempt });
            return;
        }

        let delay = reconnect_delay(
            settings.reconnect.initial_backoff(),
            settings.reconnect.max_backoff(),
            attempt,
        );
        attempt += 1;
        tracing::info!(attempt, delay_ms = delay.as_millis() as u64, "scheduling reconnect");
        shared.set_state(ChannelState::Reconnecting { attempt, delay });

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

async fn run_session(
    shared: &Shared,
    socket: &mut dyn Socket,
    settings: &DriverSettings,
    cancel: &CancellationToken,
) -> SessionEnd {
    let (tx, mut outbound) = mpsc::unbounded_channel();
    *shared.outbound.lock() = Some(tx);
    let end = session_loop(shared, socket, settings, cancel, &mut outbound).await;
    *shared.outbound.lock() = None;
    end
}

async fn session_loop(
    shared: &Shared,
    socket: &mut dyn Socket,
    settings: &DriverSettings,
    cancel: &CancellationToken,
    outbound: &mut mpsc::UnboundedReceiver<ClientMessage>,
) -> SessionEnd {
    let resubscribe: Vec<OrderId> = shared.order_subscriptions.lock().clone();
    for order_id in resubscribe {
        let text = ClientMessage::SubscribeOrder { order_id }.to_text();
        if let Err(e) = socket.send_text(text).await {
            tracing::warn!(error = %e, "failed to resubscribe order");
            return SessionEnd::Abnormal(None);
        }
    }

    let mut ping = (!settings.ping_interval.is_zero()).then(|| {
        tokio::time::interval_at(
            tokio::time::Instant::now() + settings.ping_interval,
            settings.ping_interval,
        )
    });

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                if let Err(e) = socket.close(NORMAL_CLOSURE, "client disconnect").await {
                    tracing::debug!(error = %e, "close handshake failed");
                }
                return SessionEnd::Cancelled;
            }
            frame = socket.recv() => match frame {
                Some(Frame::Text(text)) => shared.dispatch_text(&text),
                Some(Frame::Close { code: Some(NORMAL_CLOSURE), .. }) => return SessionEnd::Normal,
                Some(Frame::Close { code, reason }) => {
                    tracing::debug!(code = ?code, reason = %reason, "close frame");
                    return SessionEnd::Abnormal(code);
                }
                None => return SessionEnd::Abnormal(None),
            },
            Some(message) = outbound.recv() => {
                if let Err(e) = socket.send_text(message.to_text()).await {
                    tracing::warn!(error = %e, "failed to send channel message");
                    return SessionEnd::Abnormal(None);
                }
            }
            _ = next_ping(&mut ping) => {
                if let Err(e) = socket.send_text(ClientMessage::Ping.to_text()).await {
                    tracing::warn!(error = %e, "keepalive ping failed");
                    return SessionEnd::Abnormal(None);
                }
            }
        }
    }
}

async fn next_ping(ping: &mut Option<Interval>) {
    match ping {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
