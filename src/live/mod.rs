//! Live event channel
//!
//! A [`LiveChannel`] keeps one long-lived event connection to the backend
//! and fans inbound events out to per-kind subscribers. The connection
//! heals itself: when the transport drops or fails to open, a background
//! supervisor waits with exponential backoff and reopens it, forever, until
//! the channel is disconnected. Failures show up only in
//! [`LiveChannel::connection_state`], never as errors.
//!
//! Concrete event sources live in submodules:
//!
//! - [`sse::SseEventSource`] -- `text/event-stream` over HTTP GET
//! - `fake::ScriptedSource` -- in-process source used in tests (cfg(test)
//!   only)
//!
//! Views share a single channel through [`ChannelLease`]s: the first lease
//! connects, dropping the last one disconnects.

pub mod sse;

#[cfg(test)]
pub(crate) mod fake;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use metrics::increment_counter;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::config::LiveConfig;
use crate::error::{Result, ReviewSyncError};
use crate::pubsub::{Subscribers, Subscription};

pub use sse::SseEventSource;

/// Event kinds delivered over the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// `feedback:created`
    FeedbackCreated,
    /// `feedback:updated`
    FeedbackUpdated,
    /// `feedback:deleted`
    FeedbackDeleted,
}

impl EventKind {
    /// Every kind, in a fixed order.
    pub const ALL: [EventKind; 3] = [
        EventKind::FeedbackCreated,
        EventKind::FeedbackUpdated,
        EventKind::FeedbackDeleted,
    ];

    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::FeedbackCreated => "feedback:created",
            EventKind::FeedbackUpdated => "feedback:updated",
            EventKind::FeedbackDeleted => "feedback:deleted",
        }
    }

    /// Parses a wire name. Unknown names yield `None`.
    pub fn parse(name: &str) -> Option<Self> {
        EventKind::ALL.into_iter().find(|k| k.as_str() == name)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One undecoded event as framed by the transport.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawEvent {
    /// Event name, when the transport carries one
    pub event: Option<String>,
    /// Payload text
    pub data: String,
    /// Transport event id
    pub id: Option<String>,
}

/// A decoded event with a known kind.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveEvent {
    /// Kind
    pub kind: EventKind,
    /// JSON payload
    pub data: Value,
    /// Transport event id
    pub id: Option<String>,
}

/// `{"type": "...", "payload": {...}}` framing used when the transport has
/// no event name.
#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type", alias = "event")]
    kind: String,
    #[serde(alias = "data")]
    payload: Value,
}

impl LiveEvent {
    /// Decodes a raw event.
    ///
    /// Returns `Ok(None)` for kinds this client does not handle.
    ///
    /// # Errors
    ///
    /// Returns [`ReviewSyncError::Serialization`] when the payload is not
    /// JSON.
    pub fn decode(raw: &RawEvent) -> Result<Option<Self>> {
        let (name, data) = match raw.event.as_deref() {
            Some(name) if name != "message" => (name.to_string(), serde_json::from_str(&raw.data)?),
            _ => {
                let envelope: Envelope = serde_json::from_str(&raw.data)?;
                (envelope.kind, envelope.payload)
            }
        };
        Ok(EventKind::parse(&name).map(|kind| LiveEvent {
            kind,
            data,
            id: raw.id.clone(),
        }))
    }
}

/// Something that can open an event stream.
///
/// A returned stream ending means the connection dropped.
#[async_trait]
pub trait EventSource: Send + Sync + fmt::Debug {
    /// Opens a new connection.
    async fn open(&self) -> Result<BoxStream<'static, RawEvent>>;
}

/// Exponential reconnect delay.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    /// First delay after a drop
    pub initial: Duration,
    /// Upper bound
    pub max: Duration,
    /// Growth factor per consecutive failure
    pub multiplier: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_config(&LiveConfig::default())
    }
}

impl BackoffPolicy {
    /// Policy from configuration.
    pub fn from_config(config: &LiveConfig) -> Self {
        Self {
            initial: Duration::from_millis(config.initial_backoff_ms),
            max: Duration::from_millis(config.max_backoff_ms),
            multiplier: config.backoff_multiplier,
        }
    }

    /// Delay following `current`.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    /// use reviewsync::live::BackoffPolicy;
    ///
    /// let policy = BackoffPolicy {
    ///     initial: Duration::from_millis(100),
    ///     max: Duration::from_millis(250),
    ///     multiplier: 2.0,
    /// };
    /// assert_eq!(policy.next(Duration::from_millis(100)), Duration::from_millis(200));
    /// assert_eq!(policy.next(Duration::from_millis(200)), Duration::from_millis(250));
    /// ```
    pub fn next(&self, current: Duration) -> Duration {
        current.mul_f64(self.multiplier.max(1.0)).min(self.max)
    }
}

/// Connection state exposed for UI degradation hints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Opening, or waiting to reopen after a drop
    Connecting,
    /// Events are flowing
    Open,
    /// Not connected and not trying
    Closed,
}

#[derive(Debug, Default)]
struct Dispatch {
    created: Subscribers<LiveEvent>,
    updated: Subscribers<LiveEvent>,
    deleted: Subscribers<LiveEvent>,
}

impl Dispatch {
    fn for_kind(&self, kind: EventKind) -> &Subscribers<LiveEvent> {
        match kind {
            EventKind::FeedbackCreated => &self.created,
            EventKind::FeedbackUpdated => &self.updated,
            EventKind::FeedbackDeleted => &self.deleted,
        }
    }

    fn dispatch(&self, raw: &RawEvent) {
        match LiveEvent::decode(raw) {
            Ok(Some(event)) => {
                tracing::debug!(kind = %event.kind, id = ?event.id, "Dispatching live event");
                self.for_kind(event.kind).publish(&event);
            }
            Ok(None) => {
                tracing::debug!(event = ?raw.event, "Skipping unhandled live event kind");
            }
            Err(e) => {
                tracing::warn!(error = %e, "Skipping undecodable live event");
            }
        }
    }
}

#[derive(Debug, Default)]
struct Control {
    cancel: Option<CancellationToken>,
    leases: usize,
}

/// Self-healing event connection with per-kind subscribers.
pub struct LiveChannel {
    source: Arc<dyn EventSource>,
    backoff: BackoffPolicy,
    dispatch: Arc<Dispatch>,
    state: Arc<watch::Sender<ConnectionState>>,
    /// Bumped on every connect and disconnect. A supervisor only publishes
    /// state while its own epoch is current.
    epoch: Arc<AtomicU64>,
    control: Mutex<Control>,
}

impl fmt::Debug for LiveChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveChannel")
            .field("source", &self.source)
            .field("backoff", &self.backoff)
            .field("state", &self.connection_state())
            .finish()
    }
}

impl LiveChannel {
    /// Channel over `source`. Nothing is opened until [`connect`](Self::connect)
    /// or [`acquire`](Self::acquire).
    pub fn new(source: Arc<dyn EventSource>, backoff: BackoffPolicy) -> Self {
        let (state, _) = watch::channel(ConnectionState::Closed);
        Self {
            source,
            backoff,
            dispatch: Arc::new(Dispatch::default()),
            state: Arc::new(state),
            epoch: Arc::new(AtomicU64::new(0)),
            control: Mutex::new(Control::default()),
        }
    }

    /// Starts the background supervisor. Idempotent.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(&self) {
        let mut control = self.control();
        self.connect_locked(&mut control);
    }

    /// Stops the supervisor and closes the connection. Idempotent.
    pub fn disconnect(&self) {
        let mut control = self.control();
        self.disconnect_locked(&mut control);
    }

    /// Takes a reference-counted hold on the connection.
    ///
    /// The first outstanding lease connects; dropping the last one
    /// disconnects.
    pub fn acquire(self: &Arc<Self>) -> ChannelLease {
        let mut control = self.control();
        control.leases += 1;
        if control.leases == 1 {
            self.connect_locked(&mut control);
        }
        ChannelLease {
            channel: Arc::clone(self),
        }
    }

    /// Registers `handler` for events of `kind`.
    ///
    /// Handlers for one kind run in registration order, once per event, in
    /// the order the transport delivered the events.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&LiveEvent) + Send + Sync + 'static,
    {
        self.dispatch.for_kind(kind).subscribe(handler)
    }

    /// Number of handlers registered for `kind`.
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.dispatch.for_kind(kind).len()
    }

    /// Current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver that observes every state change.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Number of outstanding leases.
    pub fn lease_count(&self) -> usize {
        self.control().leases
    }

    /// Fails with [`ReviewSyncError::ConnectionDegraded`] unless open.
    ///
    /// This is a display hint only; mutations never depend on it.
    pub fn ensure_live(&self) -> Result<()> {
        match self.connection_state() {
            ConnectionState::Open => Ok(()),
            _ => Err(ReviewSyncError::ConnectionDegraded),
        }
    }

    fn control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn connect_locked(&self, control: &mut Control) {
        if control.cancel.is_some() {
            return;
        }
        let cancel = CancellationToken::new();
        control.cancel = Some(cancel.clone());
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.send_replace(ConnectionState::Connecting);
        tracing::info!("Connecting live channel");

        let supervisor = Supervisor {
            source: Arc::clone(&self.source),
            backoff: self.backoff,
            dispatch: Arc::clone(&self.dispatch),
            state: Arc::clone(&self.state),
            epoch,
            current_epoch: Arc::clone(&self.epoch),
        };
        tokio::spawn(supervisor.run(cancel));
    }

    fn disconnect_locked(&self, control: &mut Control) {
        if let Some(cancel) = control.cancel.take() {
            cancel.cancel();
            self.epoch.fetch_add(1, Ordering::SeqCst);
            self.state.send_replace(ConnectionState::Closed);
            tracing::info!("Disconnected live channel");
        }
    }

    fn release(&self) {
        let mut control = self.control();
        control.leases = control.leases.saturating_sub(1);
        if control.leases == 0 {
            self.disconnect_locked(&mut control);
        }
    }
}

impl Drop for LiveChannel {
    fn drop(&mut self) {
        if let Some(cancel) = self.control().cancel.take() {
            cancel.cancel();
        }
    }
}

/// A view's hold on the shared channel. Dropping it releases the hold.
#[must_use = "dropping a ChannelLease immediately releases the connection"]
pub struct ChannelLease {
    channel: Arc<LiveChannel>,
}

impl ChannelLease {
    /// The leased channel.
    pub fn channel(&self) -> &Arc<LiveChannel> {
        &self.channel
    }
}

impl fmt::Debug for ChannelLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelLease").finish_non_exhaustive()
    }
}

impl Drop for ChannelLease {
    fn drop(&mut self) {
        self.channel.release();
    }
}

struct Supervisor {
    source: Arc<dyn EventSource>,
    backoff: BackoffPolicy,
    dispatch: Arc<Dispatch>,
    state: Arc<watch::Sender<ConnectionState>>,
    epoch: u64,
    current_epoch: Arc<AtomicU64>,
}

impl Supervisor {
    /// Publishes `next` unless a later connect or disconnect superseded
    /// this supervisor. The epoch is read under the watch lock, so a stale
    /// write can never land after the newer owner's first write.
    fn publish(&self, next: ConnectionState) {
        self.state.send_if_modified(|state| {
            if self.current_epoch.load(Ordering::SeqCst) != self.epoch || *state == next {
                return false;
            }
            *state = next;
            true
        });
    }

    async fn run(self, cancel: CancellationToken) {
        let mut delay = self.backoff.initial;

        loop {
            let opened = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                opened = self.source.open() => opened,
            };

            match opened {
                Ok(stream) => {
                    self.publish(ConnectionState::Open);
                    tracing::info!("Live channel open");
                    delay = self.backoff.initial;
                    if !self.pump(stream, &cancel).await {
                        break;
                    }
                    tracing::warn!("Live channel dropped");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Live channel failed to open");
                }
            }

            self.publish(ConnectionState::Connecting);
            increment_counter!("reviewsync_live_reconnects_total");
            tracing::debug!(delay_ms = delay.as_millis() as u64, "Reconnecting live channel");

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
            delay = self.backoff.next(delay);
        }

        self.publish(ConnectionState::Closed);
    }

    /// Forwards events until the stream ends. Returns `false` if cancelled.
    async fn pump(&self, mut stream: BoxStream<'static, RawEvent>, cancel: &CancellationToken) -> bool {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return false,
                next = stream.next() => match next {
                    Some(raw) => self.dispatch.dispatch(&raw),
                    None => return true,
                },
            }
        }
    }
}
