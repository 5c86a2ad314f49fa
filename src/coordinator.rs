//! View lifecycle orchestration
//!
//! A [`FeedbackCoordinator`] drives one feedback view: activation loads the
//! page and routes live events for that content item into the store;
//! mutation intents check the session before anything reaches the network;
//! deactivation (explicit or on drop) releases every subscription.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::task::JoinHandle;

use crate::error::{Result, ReviewSyncError};
use crate::feedback::{
    ContentRef, FeedbackEntry, FeedbackEvent, FeedbackPatch, FeedbackStore, LoadOutcome,
    MutationOp, NewFeedback, RemoteOutcome,
};
use crate::live::{ChannelLease, EventKind, LiveChannel, LiveEvent};
use crate::pubsub::Subscription;
use crate::session::SessionGuard;

struct Activation {
    content: ContentRef,
    _subscriptions: Vec<Subscription>,
    _lease: ChannelLease,
}

/// Orchestrates session, store and live channel for one view.
pub struct FeedbackCoordinator {
    guard: Arc<SessionGuard>,
    store: FeedbackStore,
    live: Arc<LiveChannel>,
    activation: Mutex<Option<Activation>>,
}

impl std::fmt::Debug for FeedbackCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedbackCoordinator")
            .field("active", &self.active_content())
            .field("store", &self.store)
            .finish()
    }
}

impl FeedbackCoordinator {
    /// Coordinator over shared session, store and channel. Nothing is
    /// loaded or subscribed until [`activate`](Self::activate).
    pub fn new(guard: Arc<SessionGuard>, store: FeedbackStore, live: Arc<LiveChannel>) -> Self {
        Self {
            guard,
            store,
            live,
            activation: Mutex::new(None),
        }
    }

    /// Shows `content`: issues the page load, subscribes to its live events
    /// and takes a lease on the channel.
    ///
    /// The load is tagged before this returns, so a later activation always
    /// wins over this one regardless of which response arrives first. Any
    /// previous activation is released after the new lease is taken, which
    /// keeps a shared connection open across the switch.
    ///
    /// A load the backend refuses with 401 ends the session and resolves to
    /// [`ReviewSyncError::SessionExpired`], the same as a refused mutation.
    pub fn activate(
        &self,
        content: ContentRef,
        page: u32,
        page_size: u32,
    ) -> JoinHandle<Result<LoadOutcome>> {
        let load = self.store.load(content.clone(), page, page_size);

        let subscriptions = EventKind::ALL
            .into_iter()
            .map(|kind| {
                let store = self.store.clone();
                let content = content.clone();
                self.live
                    .subscribe(kind, move |event| route_event(&store, &content, event))
            })
            .collect();
        let lease = self.live.acquire();

        let previous = self.lock().replace(Activation {
            content: content.clone(),
            _subscriptions: subscriptions,
            _lease: lease,
        });
        if let Some(previous) = previous {
            tracing::debug!(from = %previous.content, to = %content, "Switching feedback view");
        } else {
            tracing::debug!(%content, "Feedback view activated");
        }

        let guard = Arc::clone(&self.guard);
        tokio::spawn(async move {
            match load.await {
                Err(ReviewSyncError::Unauthorized(message)) => {
                    tracing::warn!(%message, "Backend refused the session credential on load");
                    guard.invalidate();
                    Err(ReviewSyncError::SessionExpired)
                }
                other => other,
            }
        })
    }

    /// Releases subscriptions and the channel lease and detaches the store.
    /// Safe to call when nothing is active.
    pub fn deactivate(&self) {
        let previous = self.lock().take();
        if let Some(activation) = previous {
            tracing::debug!(content = %activation.content, "Feedback view deactivated");
            drop(activation);
            self.store.detach();
        }
    }

    /// Content item currently shown.
    pub fn active_content(&self) -> Option<ContentRef> {
        self.lock().as_ref().map(|a| a.content.clone())
    }

    /// Writes a new entry.
    ///
    /// # Errors
    ///
    /// - [`ReviewSyncError::SessionExpired`] when no valid session exists or
    ///   the backend refuses the credential; nothing is sent in the first case
    /// - validation, rejection and timeout errors from the store
    pub async fn submit(&self, new: NewFeedback) -> Result<FeedbackEntry> {
        let session = self.guard.require_valid()?;
        let result = self.store.create_local(&session, new).await;
        self.finish(MutationOp::Create, result)
    }

    /// Edits one of the subject's entries.
    pub async fn edit(&self, entry_id: &str, patch: FeedbackPatch) -> Result<FeedbackEntry> {
        let session = self.guard.require_valid()?;
        let result = self.store.update_local(&session, entry_id, patch).await;
        self.finish(MutationOp::Update, result)
    }

    /// Deletes an entry.
    pub async fn remove(&self, entry_id: &str) -> Result<()> {
        let session = self.guard.require_valid()?;
        let result = self.store.delete_local(&session, entry_id).await;
        self.finish(MutationOp::Delete, result)
    }

    /// Hides or shows an entry.
    pub async fn moderate(
        &self,
        entry_id: &str,
        visible: bool,
        reason: Option<String>,
    ) -> Result<FeedbackEntry> {
        let session = self.guard.require_valid()?;
        let result = self
            .store
            .moderate_local(&session, entry_id, visible, reason)
            .await;
        self.finish(MutationOp::Moderate, result)
    }

    /// Flips the subject's helpful vote.
    pub async fn toggle_helpful(&self, entry_id: &str) -> Result<FeedbackEntry> {
        let session = self.guard.require_valid()?;
        let result = self.store.toggle_helpful_local(&session, entry_id).await;
        self.finish(MutationOp::Vote, result)
    }

    /// Store backing this view.
    pub fn store(&self) -> &FeedbackStore {
        &self.store
    }

    /// Session guard consulted before every change.
    pub fn guard(&self) -> &Arc<SessionGuard> {
        &self.guard
    }

    /// Shared live channel.
    pub fn live(&self) -> &Arc<LiveChannel> {
        &self.live
    }

    fn finish<T>(&self, op: MutationOp, result: Result<T>) -> Result<T> {
        match result {
            Err(ReviewSyncError::Unauthorized(message)) => {
                tracing::warn!(%op, %message, "Backend refused the session credential");
                self.guard.invalidate();
                Err(ReviewSyncError::SessionExpired)
            }
            Err(e @ ReviewSyncError::Timeout { .. }) => {
                tracing::warn!(%op, error = %e, "Feedback change timed out");
                Err(e)
            }
            Err(e) => {
                tracing::info!(%op, kind = e.kind(), error = %e, "Feedback change failed");
                Err(e)
            }
            ok => ok,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Activation>> {
        self.activation.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl Drop for FeedbackCoordinator {
    fn drop(&mut self) {
        self.deactivate();
    }
}

fn route_event(store: &FeedbackStore, content: &ContentRef, event: &LiveEvent) {
    let event = match FeedbackEvent::from_live(event) {
        Ok(event) => event,
        Err(e) => {
            tracing::debug!(kind = %event.kind, error = %e, "Skipping undecodable feedback event");
            return;
        }
    };
    if &event.payload.target != content {
        return;
    }
    if store.apply_remote_event(&event) == RemoteOutcome::Deferred {
        tracing::trace!(id = %event.payload.id, "Live event held behind local change");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::fake::{FakeBackend, Step};
    use crate::api::{FeedbackPage, Pagination};
    use crate::live::fake::ScriptedSource;
    use crate::live::{BackoffPolicy, RawEvent};
    use crate::session::MemoryTokenStore;
    use crate::test_utils::RecordingNavigator;
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
    use chrono::Utc;
    use serde_json::json;
    use std::time::Duration;

    struct Fixture {
        coordinator: FeedbackCoordinator,
        backend: Arc<FakeBackend>,
        source: Arc<ScriptedSource>,
        navigator: Arc<RecordingNavigator>,
    }

    fn fixture() -> Fixture {
        let backend = Arc::new(FakeBackend::new());
        let source = Arc::new(ScriptedSource::new());
        let navigator = Arc::new(RecordingNavigator::new());
        let guard = Arc::new(SessionGuard::new(
            Arc::new(MemoryTokenStore::new()),
            navigator.clone(),
            "/login",
        ));
        let live = Arc::new(LiveChannel::new(
            source.clone(),
            BackoffPolicy {
                initial: Duration::from_millis(5),
                max: Duration::from_millis(20),
                multiplier: 2.0,
            },
        ));
        let store = FeedbackStore::new(backend.clone(), Duration::from_millis(200));
        Fixture {
            coordinator: FeedbackCoordinator::new(guard, store, live),
            backend,
            source,
            navigator,
        }
    }

    fn sign_in(coordinator: &FeedbackCoordinator, sub: &str) {
        let payload = json!({"sub": sub, "exp": Utc::now().timestamp() + 3600});
        let token = format!("h.{}.s", URL_SAFE_NO_PAD.encode(payload.to_string()));
        coordinator.guard().establish(&token, false).unwrap();
    }

    fn empty_page() -> Step<FeedbackPage> {
        Step::Ready(Ok(FeedbackPage {
            entries: vec![],
            stats: None,
            pagination: Pagination::default(),
        }))
    }

    fn created(id: &str, movie: &str) -> RawEvent {
        let now = Utc::now().to_rfc3339();
        RawEvent {
            event: Some("feedback:created".to_string()),
            data: json!({
                "_id": id,
                "movieId": movie,
                "user": {"id": "u9", "name": "Other"},
                "content": "seen it",
                "rate": 4,
                "createdAt": now,
                "updatedAt": now
            })
            .to_string(),
            id: None,
        }
    }

    async fn wait_for(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_submit_without_session_never_calls_backend() {
        let f = fixture();
        f.backend.push_list(empty_page());
        f.coordinator
            .activate(ContentRef::movie("dune-2"), 1, 10)
            .await
            .unwrap()
            .unwrap();

        let new = NewFeedback::new(ContentRef::movie("dune-2"), "Great film", 5).unwrap();
        let err = f.coordinator.submit(new).await.unwrap_err();

        assert!(matches!(err, ReviewSyncError::SessionExpired));
        assert_eq!(f.navigator.count(), 1);
        assert!(!f.backend.calls().iter().any(|c| c.starts_with("create")));
        assert!(f.coordinator.store().entries().is_empty());
    }

    #[tokio::test]
    async fn test_live_events_routed_by_content() {
        let f = fixture();
        let tx = f.source.push_live_session();
        f.backend.push_list(empty_page());
        f.coordinator
            .activate(ContentRef::movie("m1"), 1, 10)
            .await
            .unwrap()
            .unwrap();

        tx.send(created("other", "m2")).unwrap();
        tx.send(created("mine", "m1")).unwrap();
        let store = f.coordinator.store().clone();
        wait_for(|| !store.entries().is_empty()).await;

        let ids: Vec<String> = store.entries().into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["mine"]);
    }

    #[tokio::test]
    async fn test_unauthorized_mutation_expires_session() {
        let f = fixture();
        sign_in(&f.coordinator, "u1");
        f.backend.push_list(empty_page());
        f.coordinator
            .activate(ContentRef::movie("m1"), 1, 10)
            .await
            .unwrap()
            .unwrap();
        f.backend
            .push_entry(Step::Ready(Err(ReviewSyncError::Unauthorized("revoked".into()))));

        let new = NewFeedback::new(ContentRef::movie("m1"), "Great film", 5).unwrap();
        let err = f.coordinator.submit(new).await.unwrap_err();

        assert!(matches!(err, ReviewSyncError::SessionExpired));
        assert!(!f.coordinator.guard().is_valid());
        assert_eq!(f.navigator.count(), 1);
        assert!(f.coordinator.store().entries().is_empty());
    }

    #[tokio::test]
    async fn test_unauthorized_load_expires_session() {
        let f = fixture();
        sign_in(&f.coordinator, "u1");
        f.backend
            .push_list(Step::Ready(Err(ReviewSyncError::Unauthorized("revoked".into()))));

        let err = f
            .coordinator
            .activate(ContentRef::movie("m1"), 1, 10)
            .await
            .unwrap()
            .unwrap_err();

        assert!(matches!(err, ReviewSyncError::SessionExpired));
        assert!(!f.coordinator.guard().is_valid());
        assert_eq!(f.navigator.count(), 1);
    }

    #[tokio::test]
    async fn test_deactivate_releases_everything() {
        let f = fixture();
        f.backend.push_list(empty_page());
        let _load = f.coordinator.activate(ContentRef::movie("m1"), 1, 10);

        assert_eq!(f.coordinator.live().lease_count(), 1);
        assert_eq!(
            f.coordinator
                .live()
                .subscriber_count(EventKind::FeedbackCreated),
            1
        );

        f.coordinator.deactivate();
        f.coordinator.deactivate();

        assert_eq!(f.coordinator.live().lease_count(), 0);
        for kind in EventKind::ALL {
            assert_eq!(f.coordinator.live().subscriber_count(kind), 0);
        }
        assert_eq!(f.coordinator.active_content(), None);
        assert_eq!(f.coordinator.store().target(), None);
    }

    #[tokio::test]
    async fn test_switching_content_keeps_single_lease() {
        let f = fixture();
        f.backend.push_list(empty_page());
        f.backend.push_list(empty_page());

        let _first = f.coordinator.activate(ContentRef::movie("x"), 1, 10);
        let second = f.coordinator.activate(ContentRef::story("y"), 1, 10);

        assert_eq!(f.coordinator.live().lease_count(), 1);
        assert_eq!(
            f.coordinator
                .live()
                .subscriber_count(EventKind::FeedbackUpdated),
            1
        );
        assert_eq!(second.await.unwrap().unwrap(), LoadOutcome::Applied);
        assert_eq!(f.coordinator.active_content(), Some(ContentRef::story("y")));
    }

    #[tokio::test]
    async fn test_drop_releases_lease() {
        let f = fixture();
        let live = Arc::clone(f.coordinator.live());
        f.backend.push_list(empty_page());
        let _load = f.coordinator.activate(ContentRef::movie("m1"), 1, 10);
        assert_eq!(live.lease_count(), 1);

        drop(f);

        assert_eq!(live.lease_count(), 0);
    }
}
