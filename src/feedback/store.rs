//! Authoritative local view of one content item's feedback
//!
//! The store reconciles three sources of change:
//!
//! - page loads, tagged with a generation so that a response issued for an
//!   earlier target never overwrites a later one
//! - local optimistic mutations, applied immediately and then confirmed or
//!   rolled back when the backend call settles
//! - live events from other clients, applied directly unless they concern
//!   an entry with a pending local mutation, in which case they wait for
//!   that mutation to settle
//!
//! Every change happens inside one short critical section that ends with a
//! full recomputation of [`AggregateStatistics`]. The lock is never held
//! across an await, and observers are notified after it is released.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use metrics::increment_counter;

use super::mutation::{MutationId, MutationOp, MutationStatus, OptimisticMutation};
use super::stats::AggregateStatistics;
use super::types::{
    Author, ContentRef, FeedbackEntry, FeedbackEvent, FeedbackEventKind, FeedbackPatch,
    Moderation, NewFeedback,
};
use crate::api::{CreateFeedback, FeedbackApi, FeedbackPage, ListQuery, ModerationRequest, Pagination};
use crate::error::{Result, ReviewSyncError};
use crate::pubsub::{Subscribers, Subscription};
use crate::session::Session;

/// Result of a page load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The page replaced the local set
    Applied,
    /// A later load or a retarget superseded this one; nothing changed
    Discarded,
}

/// Result of feeding a live event to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteOutcome {
    /// The local set changed
    Applied,
    /// Held until a pending local mutation on the same entry settles
    Deferred,
    /// Not relevant to this store, or nothing to change
    Ignored,
}

/// Change notification for observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// A page load replaced the local set
    Reloaded {
        /// Content item now shown
        target: ContentRef,
    },
    /// The local set changed
    EntriesChanged,
    /// A local mutation was confirmed or rolled back
    MutationSettled {
        /// Correlation id
        id: MutationId,
        /// Which change
        op: MutationOp,
        /// `Confirmed` or `Rejected`
        status: MutationStatus,
    },
    /// The store stopped showing any content item
    Detached,
}

#[derive(Debug, Default)]
struct StoreState {
    target: Option<ContentRef>,
    generation: u64,
    /// All entries including hidden ones, in display order
    entries: Vec<FeedbackEntry>,
    stats: AggregateStatistics,
    server_stats: Option<AggregateStatistics>,
    pagination: Option<Pagination>,
    pending: Vec<OptimisticMutation>,
}

impl StoreState {
    fn index_of(&self, id: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.id == id)
    }

    fn recompute(&mut self) {
        self.stats = AggregateStatistics::from_entries(&self.entries);
    }

    fn reset(&mut self) {
        self.entries.clear();
        self.server_stats = None;
        self.pagination = None;
        self.pending.clear();
        self.recompute();
    }

    fn ensure_not_pending(&self, entry_id: &str) -> Result<()> {
        if self.pending.iter().any(|m| m.entry_id == entry_id) {
            return Err(ReviewSyncError::MutationInFlight(entry_id.to_string()));
        }
        Ok(())
    }

    fn pending_for(&mut self, payload_id: &str, client_id: Option<&str>) -> Option<&mut OptimisticMutation> {
        self.pending.iter_mut().find(|m| {
            m.entry_id == payload_id
                || (m.op == MutationOp::Create
                    && client_id.is_some_and(|c| c == m.id.to_string()))
        })
    }

    /// Re-applies pending optimistic changes on top of a fresh page.
    fn overlay_pending(&mut self) {
        let pending = self.pending.clone();
        for mutation in &pending {
            match mutation.op {
                MutationOp::Create => {
                    if let Some(entry) = &mutation.optimistic {
                        if self.index_of(&entry.id).is_none() {
                            self.entries.insert(0, entry.clone());
                        }
                    }
                }
                MutationOp::Delete => {
                    self.entries.retain(|e| e.id != mutation.entry_id);
                }
                MutationOp::Update | MutationOp::Moderate | MutationOp::Vote => {
                    if let (Some(entry), Some(i)) =
                        (&mutation.optimistic, self.index_of(&mutation.entry_id))
                    {
                        self.entries[i] = entry.clone();
                    }
                }
            }
        }
    }

    /// Applies a live event. Returns `true` if the set changed.
    fn apply_event(&mut self, event: &FeedbackEvent) -> bool {
        let payload = &event.payload;
        match event.kind {
            FeedbackEventKind::Created => match payload.to_entry(Utc::now()) {
                Some(entry) => {
                    match self.index_of(&entry.id) {
                        Some(i) => self.entries[i] = entry,
                        None => self.entries.insert(0, entry),
                    }
                    true
                }
                None => {
                    tracing::debug!(id = %payload.id, "Ignoring partial create event");
                    false
                }
            },
            FeedbackEventKind::Updated => match self.index_of(&payload.id) {
                Some(i) => {
                    self.entries[i].merge_remote(payload);
                    true
                }
                None => match payload.to_entry(Utc::now()) {
                    Some(entry) => {
                        self.entries.insert(0, entry);
                        true
                    }
                    None => {
                        tracing::debug!(id = %payload.id, "Ignoring update for unknown entry");
                        false
                    }
                },
            },
            FeedbackEventKind::Deleted => {
                let before = self.entries.len();
                self.entries.retain(|e| e.id != payload.id);
                self.entries.len() != before
            }
        }
    }

    fn confirm(&mut self, mutation: &OptimisticMutation, server: Option<&FeedbackEntry>) {
        match (mutation.op, server) {
            (MutationOp::Delete, _) => {
                self.entries.retain(|e| e.id != mutation.entry_id);
            }
            (MutationOp::Create, Some(server)) => {
                // A live echo may already have inserted the server id.
                self.entries.retain(|e| e.id != server.id);
                match self.index_of(&mutation.entry_id) {
                    Some(i) => self.entries[i] = server.clone(),
                    None => self.entries.insert(0, server.clone()),
                }
            }
            (_, Some(server)) => {
                if let Some(i) = self.index_of(&mutation.entry_id) {
                    self.entries[i] = server.clone();
                }
            }
            (_, None) => {}
        }
    }

    fn rollback(&mut self, mutation: &OptimisticMutation) {
        match mutation.op {
            MutationOp::Create => {
                self.entries.retain(|e| e.id != mutation.entry_id);
            }
            MutationOp::Delete => {
                if let Some((original, index)) = &mutation.original {
                    if self.index_of(&original.id).is_none() {
                        let at = (*index).min(self.entries.len());
                        self.entries.insert(at, original.clone());
                    }
                }
            }
            MutationOp::Update | MutationOp::Moderate | MutationOp::Vote => {
                if let Some((original, index)) = &mutation.original {
                    match self.index_of(&original.id) {
                        Some(i) => self.entries[i] = original.clone(),
                        None => {
                            let at = (*index).min(self.entries.len());
                            self.entries.insert(at, original.clone());
                        }
                    }
                }
            }
        }
    }

    /// Replays events that arrived while `mutation` was pending.
    ///
    /// After a rollback every event replays. After a confirmation only
    /// deletes and events newer than the server's entry do; the rest are
    /// echoes of the confirmed write.
    fn replay_deferred(&mut self, mutation: &OptimisticMutation, server: Option<&FeedbackEntry>) {
        for event in &mutation.deferred {
            let replay = match mutation.status {
                MutationStatus::Confirmed => {
                    event.kind == FeedbackEventKind::Deleted
                        || matches!(
                            (event.payload.updated_at, server),
                            (Some(remote), Some(server)) if remote > server.updated_at
                        )
                }
                _ => true,
            };
            if replay {
                self.apply_event(event);
            } else {
                tracing::debug!(id = %event.payload.id, "Dropping echo of confirmed mutation");
            }
        }
    }
}

struct Inner {
    api: Arc<dyn FeedbackApi>,
    mutation_timeout: Duration,
    state: Mutex<StoreState>,
    observers: Subscribers<StoreEvent>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn finish_load(
        &self,
        generation: u64,
        target: &ContentRef,
        result: Result<FeedbackPage>,
    ) -> Result<LoadOutcome> {
        let mut state = self.lock();
        if state.generation != generation || state.target.as_ref() != Some(target) {
            drop(state);
            tracing::debug!(%target, generation, "Discarding stale feedback load");
            increment_counter!("reviewsync_stale_loads_total");
            return Ok(LoadOutcome::Discarded);
        }

        let page = match result {
            Ok(page) => page,
            Err(ReviewSyncError::Unauthorized(message)) => {
                drop(state);
                tracing::warn!(%target, %message, "Feedback load refused the credential");
                return Err(ReviewSyncError::Unauthorized(message));
            }
            Err(e) => {
                drop(state);
                tracing::warn!(%target, error = %e, "Feedback load failed");
                return Err(ReviewSyncError::FetchFailed(e.to_string()));
            }
        };

        let FeedbackPage {
            entries,
            stats,
            pagination,
        } = page;
        let total = entries.len();
        state.entries = entries.into_iter().filter(|e| &e.target == target).collect();
        if state.entries.len() != total {
            tracing::warn!(
                %target,
                dropped = total - state.entries.len(),
                "Backend returned entries for another content item"
            );
        }
        state.server_stats = stats;
        state.pagination = Some(pagination);
        state.overlay_pending();
        state.recompute();
        let count = state.entries.len();
        drop(state);

        tracing::debug!(%target, count, "Feedback page applied");
        self.observers.publish(&StoreEvent::Reloaded {
            target: target.clone(),
        });
        Ok(LoadOutcome::Applied)
    }

    async fn bounded<T, F>(&self, op: MutationOp, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.mutation_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(classify_failure(e)),
            Err(_) => Err(ReviewSyncError::Timeout {
                operation: op.as_str().to_string(),
            }),
        }
    }

    fn settle<T: Settled>(&self, id: MutationId, op: MutationOp, outcome: Result<T>) -> Result<T> {
        let label = match &outcome {
            Ok(_) => "confirmed",
            Err(ReviewSyncError::Timeout { .. }) => "timeout",
            Err(_) => "rejected",
        };
        increment_counter!("reviewsync_mutations_total", "op" => op.as_str(), "outcome" => label);

        let mut state = self.lock();
        let Some(position) = state.pending.iter().position(|m| m.id == id) else {
            drop(state);
            tracing::debug!(mutation = %id, %op, "Store retargeted before mutation settled");
            return outcome;
        };
        let mut mutation = state.pending.remove(position);
        let server = outcome.as_ref().ok().and_then(T::server_entry);

        if outcome.is_ok() {
            mutation.status = MutationStatus::Confirmed;
            state.confirm(&mutation, server);
        } else {
            mutation.status = MutationStatus::Rejected;
            state.rollback(&mutation);
        }
        state.replay_deferred(&mutation, server);
        state.recompute();
        drop(state);

        match &outcome {
            Ok(_) => tracing::debug!(mutation = %id, %op, "Mutation confirmed"),
            Err(e @ ReviewSyncError::Timeout { .. }) => {
                tracing::warn!(mutation = %id, %op, error = %e, "Mutation timed out; rolled back")
            }
            Err(e) => tracing::warn!(mutation = %id, %op, error = %e, "Mutation rejected; rolled back"),
        }
        self.observers.publish(&StoreEvent::MutationSettled {
            id,
            op,
            status: mutation.status,
        });
        outcome
    }
}

/// What a settled backend call hands back to reconcile against.
trait Settled {
    fn server_entry(&self) -> Option<&FeedbackEntry>;
}

impl Settled for FeedbackEntry {
    fn server_entry(&self) -> Option<&FeedbackEntry> {
        Some(self)
    }
}

impl Settled for () {
    fn server_entry(&self) -> Option<&FeedbackEntry> {
        None
    }
}

/// Maps backend failures onto the rejection taxonomy. Session and timeout
/// errors pass through unchanged.
fn classify_failure(error: ReviewSyncError) -> ReviewSyncError {
    match error {
        ReviewSyncError::Backend { status, message } => ReviewSyncError::MutationRejected {
            status: Some(status),
            message,
        },
        ReviewSyncError::Transport(message) => ReviewSyncError::MutationRejected {
            status: None,
            message,
        },
        ReviewSyncError::Serialization(e) => ReviewSyncError::MutationRejected {
            status: None,
            message: format!("unreadable response: {}", e),
        },
        other => other,
    }
}

/// Feedback for one content item, with optimistic mutations.
///
/// Cloning yields another handle to the same store.
#[derive(Clone)]
pub struct FeedbackStore {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for FeedbackStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("FeedbackStore")
            .field("target", &state.target)
            .field("entries", &state.entries.len())
            .field("pending", &state.pending.len())
            .finish()
    }
}

impl FeedbackStore {
    /// Empty store; mutations are bounded by `mutation_timeout`.
    pub fn new(api: Arc<dyn FeedbackApi>, mutation_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                api,
                mutation_timeout,
                state: Mutex::new(StoreState::default()),
                observers: Subscribers::new(),
            }),
        }
    }

    /// Loads one page for `target`.
    ///
    /// The store is retargeted and the load tagged when this is called, not
    /// when the returned future is first polled, so a later call always
    /// supersedes an earlier one. On failure the previous entries stay as
    /// they were.
    ///
    /// # Errors
    ///
    /// Returns [`ReviewSyncError::FetchFailed`] when the backend call fails,
    /// or [`ReviewSyncError::Unauthorized`] when it refuses the credential.
    pub fn load(
        &self,
        target: ContentRef,
        page: u32,
        page_size: u32,
    ) -> impl Future<Output = Result<LoadOutcome>> + Send + 'static {
        let generation = {
            let mut state = self.inner.lock();
            if state.target.as_ref() != Some(&target) {
                tracing::debug!(%target, "Retargeting feedback store");
                state.target = Some(target.clone());
                state.reset();
            }
            state.generation += 1;
            state.generation
        };

        let inner = Arc::clone(&self.inner);
        let query = ListQuery {
            target: target.clone(),
            page,
            page_size,
        };
        async move {
            let result = inner.api.list_by_content(&query).await;
            inner.finish_load(generation, &target, result)
        }
    }

    /// Stops showing any content item. In-flight loads are discarded and
    /// in-flight mutations no longer touch the set when they settle.
    pub fn detach(&self) {
        {
            let mut state = self.inner.lock();
            state.target = None;
            state.generation += 1;
            state.reset();
        }
        self.inner.observers.publish(&StoreEvent::Detached);
    }

    /// Writes a new entry, showing it before the backend confirms.
    ///
    /// # Errors
    ///
    /// - [`ReviewSyncError::InvalidFeedback`] when the payload is invalid or
    ///   targets a different content item; nothing is sent
    /// - [`ReviewSyncError::MutationRejected`] or
    ///   [`ReviewSyncError::Timeout`] after the temporary entry is removed
    pub async fn create_local(&self, session: &Session, new: NewFeedback) -> Result<FeedbackEntry> {
        new.validate()?;
        let id = MutationId::new();
        let temp_id = id.temp_entry_id();
        {
            let mut state = self.inner.lock();
            if state.target.as_ref() != Some(&new.target) {
                return Err(ReviewSyncError::InvalidFeedback(format!(
                    "feedback for {} cannot be added while showing {}",
                    new.target,
                    state
                        .target
                        .as_ref()
                        .map(ToString::to_string)
                        .unwrap_or_else(|| "nothing".to_string())
                )));
            }
            let now = Utc::now();
            let entry = FeedbackEntry {
                id: temp_id.clone(),
                author: Author {
                    id: session.subject.id.clone(),
                    name: session.subject.name.clone().unwrap_or_default(),
                    avatar: None,
                },
                target: new.target.clone(),
                body: new.body.clone(),
                rating: new.rating,
                visible: true,
                moderation: None,
                helpful_count: 0,
                helpful_voters: Default::default(),
                created_at: now,
                updated_at: now,
                client_mutation_id: Some(id.to_string()),
            };
            state.entries.insert(0, entry.clone());
            state.pending.push(OptimisticMutation::pending(
                id,
                MutationOp::Create,
                temp_id,
                new.target.clone(),
                Some(entry),
                None,
            ));
            state.recompute();
        }
        self.inner.observers.publish(&StoreEvent::EntriesChanged);
        tracing::debug!(mutation = %id, target = %new.target, "Optimistic create applied");

        let body = CreateFeedback::from_new(&new, id.to_string());
        let result = self
            .inner
            .bounded(MutationOp::Create, self.inner.api.create(&session.credential, &body))
            .await;
        self.inner.settle(id, MutationOp::Create, result)
    }

    /// Edits the body or rating of the session subject's own entry.
    ///
    /// # Errors
    ///
    /// [`ReviewSyncError::NotAuthor`] when the subject did not write the
    /// entry; otherwise as for [`create_local`](Self::create_local).
    pub async fn update_local(
        &self,
        session: &Session,
        entry_id: &str,
        patch: FeedbackPatch,
    ) -> Result<FeedbackEntry> {
        patch.validate()?;
        let subject = session.subject.id.clone();
        let id = self.begin_edit(entry_id, MutationOp::Update, |original| {
            if !original.is_authored_by(&subject) {
                return Err(ReviewSyncError::NotAuthor {
                    entry_id: original.id.clone(),
                });
            }
            let mut updated = original.clone();
            updated.apply_patch(&patch, Utc::now());
            Ok(Some(updated))
        })?;

        let result = self
            .inner
            .bounded(
                MutationOp::Update,
                self.inner.api.update(&session.credential, entry_id, &patch),
            )
            .await;
        self.inner.settle(id, MutationOp::Update, result)
    }

    /// Removes an entry written by the subject, or any entry for a
    /// moderator.
    pub async fn delete_local(&self, session: &Session, entry_id: &str) -> Result<()> {
        let subject = session.subject.clone();
        let id = self.begin_edit(entry_id, MutationOp::Delete, |original| {
            if !original.is_authored_by(&subject.id) && !subject.role.is_moderator() {
                return Err(ReviewSyncError::NotAuthor {
                    entry_id: original.id.clone(),
                });
            }
            Ok(None)
        })?;

        let result = self
            .inner
            .bounded(
                MutationOp::Delete,
                self.inner.api.delete(&session.credential, entry_id),
            )
            .await;
        self.inner.settle(id, MutationOp::Delete, result)
    }

    /// Shows or hides an entry. Moderators only.
    pub async fn moderate_local(
        &self,
        session: &Session,
        entry_id: &str,
        visible: bool,
        reason: Option<String>,
    ) -> Result<FeedbackEntry> {
        if !session.subject.role.is_moderator() {
            return Err(ReviewSyncError::NotModerator(format!(
                "{} cannot moderate {}",
                session.subject.id, entry_id
            )));
        }
        let moderator = session.subject.id.clone();
        let note = reason.clone();
        let id = self.begin_edit(entry_id, MutationOp::Moderate, |original| {
            let mut moderated = original.clone();
            let now = Utc::now();
            moderated.visible = visible;
            moderated.moderation = Some(Moderation {
                moderated_by: Some(moderator),
                reason: note,
                moderated_at: Some(now),
            });
            moderated.updated_at = now;
            Ok(Some(moderated))
        })?;

        let request = ModerationRequest { visible, reason };
        let result = self
            .inner
            .bounded(
                MutationOp::Moderate,
                self.inner
                    .api
                    .set_visibility(&session.credential, entry_id, &request),
            )
            .await;
        self.inner.settle(id, MutationOp::Moderate, result)
    }

    /// Flips the subject's helpful vote on someone else's entry.
    pub async fn toggle_helpful_local(&self, session: &Session, entry_id: &str) -> Result<FeedbackEntry> {
        let voter = session.subject.id.clone();
        let id = self.begin_edit(entry_id, MutationOp::Vote, |original| {
            if original.is_authored_by(&voter) {
                return Err(ReviewSyncError::InvalidFeedback(
                    "authors cannot vote on their own feedback".to_string(),
                ));
            }
            let mut voted = original.clone();
            voted.toggle_vote(&voter);
            Ok(Some(voted))
        })?;

        let result = self
            .inner
            .bounded(
                MutationOp::Vote,
                self.inner.api.toggle_helpful(&session.credential, entry_id),
            )
            .await;
        self.inner.settle(id, MutationOp::Vote, result)
    }

    /// Feeds a live event into the store.
    pub fn apply_remote_event(&self, event: &FeedbackEvent) -> RemoteOutcome {
        let outcome = {
            let mut state = self.inner.lock();
            if state.target.as_ref() != Some(&event.payload.target) {
                return RemoteOutcome::Ignored;
            }
            let client_id = event.payload.client_mutation_id.clone();
            if let Some(mutation) = state.pending_for(&event.payload.id, client_id.as_deref()) {
                tracing::debug!(
                    id = %event.payload.id,
                    mutation = %mutation.id,
                    "Deferring live event behind pending mutation"
                );
                mutation.deferred.push(event.clone());
                RemoteOutcome::Deferred
            } else if state.apply_event(event) {
                state.recompute();
                RemoteOutcome::Applied
            } else {
                RemoteOutcome::Ignored
            }
        };
        if outcome == RemoteOutcome::Applied {
            self.inner.observers.publish(&StoreEvent::EntriesChanged);
        }
        outcome
    }

    /// Visible entries in display order.
    pub fn entries(&self) -> Vec<FeedbackEntry> {
        self.inner
            .lock()
            .entries
            .iter()
            .filter(|e| e.visible)
            .cloned()
            .collect()
    }

    /// Any held entry by id, hidden ones included.
    pub fn entry(&self, id: &str) -> Option<FeedbackEntry> {
        let state = self.inner.lock();
        state.index_of(id).map(|i| state.entries[i].clone())
    }

    /// Statistics over the visible entries held.
    pub fn statistics(&self) -> AggregateStatistics {
        self.inner.lock().stats.clone()
    }

    /// Statistics the backend reported with the last page.
    pub fn server_statistics(&self) -> Option<AggregateStatistics> {
        self.inner.lock().server_stats.clone()
    }

    /// Paging metadata of the last page.
    pub fn pagination(&self) -> Option<Pagination> {
        self.inner.lock().pagination
    }

    /// Mutations still awaiting the backend.
    pub fn pending_mutations(&self) -> Vec<OptimisticMutation> {
        self.inner.lock().pending.clone()
    }

    /// Content item currently shown.
    pub fn target(&self) -> Option<ContentRef> {
        self.inner.lock().target.clone()
    }

    /// Registers for change notifications.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&StoreEvent) + Send + Sync + 'static,
    {
        self.inner.observers.subscribe(handler)
    }

    /// Applies an optimistic change to an existing entry.
    ///
    /// `edit` checks permissions and returns the optimistic entry, or
    /// `None` to remove it.
    fn begin_edit<F>(
        &self,
        entry_id: &str,
        op: MutationOp,
        edit: F,
    ) -> Result<MutationId>
    where
        F: FnOnce(&FeedbackEntry) -> Result<Option<FeedbackEntry>>,
    {
        let id = MutationId::new();
        {
            let mut state = self.inner.lock();
            let index = state
                .index_of(entry_id)
                .ok_or_else(|| ReviewSyncError::EntryNotFound(entry_id.to_string()))?;
            state.ensure_not_pending(entry_id)?;
            let original = state.entries[index].clone();
            let optimistic = edit(&original)?;
            match &optimistic {
                Some(entry) => state.entries[index] = entry.clone(),
                None => {
                    state.entries.remove(index);
                }
            }
            let target = original.target.clone();
            state.pending.push(OptimisticMutation::pending(
                id,
                op,
                entry_id,
                target,
                optimistic,
                Some((original, index)),
            ));
            state.recompute();
        }
        self.inner.observers.publish(&StoreEvent::EntriesChanged);
        tracing::debug!(mutation = %id, %op, entry = entry_id, "Optimistic change applied");
        Ok(id)
    }
}
