//! Scripted in-process backend for unit tests

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::oneshot;

use super::types::{CreateFeedback, FeedbackPage, ListQuery, ModerationRequest};
use super::FeedbackApi;
use crate::error::{Result, ReviewSyncError};
use crate::feedback::{FeedbackEntry, FeedbackPatch};

/// One scripted reply.
pub(crate) enum Step<T> {
    /// Resolve immediately
    Ready(Result<T>),
    /// Resolve when the test sends on the paired sender
    Gated(oneshot::Receiver<Result<T>>),
    /// Never resolve
    Hang,
}

/// A reply the test releases by hand.
pub(crate) fn gate<T>() -> (oneshot::Sender<Result<T>>, Step<T>) {
    let (tx, rx) = oneshot::channel();
    (tx, Step::Gated(rx))
}

#[derive(Default)]
pub(crate) struct FakeBackend {
    lists: Mutex<VecDeque<Step<FeedbackPage>>>,
    entries: Mutex<VecDeque<Step<FeedbackEntry>>>,
    deletes: Mutex<VecDeque<Step<()>>>,
    calls: Mutex<Vec<String>>,
}

impl FakeBackend {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Queues a reply for the next `list_by_content`.
    pub(crate) fn push_list(&self, step: Step<FeedbackPage>) {
        self.lists.lock().unwrap().push_back(step);
    }

    /// Queues a reply for the next create/update/moderate/vote.
    pub(crate) fn push_entry(&self, step: Step<FeedbackEntry>) {
        self.entries.lock().unwrap().push_back(step);
    }

    /// Queues a reply for the next delete.
    pub(crate) fn push_delete(&self, step: Step<()>) {
        self.deletes.lock().unwrap().push_back(step);
    }

    /// Calls made so far, e.g. `create` or `delete:f1`.
    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

async fn resolve<T>(step: Option<Step<T>>, operation: &str) -> Result<T> {
    match step {
        Some(Step::Ready(result)) => result,
        Some(Step::Gated(rx)) => rx
            .await
            .unwrap_or_else(|_| Err(ReviewSyncError::Transport("gate dropped".to_string()))),
        Some(Step::Hang) => futures::future::pending().await,
        None => Err(ReviewSyncError::Transport(format!(
            "no scripted reply for {}",
            operation
        ))),
    }
}

#[async_trait]
impl FeedbackApi for FakeBackend {
    async fn list_by_content(&self, query: &ListQuery) -> Result<FeedbackPage> {
        self.record(format!("list:{}", query.target));
        let step = self.lists.lock().unwrap().pop_front();
        resolve(step, "list").await
    }

    async fn create(&self, _credential: &str, body: &CreateFeedback) -> Result<FeedbackEntry> {
        self.record(format!("create:{}", body.target));
        let step = self.entries.lock().unwrap().pop_front();
        resolve(step, "create").await
    }

    async fn update(
        &self,
        _credential: &str,
        id: &str,
        _patch: &FeedbackPatch,
    ) -> Result<FeedbackEntry> {
        self.record(format!("update:{}", id));
        let step = self.entries.lock().unwrap().pop_front();
        resolve(step, "update").await
    }

    async fn delete(&self, _credential: &str, id: &str) -> Result<()> {
        self.record(format!("delete:{}", id));
        let step = self.deletes.lock().unwrap().pop_front();
        resolve(step, "delete").await
    }

    async fn set_visibility(
        &self,
        _credential: &str,
        id: &str,
        _request: &ModerationRequest,
    ) -> Result<FeedbackEntry> {
        self.record(format!("moderate:{}", id));
        let step = self.entries.lock().unwrap().pop_front();
        resolve(step, "moderate").await
    }

    async fn toggle_helpful(&self, _credential: &str, id: &str) -> Result<FeedbackEntry> {
        self.record(format!("vote:{}", id));
        let step = self.entries.lock().unwrap().pop_front();
        resolve(step, "vote").await
    }
}
