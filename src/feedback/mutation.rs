//! Bookkeeping for optimistic local changes awaiting backend confirmation

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::types::{ContentRef, FeedbackEntry, FeedbackEvent};

/// Client-generated correlation id of one local change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MutationId(Uuid);

impl MutationId {
    /// A fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Provisional entry id used while a create is unconfirmed.
    pub fn temp_entry_id(&self) -> String {
        format!("tmp-{}", self.0)
    }
}

impl Default for MutationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MutationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of an optimistic change. Transitions only leave `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationStatus {
    /// Applied locally, backend has not answered
    Pending,
    /// Backend accepted it
    Confirmed,
    /// Backend rejected it or never answered; the change was undone
    Rejected,
}

/// Which local change is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationOp {
    /// New entry
    Create,
    /// Edit of body or rating
    Update,
    /// Removal
    Delete,
    /// Visibility change by a moderator
    Moderate,
    /// Helpful vote toggle
    Vote,
}

impl MutationOp {
    /// Label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationOp::Create => "create",
            MutationOp::Update => "update",
            MutationOp::Delete => "delete",
            MutationOp::Moderate => "moderate",
            MutationOp::Vote => "vote",
        }
    }
}

impl fmt::Display for MutationOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A local change applied ahead of backend confirmation.
///
/// Holds what is needed to undo it (`original` with its list position)
/// and the live events for the same entry that arrived while it was
/// pending.
#[derive(Debug, Clone)]
pub struct OptimisticMutation {
    /// Correlation id
    pub id: MutationId,
    /// Kind of change
    pub op: MutationOp,
    /// Entry the change applies to (the temp id for creates)
    pub entry_id: String,
    /// Content item of the entry
    pub target: ContentRef,
    /// Current status
    pub status: MutationStatus,
    /// Entry as shown locally while pending (`None` for deletes)
    pub optimistic: Option<FeedbackEntry>,
    /// Entry before the change and its index (`None` for creates)
    pub original: Option<(FeedbackEntry, usize)>,
    /// Live events for `entry_id` received while pending
    pub deferred: Vec<FeedbackEvent>,
}

impl OptimisticMutation {
    /// Starts tracking a change.
    pub fn pending(
        id: MutationId,
        op: MutationOp,
        entry_id: impl Into<String>,
        target: ContentRef,
        optimistic: Option<FeedbackEntry>,
        original: Option<(FeedbackEntry, usize)>,
    ) -> Self {
        Self {
            id,
            op,
            entry_id: entry_id.into(),
            target,
            status: MutationStatus::Pending,
            optimistic,
            original,
            deferred: Vec::new(),
        }
    }

    /// Returns `true` while the backend has not answered.
    pub fn is_pending(&self) -> bool {
        self.status == MutationStatus::Pending
    }
}
