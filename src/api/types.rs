//! Request and response bodies exchanged with the backend

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::feedback::{AggregateStatistics, ContentRef, FeedbackEntry, NewFeedback, Rating};
use crate::session::Role;

/// One page request for a content item's feedback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
    /// Content item
    pub target: ContentRef,
    /// 1-based page number
    pub page: u32,
    /// Entries per page
    pub page_size: u32,
}

impl ListQuery {
    /// Query parameters in backend order.
    pub fn to_params(&self) -> Vec<(&'static str, String)> {
        vec![
            (self.target.kind.id_field(), self.target.id.clone()),
            ("page", self.page.to_string()),
            ("limit", self.page_size.to_string()),
        ]
    }
}

/// Paging metadata returned with a listing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    /// Current page
    #[serde(default)]
    pub page: u32,
    /// Page size
    #[serde(default, alias = "pageSize")]
    pub limit: u32,
    /// Total visible entries across all pages
    #[serde(default)]
    pub total: u64,
    /// Number of pages
    #[serde(default)]
    pub total_pages: u32,
}

/// A page of visible entries with backend-computed statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackPage {
    /// Entries on this page
    #[serde(alias = "feedbacks", alias = "data")]
    pub entries: Vec<FeedbackEntry>,
    /// Statistics over all pages, when the backend provides them in a
    /// recognized shape. Informational only.
    #[serde(default, deserialize_with = "lenient_stats")]
    pub stats: Option<AggregateStatistics>,
    /// Paging metadata
    #[serde(default)]
    pub pagination: Pagination,
}

/// Unrecognized statistics never fail the page.
fn lenient_stats<'de, D>(deserializer: D) -> std::result::Result<Option<AggregateStatistics>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match serde_json::from_value(v) {
        Ok(stats) => Some(stats),
        Err(e) => {
            tracing::debug!(error = %e, "Ignoring unrecognized page statistics");
            None
        }
    }))
}

/// Body of a create call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFeedback {
    /// Content item
    #[serde(flatten)]
    pub target: ContentRef,
    /// Body text
    pub content: String,
    /// Star rating
    pub rate: Rating,
    /// Correlation id echoed back on the created entry and its live event
    pub client_mutation_id: String,
}

impl CreateFeedback {
    /// Body for `new`, tagged with `client_mutation_id`.
    pub fn from_new(new: &NewFeedback, client_mutation_id: impl Into<String>) -> Self {
        Self {
            target: new.target.clone(),
            content: new.body.clone(),
            rate: new.rating,
            client_mutation_id: client_mutation_id.into(),
        }
    }
}

/// Body of a visibility change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModerationRequest {
    /// New visibility
    #[serde(rename = "isVisible")]
    pub visible: bool,
    /// Reason shown to the author
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Credentials for issuing a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    /// Account email
    pub email: String,
    /// Account password
    pub password: String,
    /// Whether the backend should issue a long-lived credential
    pub remember_me: bool,
}

/// Public profile of the authenticated user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    /// User id
    #[serde(alias = "_id")]
    pub id: String,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Email address
    #[serde(default)]
    pub email: String,
    /// Avatar URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    /// Role
    #[serde(default)]
    pub role: Role,
}

/// Result of issuing a session.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoginResponse {
    /// Bearer credential
    pub token: String,
    /// Authenticated user
    pub user: UserProfile,
}

/// Acknowledgement of a password reset request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetTicket {
    /// Message suitable for display
    #[serde(default)]
    pub message: String,
}
