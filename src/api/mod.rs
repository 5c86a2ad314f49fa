//! Backend contracts
//!
//! The store and auth service talk to the backend only through these
//! traits. [`http::HttpBackend`] implements both over JSON/HTTP. The
//! credential is passed explicitly on every authenticated call so that the
//! caller decides which session a request belongs to.

pub mod http;
pub mod types;

#[cfg(test)]
pub(crate) mod fake;

use async_trait::async_trait;

use crate::error::Result;
use crate::feedback::{FeedbackEntry, FeedbackPatch};

pub use http::HttpBackend;
pub use types::{
    CreateFeedback, FeedbackPage, ListQuery, LoginRequest, LoginResponse, ModerationRequest,
    Pagination, ResetTicket, UserProfile,
};

/// Feedback endpoints.
#[async_trait]
pub trait FeedbackApi: Send + Sync {
    /// Lists one page of visible entries for a content item.
    async fn list_by_content(&self, query: &ListQuery) -> Result<FeedbackPage>;

    /// Creates an entry.
    async fn create(&self, credential: &str, body: &CreateFeedback) -> Result<FeedbackEntry>;

    /// Edits an entry's body or rating.
    async fn update(&self, credential: &str, id: &str, patch: &FeedbackPatch)
        -> Result<FeedbackEntry>;

    /// Removes an entry.
    async fn delete(&self, credential: &str, id: &str) -> Result<()>;

    /// Shows or hides an entry (moderators only).
    async fn set_visibility(
        &self,
        credential: &str,
        id: &str,
        request: &ModerationRequest,
    ) -> Result<FeedbackEntry>;

    /// Toggles the caller's helpful vote.
    async fn toggle_helpful(&self, credential: &str, id: &str) -> Result<FeedbackEntry>;
}

/// Session issuing endpoints.
#[async_trait]
pub trait AuthApi: Send + Sync {
    /// Exchanges credentials for a bearer token.
    async fn issue_session(&self, request: &LoginRequest) -> Result<LoginResponse>;

    /// Requests a password reset email.
    async fn issue_session_reset(&self, email: &str) -> Result<ResetTicket>;

    /// Revokes `credential` server-side.
    async fn terminate_session(&self, credential: &str) -> Result<()>;
}
