//! Error types for ReviewSync
//!
//! This module defines the error taxonomy shared by the session, feedback and
//! live-channel layers, using `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Main error type for ReviewSync operations
///
/// The first five variants are the user-facing taxonomy a view layer reacts
/// to; the remaining variants are supporting detail produced by the backend,
/// storage and configuration layers.
#[derive(Error, Debug)]
pub enum ReviewSyncError {
    /// The session was absent or expired when an authenticated action was
    /// attempted. The client has already been redirected to login.
    #[error("Session expired")]
    SessionExpired,

    /// Initial load of a feedback page failed; prior state is preserved.
    #[error("Failed to fetch feedback: {0}")]
    FetchFailed(String),

    /// The backend rejected a create/update/delete; the optimistic change
    /// has been rolled back.
    #[error("Mutation rejected: {message}")]
    MutationRejected {
        /// HTTP status returned by the backend, when there was one
        status: Option<u16>,
        /// Human readable reason
        message: String,
    },

    /// A bounded backend call did not settle in time.
    #[error("Timed out waiting for {operation}")]
    Timeout {
        /// The operation that timed out (e.g. `create`, `list`)
        operation: String,
    },

    /// The live channel is not currently open.
    #[error("Live connection degraded")]
    ConnectionDegraded,

    /// The current session subject does not own the entry.
    #[error("Only the author may change feedback entry {entry_id}")]
    NotAuthor {
        /// Entry that was targeted
        entry_id: String,
    },

    /// The current session lacks the moderator role.
    #[error("Moderator role required: {0}")]
    NotModerator(String),

    /// The targeted entry is not in the local set.
    #[error("Feedback entry not found: {0}")]
    EntryNotFound(String),

    /// Another local mutation on the same entry has not settled yet.
    #[error("A change to feedback entry {0} is still pending")]
    MutationInFlight(String),

    /// The payload violates a feedback invariant (rating range, empty body,
    /// wrong content item).
    #[error("Invalid feedback: {0}")]
    InvalidFeedback(String),

    /// The backend answered `401 Unauthorized`.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Any other non-success backend status.
    #[error("Backend returned HTTP {status}: {message}")]
    Backend {
        /// HTTP status code
        status: u16,
        /// Message extracted from the response body
        message: String,
    },

    /// The request never produced a response (DNS, connect, reset).
    #[error("Transport error: {0}")]
    Transport(String),

    /// A credential could not be decoded.
    #[error("Invalid credential: {0}")]
    InvalidCredential(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Credential storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Keyring/credential storage errors
    #[error("Keyring error: {0}")]
    Keyring(#[from] keyring::Error),
}

impl ReviewSyncError {
    /// Returns `true` for errors after which an optimistic change was rolled
    /// back because the backend said no or never answered.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            ReviewSyncError::MutationRejected { .. } | ReviewSyncError::Timeout { .. }
        )
    }

    /// Returns `true` when retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ReviewSyncError::FetchFailed(_)
                | ReviewSyncError::Timeout { .. }
                | ReviewSyncError::Transport(_)
                | ReviewSyncError::ConnectionDegraded
        )
    }

    /// Stable snake_case label used in log fields and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            ReviewSyncError::SessionExpired => "session_expired",
            ReviewSyncError::FetchFailed(_) => "fetch_failed",
            ReviewSyncError::MutationRejected { .. } => "mutation_rejected",
            ReviewSyncError::Timeout { .. } => "timeout",
            ReviewSyncError::ConnectionDegraded => "connection_degraded",
            ReviewSyncError::NotAuthor { .. } => "not_author",
            ReviewSyncError::NotModerator(_) => "not_moderator",
            ReviewSyncError::EntryNotFound(_) => "entry_not_found",
            ReviewSyncError::MutationInFlight(_) => "mutation_in_flight",
            ReviewSyncError::InvalidFeedback(_) => "invalid_feedback",
            ReviewSyncError::Unauthorized(_) => "unauthorized",
            ReviewSyncError::Backend { .. } => "backend",
            ReviewSyncError::Transport(_) => "transport",
            ReviewSyncError::InvalidCredential(_) => "invalid_credential",
            ReviewSyncError::Config(_) => "config",
            ReviewSyncError::Storage(_) => "storage",
            ReviewSyncError::Io(_) => "io",
            ReviewSyncError::Serialization(_) => "serialization",
            ReviewSyncError::Yaml(_) => "yaml",
            ReviewSyncError::Keyring(_) => "keyring",
        }
    }
}

/// Result type alias for ReviewSync operations
///
/// Core operations return the typed [`ReviewSyncError`] so that callers can
/// match on the failure kind. Startup helpers (configuration, logging) use
/// `anyhow::Result` instead.
pub type Result<T> = std::result::Result<T, ReviewSyncError>;
