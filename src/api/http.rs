//! JSON/HTTP implementation of the backend contracts
//!
//! Every call maps the response status onto [`ReviewSyncError`]:
//!
//! - `2xx` -- body parsed as JSON (empty bodies accepted for deletes)
//! - `401 Unauthorized` -- [`ReviewSyncError::Unauthorized`]
//! - any other status -- [`ReviewSyncError::Backend`] with the `message`
//!   field of the body when present
//! - request timeout -- [`ReviewSyncError::Timeout`]
//! - no response at all -- [`ReviewSyncError::Transport`]

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;

use super::types::{
    CreateFeedback, FeedbackPage, ListQuery, LoginRequest, LoginResponse, ModerationRequest,
    ResetTicket,
};
use super::{AuthApi, FeedbackApi};
use crate::config::ApiConfig;
use crate::error::{Result, ReviewSyncError};
use crate::feedback::{FeedbackEntry, FeedbackPatch};

/// Error body shape used by the backend.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Backend client over reqwest.
///
/// # Examples
///
/// ```no_run
/// use reviewsync::api::HttpBackend;
/// use reviewsync::config::ApiConfig;
///
/// let backend = HttpBackend::new(&ApiConfig::default()).unwrap();
/// assert!(backend.base_url().ends_with("/api"));
/// ```
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Arc<reqwest::Client>,
    base_url: String,
}

impl HttpBackend {
    /// Builds a client for `config.base_url` with the request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`ReviewSyncError::Config`] for an unparsable base URL and
    /// [`ReviewSyncError::Transport`] when the TLS backend fails to start.
    pub fn new(config: &ApiConfig) -> Result<Self> {
        url::Url::parse(&config.base_url)
            .map_err(|e| ReviewSyncError::Config(format!("Invalid api.base_url: {}", e)))?;
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ReviewSyncError::Transport(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client: Arc::new(client),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Base URL without trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str, credential: Option<&str>) -> RequestBuilder {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let mut req = self
            .client
            .request(method, url)
            .header("Accept", "application/json");
        if let Some(credential) = credential {
            req = req.bearer_auth(credential);
        }
        req
    }

    async fn send(&self, operation: &str, req: RequestBuilder) -> Result<bytes::Bytes> {
        let response = req.send().await.map_err(|e| map_reqwest_error(operation, e))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| map_reqwest_error(operation, e))?;

        if status.is_success() {
            tracing::debug!(operation, status = status.as_u16(), "Backend call succeeded");
            return Ok(body);
        }

        let message = error_message(status, &body);
        tracing::debug!(operation, status = status.as_u16(), %message, "Backend call failed");
        if status == StatusCode::UNAUTHORIZED {
            return Err(ReviewSyncError::Unauthorized(message));
        }
        Err(ReviewSyncError::Backend {
            status: status.as_u16(),
            message,
        })
    }

    async fn send_json<T: DeserializeOwned>(&self, operation: &str, req: RequestBuilder) -> Result<T> {
        let body = self.send(operation, req).await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

fn map_reqwest_error(operation: &str, error: reqwest::Error) -> ReviewSyncError {
    if error.is_timeout() {
        ReviewSyncError::Timeout {
            operation: operation.to_string(),
        }
    } else {
        ReviewSyncError::Transport(format!("{} request failed: {}", operation, error))
    }
}

fn error_message(status: StatusCode, body: &[u8]) -> String {
    serde_json::from_slice::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.message.or(b.error))
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string()
        })
}

/// Some backends wrap single entries as `{"feedback": {...}}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum EntryEnvelope {
    Wrapped { feedback: FeedbackEntry },
    Bare(FeedbackEntry),
}

impl EntryEnvelope {
    fn into_entry(self) -> FeedbackEntry {
        match self {
            EntryEnvelope::Wrapped { feedback } => feedback,
            EntryEnvelope::Bare(entry) => entry,
        }
    }
}

#[async_trait]
impl FeedbackApi for HttpBackend {
    async fn list_by_content(&self, query: &ListQuery) -> Result<FeedbackPage> {
        let req = self
            .request(Method::GET, "feedback", None)
            .query(&query.to_params());
        self.send_json("list", req).await
    }

    async fn create(&self, credential: &str, body: &CreateFeedback) -> Result<FeedbackEntry> {
        let req = self
            .request(Method::POST, "feedback", Some(credential))
            .json(body);
        let envelope: EntryEnvelope = self.send_json("create", req).await?;
        Ok(envelope.into_entry())
    }

    async fn update(
        &self,
        credential: &str,
        id: &str,
        patch: &FeedbackPatch,
    ) -> Result<FeedbackEntry> {
        let req = self
            .request(Method::PATCH, &format!("feedback/{}", id), Some(credential))
            .json(patch);
        let envelope: EntryEnvelope = self.send_json("update", req).await?;
        Ok(envelope.into_entry())
    }

    async fn delete(&self, credential: &str, id: &str) -> Result<()> {
        let req = self.request(Method::DELETE, &format!("feedback/{}", id), Some(credential));
        self.send("delete", req).await?;
        Ok(())
    }

    async fn set_visibility(
        &self,
        credential: &str,
        id: &str,
        request: &ModerationRequest,
    ) -> Result<FeedbackEntry> {
        let req = self
            .request(
                Method::PATCH,
                &format!("feedback/{}/visibility", id),
                Some(credential),
            )
            .json(request);
        let envelope: EntryEnvelope = self.send_json("moderate", req).await?;
        Ok(envelope.into_entry())
    }

    async fn toggle_helpful(&self, credential: &str, id: &str) -> Result<FeedbackEntry> {
        let req = self.request(
            Method::POST,
            &format!("feedback/{}/helpful", id),
            Some(credential),
        );
        let envelope: EntryEnvelope = self.send_json("vote", req).await?;
        Ok(envelope.into_entry())
    }
}

#[async_trait]
impl AuthApi for HttpBackend {
    async fn issue_session(&self, request: &LoginRequest) -> Result<LoginResponse> {
        let req = self.request(Method::POST, "auth/login", None).json(request);
        self.send_json("login", req).await
    }

    async fn issue_session_reset(&self, email: &str) -> Result<ResetTicket> {
        let req = self
            .request(Method::POST, "auth/forgot-password", None)
            .json(&json!({ "email": email }));
        let body = self.send("password_reset", req).await?;
        if body.is_empty() {
            return Ok(ResetTicket::default());
        }
        Ok(serde_json::from_slice(&body)?)
    }

    async fn terminate_session(&self, credential: &str) -> Result<()> {
        let req = self.request(Method::POST, "auth/logout", Some(credential));
        self.send("logout", req).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message_prefers_body_message() {
        let msg = error_message(StatusCode::CONFLICT, br#"{"message":"already reviewed"}"#);
        assert_eq!(msg, "already reviewed");
    }

    #[test]
    fn test_error_message_falls_back_to_reason() {
        let msg = error_message(StatusCode::BAD_GATEWAY, b"<html>");
        assert_eq!(msg, "Bad Gateway");
    }

    #[test]
    fn test_new_rejects_bad_base_url() {
        let config = ApiConfig {
            base_url: "not a url".to_string(),
            ..ApiConfig::default()
        };
        assert!(matches!(
            HttpBackend::new(&config),
            Err(ReviewSyncError::Config(_))
        ));
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let config = ApiConfig {
            base_url: "http://localhost:9999/api/".to_string(),
            ..ApiConfig::default()
        };
        let backend = HttpBackend::new(&config).unwrap();
        assert_eq!(backend.base_url(), "http://localhost:9999/api");
    }
}
