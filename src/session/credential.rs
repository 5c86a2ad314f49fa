//! Reading claims out of a bearer credential
//!
//! Credentials are three-segment JWTs. Only the payload is decoded: the
//! client needs the expiry and subject to decide whether a session is
//! usable, and the backend remains the authority on signatures.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, ReviewSyncError};

/// Role carried by the credential subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Ordinary reviewer
    #[default]
    User,
    /// May hide or show other users' feedback
    Moderator,
    /// Superset of moderator
    Admin,
}

impl Role {
    /// Returns `true` for roles allowed to moderate.
    pub fn is_moderator(&self) -> bool {
        matches!(self, Role::Moderator | Role::Admin)
    }

    fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "moderator" => Role::Moderator,
            "admin" => Role::Admin,
            _ => Role::User,
        }
    }
}

/// The authenticated user a credential speaks for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    /// User id
    pub id: String,
    /// Display name, when the credential carries one
    pub name: Option<String>,
    /// Role
    pub role: Role,
}

/// Claims decoded from a credential payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claims {
    /// Who the credential is for
    pub subject: Subject,
    /// When it stops being valid
    pub expires_at: DateTime<Utc>,
}

/// Decodes the payload segment of `credential`.
///
/// The subject id is taken from `sub`, `id` or `_id`, in that order.
///
/// # Errors
///
/// Returns [`ReviewSyncError::InvalidCredential`] when the credential is
/// not three dot-separated segments, the payload is not base64url JSON, or
/// `exp` or the subject id is missing.
pub fn decode_credential(credential: &str) -> Result<Claims> {
    let segments: Vec<&str> = credential.split('.').collect();
    if segments.len() != 3 {
        return Err(ReviewSyncError::InvalidCredential(format!(
            "expected 3 segments, found {}",
            segments.len()
        )));
    }

    let raw = URL_SAFE_NO_PAD
        .decode(segments[1].trim_end_matches('='))
        .map_err(|e| ReviewSyncError::InvalidCredential(format!("payload is not base64url: {}", e)))?;
    let payload: Value = serde_json::from_slice(&raw)
        .map_err(|e| ReviewSyncError::InvalidCredential(format!("payload is not JSON: {}", e)))?;

    let exp = payload
        .get("exp")
        .and_then(Value::as_i64)
        .ok_or_else(|| ReviewSyncError::InvalidCredential("missing exp claim".to_string()))?;
    let expires_at = DateTime::from_timestamp(exp, 0)
        .ok_or_else(|| ReviewSyncError::InvalidCredential(format!("exp out of range: {}", exp)))?;

    let id = ["sub", "id", "_id"]
        .iter()
        .find_map(|key| payload.get(*key).and_then(Value::as_str))
        .ok_or_else(|| ReviewSyncError::InvalidCredential("missing subject claim".to_string()))?
        .to_string();
    let name = ["name", "username"]
        .iter()
        .find_map(|key| payload.get(*key).and_then(Value::as_str))
        .map(str::to_string);
    let role = payload
        .get("role")
        .and_then(Value::as_str)
        .map(Role::parse)
        .unwrap_or_default();

    Ok(Claims {
        subject: Subject { id, name, role },
        expires_at,
    })
}
