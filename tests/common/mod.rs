use std::fs;
use std::path::PathBuf;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use tempfile::TempDir;

/// Unsigned credential for `sub` expiring at `exp`.
#[allow(dead_code)]
pub fn credential_expiring(sub: &str, role: &str, exp: DateTime<Utc>) -> String {
    let header = json!({"alg": "HS256", "typ": "JWT"});
    let payload = json!({"sub": sub, "name": sub, "role": role, "exp": exp.timestamp()});
    format!(
        "{}.{}.signature",
        URL_SAFE_NO_PAD.encode(header.to_string()),
        URL_SAFE_NO_PAD.encode(payload.to_string())
    )
}

/// Credential valid for the next hour.
#[allow(dead_code)]
pub fn credential(sub: &str) -> String {
    credential_expiring(sub, "user", Utc::now() + Duration::hours(1))
}

/// Backend representation of one movie review.
#[allow(dead_code)]
pub fn movie_entry(id: &str, movie: &str, author: &str, rate: u8) -> Value {
    let now = Utc::now().to_rfc3339();
    json!({
        "_id": id,
        "movieId": movie,
        "user": {"_id": author, "name": author},
        "content": format!("review {}", id),
        "rate": rate,
        "isVisible": true,
        "helpfulCount": 0,
        "createdAt": now,
        "updatedAt": now
    })
}

/// Backend listing response.
#[allow(dead_code)]
pub fn page(entries: Vec<Value>) -> Value {
    let total = entries.len();
    json!({
        "feedbacks": entries,
        "pagination": {"page": 1, "limit": 10, "total": total, "totalPages": 1}
    })
}

#[allow(dead_code)]
pub fn temp_config_file(contents: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("failed to create tempdir");
    let config_path = temp_dir.path().join("reviewsync.yaml");
    fs::write(&config_path, contents).expect("failed to write config file");
    (temp_dir, config_path)
}
