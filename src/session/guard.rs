//! The single authority on whether the client may act as a user right now

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::credential::{decode_credential, Subject};
use super::token_store::TokenStore;
use crate::error::{Result, ReviewSyncError};
use crate::pubsub::{Subscribers, Subscription};

/// Sends the user to the login entry point.
pub trait Navigator: Send + Sync {
    /// Navigate to `login_path`.
    fn redirect_to_login(&self, login_path: &str);
}

/// Source of the current instant.
pub trait Clock: Send + Sync {
    /// Now.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A decoded credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Opaque bearer credential
    pub credential: String,
    /// Decoded expiry
    pub expires_at: DateTime<Utc>,
    /// Whether it was stored durably
    pub remember_me: bool,
    /// Who it speaks for
    pub subject: Subject,
}

impl Session {
    /// Valid iff expiry is strictly after `now`.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// Session states. Absent and Expired both route to login.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No usable credential stored
    Absent,
    /// Credential present and unexpired
    Valid,
    /// Credential present but past its expiry
    Expired,
}

/// Notification published on session transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A new session became current
    Established {
        /// Subject of the new session
        subject_id: String,
    },
    /// The session ended by logout
    Terminated,
    /// The session was found expired or rejected and has been cleared
    Expired,
}

/// Decides session validity and routes invalid sessions to login.
///
/// Validity is never cached: every query re-reads the store and re-decodes
/// the credential against the clock.
pub struct SessionGuard {
    store: Arc<dyn TokenStore>,
    navigator: Arc<dyn Navigator>,
    clock: Arc<dyn Clock>,
    login_path: String,
    events: Subscribers<SessionEvent>,
}

impl fmt::Debug for SessionGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionGuard")
            .field("store", &self.store)
            .field("login_path", &self.login_path)
            .finish()
    }
}

impl SessionGuard {
    /// Guard over `store` using the wall clock.
    pub fn new(
        store: Arc<dyn TokenStore>,
        navigator: Arc<dyn Navigator>,
        login_path: impl Into<String>,
    ) -> Self {
        Self::with_clock(store, navigator, Arc::new(SystemClock), login_path)
    }

    /// Guard with an explicit clock.
    pub fn with_clock(
        store: Arc<dyn TokenStore>,
        navigator: Arc<dyn Navigator>,
        clock: Arc<dyn Clock>,
        login_path: impl Into<String>,
    ) -> Self {
        Self {
            store,
            navigator,
            clock,
            login_path: login_path.into(),
            events: Subscribers::new(),
        }
    }

    /// Decodes the stored credential.
    ///
    /// Storage and decode failures are logged and reported as `None`.
    pub fn current_session(&self) -> Option<Session> {
        let stored = match self.store.load() {
            Ok(Some(stored)) => stored,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read stored credential");
                return None;
            }
        };
        match decode_credential(&stored.credential) {
            Ok(claims) => Some(Session {
                credential: stored.credential,
                expires_at: claims.expires_at,
                remember_me: stored.remember_me,
                subject: claims.subject,
            }),
            Err(e) => {
                tracing::warn!(error = %e, "Stored credential could not be decoded");
                None
            }
        }
    }

    /// Current state, recomputed from the store and clock.
    pub fn state(&self) -> SessionState {
        match self.current_session() {
            None => SessionState::Absent,
            Some(session) if session.is_valid_at(self.clock.now()) => SessionState::Valid,
            Some(_) => SessionState::Expired,
        }
    }

    /// `true` iff a session is present and unexpired right now.
    pub fn is_valid(&self) -> bool {
        self.state() == SessionState::Valid
    }

    /// Returns the current session, or clears state, redirects to login
    /// once and fails.
    ///
    /// # Errors
    ///
    /// Returns [`ReviewSyncError::SessionExpired`] when the session is
    /// absent or expired.
    pub fn require_valid(&self) -> Result<Session> {
        let now = self.clock.now();
        match self.current_session() {
            Some(session) if session.is_valid_at(now) => Ok(session),
            other => {
                tracing::info!(
                    state = if other.is_some() { "expired" } else { "absent" },
                    "Session not usable"
                );
                self.expire();
                Err(ReviewSyncError::SessionExpired)
            }
        }
    }

    /// Stores a freshly issued credential and makes it current.
    ///
    /// # Errors
    ///
    /// Returns [`ReviewSyncError::InvalidCredential`] when the credential
    /// cannot be decoded or is already expired; nothing is stored then.
    pub fn establish(&self, credential: &str, remember_me: bool) -> Result<Session> {
        let claims = decode_credential(credential)?;
        if claims.expires_at <= self.clock.now() {
            return Err(ReviewSyncError::InvalidCredential(
                "credential is already expired".to_string(),
            ));
        }
        self.store.save(credential, remember_me)?;
        tracing::info!(subject = %claims.subject.id, remember_me, "Session established");
        self.events.publish(&SessionEvent::Established {
            subject_id: claims.subject.id.clone(),
        });
        Ok(Session {
            credential: credential.to_string(),
            expires_at: claims.expires_at,
            remember_me,
            subject: claims.subject,
        })
    }

    /// Explicit logout.
    pub fn terminate(&self) -> Result<()> {
        self.store.clear()?;
        tracing::info!("Session terminated");
        self.events.publish(&SessionEvent::Terminated);
        Ok(())
    }

    /// Treats the current session as expired regardless of its claims.
    ///
    /// Used when the backend rejects the credential with 401.
    pub fn invalidate(&self) {
        tracing::warn!("Backend rejected credential; invalidating session");
        self.expire();
    }

    /// Registers for session transitions.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(handler)
    }

    /// Login entry point used for redirects.
    pub fn login_path(&self) -> &str {
        &self.login_path
    }

    fn expire(&self) {
        if let Err(e) = self.store.clear() {
            tracing::warn!(error = %e, "Failed to clear stored credential");
        }
        self.navigator.redirect_to_login(&self.login_path);
        self.events.publish(&SessionEvent::Expired);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::token_store::MemoryTokenStore;
    use crate::test_utils::{ManualClock, RecordingNavigator};
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
    use chrono::Duration;
    use std::sync::Mutex;

    struct Fixture {
        guard: SessionGuard,
        store: Arc<MemoryTokenStore>,
        navigator: Arc<RecordingNavigator>,
        clock: Arc<ManualClock>,
    }

    fn start() -> DateTime<Utc> {
        DateTime::from_timestamp(1_800_000_000, 0).unwrap()
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryTokenStore::new());
        let navigator = Arc::new(RecordingNavigator::new());
        let clock = Arc::new(ManualClock::new(start()));
        let guard = SessionGuard::with_clock(
            store.clone(),
            navigator.clone(),
            clock.clone(),
            "/login",
        );
        Fixture {
            guard,
            store,
            navigator,
            clock,
        }
    }

    fn credential(sub: &str, exp: DateTime<Utc>) -> String {
        let payload = serde_json::json!({"sub": sub, "exp": exp.timestamp()});
        format!(
            "h.{}.s",
            URL_SAFE_NO_PAD.encode(payload.to_string())
        )
    }

    #[test]
    fn test_absent_session() {
        let f = fixture();
        assert_eq!(f.guard.state(), SessionState::Absent);
        assert!(!f.guard.is_valid());
        assert!(f.guard.current_session().is_none());
    }

    #[test]
    fn test_establish_makes_session_valid() {
        let f = fixture();
        let session = f
            .guard
            .establish(&credential("u1", start() + Duration::hours(1)), true)
            .unwrap();
        assert_eq!(session.subject.id, "u1");
        assert!(f.guard.is_valid());
        assert!(f.store.load().unwrap().unwrap().remember_me);
    }

    #[test]
    fn test_validity_is_recomputed_on_each_call() {
        let f = fixture();
        f.guard
            .establish(&credential("u1", start() + Duration::seconds(10)), false)
            .unwrap();
        assert!(f.guard.is_valid());

        f.clock.advance(Duration::seconds(10));
        assert_eq!(f.guard.state(), SessionState::Expired);
        assert!(!f.guard.is_valid());
    }

    #[test]
    fn test_require_valid_expired_clears_and_redirects_once() {
        let f = fixture();
        f.guard
            .establish(&credential("u1", start() + Duration::seconds(5)), true)
            .unwrap();
        f.clock.advance(Duration::minutes(1));

        let err = f.guard.require_valid().unwrap_err();

        assert!(matches!(err, ReviewSyncError::SessionExpired));
        assert_eq!(f.navigator.redirects(), vec!["/login".to_string()]);
        assert!(f.store.load().unwrap().is_none());
    }

    #[test]
    fn test_malformed_credential_is_absent() {
        let f = fixture();
        f.store.save("not-a-jwt", true).unwrap();
        assert_eq!(f.guard.state(), SessionState::Absent);
        assert!(f.guard.require_valid().is_err());
        assert_eq!(f.navigator.count(), 1);
    }

    #[test]
    fn test_establish_rejects_expired_credential() {
        let f = fixture();
        let result = f
            .guard
            .establish(&credential("u1", start() - Duration::seconds(1)), true);
        assert!(matches!(result, Err(ReviewSyncError::InvalidCredential(_))));
        assert!(f.store.load().unwrap().is_none());
    }

    #[test]
    fn test_terminate_notifies_subscribers() {
        let f = fixture();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = f
            .guard
            .subscribe(move |e| sink.lock().unwrap().push(e.clone()));

        f.guard
            .establish(&credential("u1", start() + Duration::hours(1)), false)
            .unwrap();
        f.guard.terminate().unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                SessionEvent::Established {
                    subject_id: "u1".to_string()
                },
                SessionEvent::Terminated
            ]
        );
        assert!(!f.guard.is_valid());
        assert_eq!(f.navigator.count(), 0);
    }

    #[test]
    fn test_invalidate_clears_even_unexpired_session() {
        let f = fixture();
        f.guard
            .establish(&credential("u1", start() + Duration::hours(1)), true)
            .unwrap();
        f.guard.invalidate();
        assert_eq!(f.guard.state(), SessionState::Absent);
        assert_eq!(f.navigator.count(), 1);
    }
}
