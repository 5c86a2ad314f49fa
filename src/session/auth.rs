//! Login, logout and password reset on top of the session guard

use std::sync::Arc;

use crate::api::{AuthApi, LoginRequest, ResetTicket, UserProfile};
use crate::error::{Result, ReviewSyncError};

use super::guard::SessionGuard;

/// Issues and ends sessions through the backend.
pub struct AuthService {
    api: Arc<dyn AuthApi>,
    guard: Arc<SessionGuard>,
}

impl std::fmt::Debug for AuthService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthService")
            .field("guard", &self.guard)
            .finish()
    }
}

impl AuthService {
    pub fn new(api: Arc<dyn AuthApi>, guard: Arc<SessionGuard>) -> Self {
        Self { api, guard }
    }

    /// Exchanges email and password for a session and makes it current.
    ///
    /// # Errors
    ///
    /// - [`ReviewSyncError::InvalidCredential`] for rejected credentials or
    ///   an unusable token in the response
    /// - transport and backend errors as returned by the backend
    pub async fn login(&self, email: &str, password: &str, remember_me: bool) -> Result<UserProfile> {
        let request = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
            remember_me,
        };
        let response = self.api.issue_session(&request).await.map_err(|e| match e {
            ReviewSyncError::Unauthorized(message) => ReviewSyncError::InvalidCredential(message),
            other => other,
        })?;

        let session = self.guard.establish(&response.token, remember_me)?;
        if session.subject.id != response.user.id {
            tracing::warn!(
                token_subject = %session.subject.id,
                profile = %response.user.id,
                "Login profile does not match credential subject"
            );
        }
        Ok(response.user)
    }

    /// Asks the backend to send a reset email. Session state is untouched.
    pub async fn request_password_reset(&self, email: &str) -> Result<ResetTicket> {
        self.api.issue_session_reset(email).await
    }

    /// Ends the current session.
    ///
    /// Server-side revocation is best effort; local state is always cleared.
    pub async fn logout(&self) -> Result<()> {
        if let Some(session) = self.guard.current_session() {
            if let Err(e) = self.api.terminate_session(&session.credential).await {
                tracing::warn!(error = %e, "Server-side logout failed");
            }
        }
        self.guard.terminate()
    }

    pub fn guard(&self) -> &Arc<SessionGuard> {
        &self.guard
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::LoginResponse;
    use crate::session::{MemoryTokenStore, Role, SessionEvent, SessionState, TokenStore};
    use crate::test_utils::{ManualClock, RecordingNavigator};
    use async_trait::async_trait;
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
    use chrono::{DateTime, Utc};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeAuth {
        login: Mutex<Option<Result<LoginResponse>>>,
        logout_fails: bool,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl AuthApi for FakeAuth {
        async fn issue_session(&self, request: &LoginRequest) -> Result<LoginResponse> {
            self.calls.lock().unwrap().push(format!("login:{}", request.email));
            self.login
                .lock()
                .unwrap()
                .take()
                .unwrap_or_else(|| Err(ReviewSyncError::Transport("unscripted".into())))
        }

        async fn issue_session_reset(&self, email: &str) -> Result<ResetTicket> {
            self.calls.lock().unwrap().push(format!("reset:{}", email));
            Ok(ResetTicket {
                message: "sent".to_string(),
            })
        }

        async fn terminate_session(&self, _credential: &str) -> Result<()> {
            self.calls.lock().unwrap().push("logout".to_string());
            if self.logout_fails {
                return Err(ReviewSyncError::Transport("offline".into()));
            }
            Ok(())
        }
    }

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_800_000_000, 0).unwrap()
    }

    fn token(sub: &str, exp: i64) -> String {
        let payload = serde_json::json!({"sub": sub, "exp": exp, "role": "user"});
        format!("h.{}.s", URL_SAFE_NO_PAD.encode(payload.to_string()))
    }

    fn profile(id: &str) -> UserProfile {
        UserProfile {
            id: id.to_string(),
            name: "Ada".to_string(),
            email: "ada@example.com".to_string(),
            avatar: None,
            role: Role::User,
        }
    }

    fn service(api: FakeAuth) -> (AuthService, Arc<MemoryTokenStore>, Arc<RecordingNavigator>) {
        let store = Arc::new(MemoryTokenStore::new());
        let navigator = Arc::new(RecordingNavigator::new());
        let guard = Arc::new(SessionGuard::with_clock(
            store.clone(),
            navigator.clone(),
            Arc::new(ManualClock::new(now())),
            "/login",
        ));
        (AuthService::new(Arc::new(api), guard), store, navigator)
    }

    #[tokio::test]
    async fn test_login_establishes_session() {
        let api = FakeAuth::default();
        *api.login.lock().unwrap() = Some(Ok(LoginResponse {
            token: token("u1", now().timestamp() + 3600),
            user: profile("u1"),
        }));
        let (auth, store, _) = service(api);

        let user = auth.login("ada@example.com", "pw", true).await.unwrap();

        assert_eq!(user.id, "u1");
        assert_eq!(auth.guard().state(), SessionState::Valid);
        assert!(store.load().unwrap().unwrap().remember_me);
    }

    #[tokio::test]
    async fn test_login_rejection_maps_to_invalid_credential() {
        let api = FakeAuth::default();
        *api.login.lock().unwrap() = Some(Err(ReviewSyncError::Unauthorized(
            "bad password".into(),
        )));
        let (auth, store, _) = service(api);

        let err = auth.login("ada@example.com", "nope", false).await.unwrap_err();

        assert!(matches!(err, ReviewSyncError::InvalidCredential(_)));
        assert!(store.load().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_login_with_expired_token_stores_nothing() {
        let api = FakeAuth::default();
        *api.login.lock().unwrap() = Some(Ok(LoginResponse {
            token: token("u1", now().timestamp() - 1),
            user: profile("u1"),
        }));
        let (auth, store, _) = service(api);

        assert!(auth.login("ada@example.com", "pw", false).await.is_err());
        assert!(store.load().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_logout_clears_even_when_backend_fails() {
        let api = FakeAuth {
            logout_fails: true,
            ..FakeAuth::default()
        };
        let (auth, store, navigator) = service(api);
        auth.guard()
            .establish(&token("u1", now().timestamp() + 60), false)
            .unwrap();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let _sub = auth
            .guard()
            .subscribe(move |e| sink.lock().unwrap().push(e.clone()));

        auth.logout().await.unwrap();

        assert!(store.load().unwrap().is_none());
        assert_eq!(events.lock().unwrap().as_slice(), &[SessionEvent::Terminated]);
        assert_eq!(navigator.count(), 0);
    }

    #[tokio::test]
    async fn test_password_reset_leaves_session_alone() {
        let (auth, store, _) = service(FakeAuth::default());

        let ticket = auth.request_password_reset("ada@example.com").await.unwrap();

        assert_eq!(ticket.message, "sent");
        assert!(store.load().unwrap().is_none());
    }
}
