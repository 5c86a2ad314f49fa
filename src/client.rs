//! Process-wide wiring
//!
//! Builds the shared pieces once from [`Config`]: one HTTP backend, one
//! session guard over the configured credential store, and one live channel
//! that every [`FeedbackCoordinator`] multiplexes.

use std::sync::Arc;

use crate::api::HttpBackend;
use crate::config::Config;
use crate::coordinator::FeedbackCoordinator;
use crate::error::Result;
use crate::feedback::FeedbackStore;
use crate::live::{BackoffPolicy, LiveChannel, SseEventSource};
use crate::session::{open_token_store, AuthService, Navigator, SessionGuard};

/// Shared handles for one running client.
#[derive(Debug)]
pub struct ReviewSyncClient {
    config: Config,
    backend: Arc<HttpBackend>,
    guard: Arc<SessionGuard>,
    live: Arc<LiveChannel>,
}

impl ReviewSyncClient {
    /// Wires the client. Nothing connects until a view is activated.
    ///
    /// # Errors
    ///
    /// Returns [`crate::ReviewSyncError::Config`] for invalid URLs and
    /// storage errors when the credential store cannot be opened.
    pub fn from_config(config: Config, navigator: Arc<dyn Navigator>) -> Result<Self> {
        let backend = Arc::new(HttpBackend::new(&config.api)?);
        let store = open_token_store(&config.session)?;
        let guard = Arc::new(SessionGuard::new(
            store,
            navigator,
            config.session.login_path.clone(),
        ));
        let source = Arc::new(SseEventSource::new(&config.live)?);
        let live = Arc::new(LiveChannel::new(
            source,
            BackoffPolicy::from_config(&config.live),
        ));

        tracing::info!(
            api = %config.api.base_url,
            live = %config.live.url,
            "Client initialized"
        );
        Ok(Self {
            config,
            backend,
            guard,
            live,
        })
    }

    /// A coordinator for a new view, with its own store.
    pub fn coordinator(&self) -> FeedbackCoordinator {
        let store = FeedbackStore::new(self.backend.clone(), self.config.api.mutation_timeout());
        FeedbackCoordinator::new(Arc::clone(&self.guard), store, Arc::clone(&self.live))
    }

    pub fn auth(&self) -> AuthService {
        AuthService::new(self.backend.clone(), Arc::clone(&self.guard))
    }

    pub fn guard(&self) -> &Arc<SessionGuard> {
        &self.guard
    }

    pub fn live(&self) -> &Arc<LiveChannel> {
        &self.live
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CredentialBackend;
    use crate::test_utils::RecordingNavigator;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.session.backend = CredentialBackend::File;
        config.session.storage_dir = Some(dir.path().to_path_buf());
        config
    }

    #[tokio::test]
    async fn test_coordinators_share_one_channel() {
        let dir = TempDir::new().unwrap();
        let client =
            ReviewSyncClient::from_config(config(&dir), Arc::new(RecordingNavigator::new()))
                .unwrap();

        let a = client.coordinator();
        let b = client.coordinator();

        assert!(Arc::ptr_eq(a.live(), b.live()));
        assert!(Arc::ptr_eq(a.guard(), client.guard()));
        assert!(!client.guard().is_valid());
    }

    #[test]
    fn test_bad_api_url_is_config_error() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        config.api.base_url = "not a url".to_string();

        let err = ReviewSyncClient::from_config(config, Arc::new(RecordingNavigator::new()))
            .unwrap_err();

        assert!(matches!(err, crate::ReviewSyncError::Config(_)));
    }
}
