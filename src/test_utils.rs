//! Test utilities for ReviewSync
//!
//! Deterministic stand-ins for the [`Clock`] and [`Navigator`] seams of
//! [`SessionGuard`](crate::session::SessionGuard). Embedders without a
//! routing layer can also use [`RecordingNavigator`] and poll
//! [`RecordingNavigator::redirects`] themselves.

use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

use crate::session::{Clock, Navigator};

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Clock frozen at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|p| p.into_inner());
        *now = *now + by;
    }

    /// Jumps to `instant`.
    pub fn set(&self, instant: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|p| p.into_inner()) = instant;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Navigator that records redirects instead of performing them.
#[derive(Debug, Default)]
pub struct RecordingNavigator {
    redirects: Mutex<Vec<String>>,
}

impl RecordingNavigator {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Paths redirected to so far.
    pub fn redirects(&self) -> Vec<String> {
        self.redirects.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Number of redirects so far.
    pub fn count(&self) -> usize {
        self.redirects.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}

impl Navigator for RecordingNavigator {
    fn redirect_to_login(&self, login_path: &str) {
        tracing::info!(login_path, "Redirecting to login");
        self.redirects
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(login_path.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_moves_only_when_told() {
        let start = Utc::now();
        let clock = ManualClock::new(start);
        assert_eq!(clock.now(), start);
        clock.advance(Duration::seconds(30));
        assert_eq!(clock.now(), start + Duration::seconds(30));
    }

    #[test]
    fn test_recording_navigator_keeps_every_redirect() {
        let navigator = RecordingNavigator::new();
        navigator.redirect_to_login("/login");
        navigator.redirect_to_login("/login");
        assert_eq!(navigator.count(), 2);
        assert_eq!(navigator.redirects(), vec!["/login", "/login"]);
    }
}
