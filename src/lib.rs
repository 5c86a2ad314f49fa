//! ReviewSync - client core for film and story reviews
//!
//! This library keeps a consistent local view of the reviews attached to a
//! movie or story while the user writes, edits and moderates them and while
//! other users' changes stream in over a live connection.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `session`: credential storage, session validity and login
//! - `live`: self-healing live event channel and its SSE transport
//! - `feedback`: entries, aggregate statistics and the optimistic store
//! - `coordinator`: per-view orchestration of session, store and channel
//! - `api`: backend contracts and the HTTP implementation
//! - `config`: configuration management and validation
//! - `error`: error types and result aliases
//! - `test_utils`: manual clock and recording navigator
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use reviewsync::{Config, ContentRef, Navigator, ReviewSyncClient};
//!
//! struct Router;
//!
//! impl Navigator for Router {
//!     fn redirect_to_login(&self, login_path: &str) {
//!         println!("-> {}", login_path);
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("reviewsync.yaml")?;
//!     config.validate()?;
//!
//!     let client = ReviewSyncClient::from_config(config, Arc::new(Router))?;
//!     let view = client.coordinator();
//!     view.activate(ContentRef::movie("dune-2"), 1, 10).await??;
//!     println!("{:?}", view.store().statistics());
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod feedback;
pub mod live;
pub mod logging;
pub mod pubsub;
pub mod session;
pub mod test_utils;

// Re-export commonly used types
pub use client::ReviewSyncClient;
pub use config::Config;
pub use coordinator::FeedbackCoordinator;
pub use error::{Result, ReviewSyncError};
pub use feedback::{
    AggregateStatistics, ContentRef, FeedbackEntry, FeedbackPatch, FeedbackStore, NewFeedback,
    Rating,
};
pub use live::{ConnectionState, LiveChannel};
pub use session::{Navigator, Session, SessionGuard};
