//! Feedback entries, statistics and the optimistic store
//!
//! ```
//! use reviewsync::feedback::{AggregateStatistics, ContentRef, NewFeedback, Rating};
//!
//! let new = NewFeedback::new(ContentRef::movie("m1"), "Loved it", 5).unwrap();
//! assert_eq!(new.rating, Rating::new(5).unwrap());
//! assert_eq!(AggregateStatistics::default().mean, 0.0);
//! ```

pub mod mutation;
pub mod stats;
pub mod store;
pub mod types;

pub use mutation::{MutationId, MutationOp, MutationStatus, OptimisticMutation};
pub use stats::AggregateStatistics;
pub use store::{FeedbackStore, LoadOutcome, RemoteOutcome, StoreEvent};
pub use types::{
    Author, ContentKind, ContentRef, FeedbackEntry, FeedbackEvent, FeedbackEventKind,
    FeedbackPatch, Moderation, NewFeedback, Rating, RemoteFeedback,
};
