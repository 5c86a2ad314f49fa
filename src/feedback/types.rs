//! Feedback domain types
//!
//! Wire names follow the backend's JSON (camelCase, `content` for the body
//! text, `rate` for the rating, exactly one of `movieId`/`storyId`).

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ReviewSyncError};
use crate::live::{EventKind, LiveEvent};

// ---------------------------------------------------------------------------
// Content references
// ---------------------------------------------------------------------------

/// The kind of content item feedback is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    /// A film
    Movie,
    /// A written story
    Story,
}

impl ContentKind {
    /// Name of the field carrying this kind's id on the wire.
    pub fn id_field(&self) -> &'static str {
        match self {
            ContentKind::Movie => "movieId",
            ContentKind::Story => "storyId",
        }
    }
}

/// Reference to exactly one content item.
///
/// On the wire it is flattened into its parent object as either `movieId`
/// or `storyId`; an object carrying both, or neither, is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "WireContentRef", into = "WireContentRef")]
pub struct ContentRef {
    /// Content item id
    pub id: String,
    /// Movie or story
    pub kind: ContentKind,
}

impl ContentRef {
    /// Reference to a movie.
    pub fn movie(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: ContentKind::Movie,
        }
    }

    /// Reference to a story.
    pub fn story(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: ContentKind::Story,
        }
    }
}

impl fmt::Display for ContentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ContentKind::Movie => write!(f, "movie:{}", self.id),
            ContentKind::Story => write!(f, "story:{}", self.id),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireContentRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    movie_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    story_id: Option<String>,
}

impl TryFrom<WireContentRef> for ContentRef {
    type Error = String;

    fn try_from(wire: WireContentRef) -> std::result::Result<Self, Self::Error> {
        match (wire.movie_id, wire.story_id) {
            (Some(id), None) => Ok(ContentRef::movie(id)),
            (None, Some(id)) => Ok(ContentRef::story(id)),
            (Some(_), Some(_)) => Err("feedback references both movieId and storyId".to_string()),
            (None, None) => Err("feedback must reference movieId or storyId".to_string()),
        }
    }
}

impl From<ContentRef> for WireContentRef {
    fn from(content: ContentRef) -> Self {
        match content.kind {
            ContentKind::Movie => WireContentRef {
                movie_id: Some(content.id),
                story_id: None,
            },
            ContentKind::Story => WireContentRef {
                movie_id: None,
                story_id: Some(content.id),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Rating
// ---------------------------------------------------------------------------

/// A star rating, always within 1..=5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Rating(u8);

impl Rating {
    /// Lowest allowed rating
    pub const MIN: u8 = 1;
    /// Highest allowed rating
    pub const MAX: u8 = 5;

    /// Builds a rating, rejecting values outside 1..=5.
    ///
    /// # Examples
    ///
    /// ```
    /// use reviewsync::feedback::Rating;
    ///
    /// assert_eq!(Rating::new(5).unwrap().value(), 5);
    /// assert!(Rating::new(0).is_err());
    /// assert!(Rating::new(6).is_err());
    /// ```
    pub fn new(value: u8) -> Result<Self> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Self(value))
        } else {
            Err(ReviewSyncError::InvalidFeedback(format!(
                "rating must be between {} and {}, got {}",
                Self::MIN,
                Self::MAX,
                value
            )))
        }
    }

    /// The numeric value.
    pub fn value(&self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for Rating {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        Rating::new(value).map_err(|e| e.to_string())
    }
}

impl From<Rating> for u8 {
    fn from(rating: Rating) -> Self {
        rating.0
    }
}

// ---------------------------------------------------------------------------
// Entries
// ---------------------------------------------------------------------------

/// Public identity of a feedback author.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Author {
    /// User id
    #[serde(alias = "_id")]
    pub id: String,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Avatar URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

/// Moderation metadata attached by a moderator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Moderation {
    /// Moderator user id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub moderated_by: Option<String>,
    /// Reason given for the decision
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// When the decision was taken
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub moderated_at: Option<DateTime<Utc>>,
}

fn default_visible() -> bool {
    true
}

/// A single review of a content item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackEntry {
    /// Server-assigned id (`tmp-…` while a create is pending)
    #[serde(alias = "_id")]
    pub id: String,
    /// Who wrote it
    #[serde(alias = "user")]
    pub author: Author,
    /// What it is about
    #[serde(flatten)]
    pub target: ContentRef,
    /// Body text
    #[serde(rename = "content")]
    pub body: String,
    /// Star rating
    #[serde(rename = "rate")]
    pub rating: Rating,
    /// Hidden entries are left out of listings and statistics
    #[serde(default = "default_visible", alias = "isVisible")]
    pub visible: bool,
    /// Moderation metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub moderation: Option<Moderation>,
    /// Number of helpful votes
    #[serde(default)]
    pub helpful_count: u32,
    /// Users who voted helpful
    #[serde(default)]
    pub helpful_voters: BTreeSet<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last modification time
    pub updated_at: DateTime<Utc>,
    /// Correlation id of the local create that produced this entry, echoed
    /// back by the backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_mutation_id: Option<String>,
}

impl FeedbackEntry {
    /// Returns `true` when `user_id` wrote this entry.
    pub fn is_authored_by(&self, user_id: &str) -> bool {
        self.author.id == user_id
    }

    /// Applies a local edit.
    pub fn apply_patch(&mut self, patch: &FeedbackPatch, now: DateTime<Utc>) {
        if let Some(body) = &patch.body {
            self.body = body.clone();
        }
        if let Some(rating) = patch.rating {
            self.rating = rating;
        }
        self.updated_at = now;
    }

    /// Flips `voter`'s helpful vote. Returns `true` if the vote was added.
    pub fn toggle_vote(&mut self, voter: &str) -> bool {
        if self.helpful_voters.remove(voter) {
            self.helpful_count = self.helpful_count.saturating_sub(1);
            false
        } else {
            self.helpful_voters.insert(voter.to_string());
            self.helpful_count += 1;
            true
        }
    }

    /// Overlays the fields present in a remote partial entry.
    pub fn merge_remote(&mut self, remote: &RemoteFeedback) {
        if let Some(author) = &remote.author {
            self.author = author.clone();
        }
        if let Some(body) = &remote.body {
            self.body = body.clone();
        }
        if let Some(rating) = remote.rating {
            self.rating = rating;
        }
        if let Some(visible) = remote.visible {
            self.visible = visible;
        }
        if remote.moderation.is_some() {
            self.moderation = remote.moderation.clone();
        }
        if let Some(count) = remote.helpful_count {
            self.helpful_count = count;
        }
        if let Some(voters) = &remote.helpful_voters {
            self.helpful_voters = voters.clone();
        }
        if let Some(updated_at) = remote.updated_at {
            self.updated_at = updated_at;
        }
    }
}

/// A full or partial entry as carried by a live event.
///
/// Only `id` and the content reference are mandatory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFeedback {
    /// Entry id
    #[serde(alias = "_id")]
    pub id: String,
    /// Content reference
    #[serde(flatten)]
    pub target: ContentRef,
    /// Author, when present
    #[serde(default, alias = "user")]
    pub author: Option<Author>,
    /// Body text, when present
    #[serde(default, rename = "content")]
    pub body: Option<String>,
    /// Rating, when present
    #[serde(default, rename = "rate")]
    pub rating: Option<Rating>,
    /// Visibility, when present
    #[serde(default, alias = "isVisible")]
    pub visible: Option<bool>,
    /// Moderation metadata, when present
    #[serde(default)]
    pub moderation: Option<Moderation>,
    /// Helpful vote count, when present
    #[serde(default)]
    pub helpful_count: Option<u32>,
    /// Helpful voters, when present
    #[serde(default)]
    pub helpful_voters: Option<BTreeSet<String>>,
    /// Creation time, when present
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    /// Modification time, when present
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    /// Echoed correlation id of a local create
    #[serde(default)]
    pub client_mutation_id: Option<String>,
}

impl RemoteFeedback {
    /// Builds a complete entry when author, body and rating are all present.
    ///
    /// Missing timestamps default to `now`.
    pub fn to_entry(&self, now: DateTime<Utc>) -> Option<FeedbackEntry> {
        let author = self.author.clone()?;
        let body = self.body.clone()?;
        let rating = self.rating?;
        let created_at = self.created_at.unwrap_or(now);
        Some(FeedbackEntry {
            id: self.id.clone(),
            author,
            target: self.target.clone(),
            body,
            rating,
            visible: self.visible.unwrap_or(true),
            moderation: self.moderation.clone(),
            helpful_count: self.helpful_count.unwrap_or(0),
            helpful_voters: self.helpful_voters.clone().unwrap_or_default(),
            created_at,
            updated_at: self.updated_at.unwrap_or(created_at),
            client_mutation_id: self.client_mutation_id.clone(),
        })
    }
}

/// Feedback live event kinds, a subset of [`EventKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackEventKind {
    /// `feedback:created`
    Created,
    /// `feedback:updated`
    Updated,
    /// `feedback:deleted`
    Deleted,
}

/// A decoded feedback event from the live channel.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedbackEvent {
    /// What happened
    pub kind: FeedbackEventKind,
    /// The entry it happened to
    pub payload: RemoteFeedback,
}

impl FeedbackEvent {
    /// Decodes a live channel event.
    ///
    /// # Errors
    ///
    /// Returns [`ReviewSyncError::Serialization`] when the payload is not a
    /// feedback entry.
    pub fn from_live(event: &LiveEvent) -> Result<Self> {
        let kind = match event.kind {
            EventKind::FeedbackCreated => FeedbackEventKind::Created,
            EventKind::FeedbackUpdated => FeedbackEventKind::Updated,
            EventKind::FeedbackDeleted => FeedbackEventKind::Deleted,
        };
        let payload = serde_json::from_value(event.data.clone())?;
        Ok(Self { kind, payload })
    }
}

// ---------------------------------------------------------------------------
// Mutation payloads
// ---------------------------------------------------------------------------

/// What a user submits when writing a review.
#[derive(Debug, Clone, PartialEq)]
pub struct NewFeedback {
    /// Content item being reviewed
    pub target: ContentRef,
    /// Body text
    pub body: String,
    /// Star rating
    pub rating: Rating,
}

impl NewFeedback {
    /// Builds a submission, validating the rating and body.
    ///
    /// # Examples
    ///
    /// ```
    /// use reviewsync::feedback::{ContentRef, NewFeedback};
    ///
    /// let new = NewFeedback::new(ContentRef::movie("dune-2"), "Great film", 5).unwrap();
    /// assert_eq!(new.rating.value(), 5);
    /// assert!(NewFeedback::new(ContentRef::movie("dune-2"), "  ", 5).is_err());
    /// ```
    pub fn new(target: ContentRef, body: impl Into<String>, rating: u8) -> Result<Self> {
        let new = Self {
            target,
            body: body.into(),
            rating: Rating::new(rating)?,
        };
        new.validate()?;
        Ok(new)
    }

    /// Checks the invariants a submission must satisfy.
    pub fn validate(&self) -> Result<()> {
        if self.body.trim().is_empty() {
            return Err(ReviewSyncError::InvalidFeedback(
                "feedback text cannot be empty".to_string(),
            ));
        }
        if self.target.id.trim().is_empty() {
            return Err(ReviewSyncError::InvalidFeedback(
                "content id cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Partial edit of an existing entry. Serialized as `{content?, rate?}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedbackPatch {
    /// New body text
    #[serde(rename = "content", default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// New rating
    #[serde(rename = "rate", default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<Rating>,
}

impl FeedbackPatch {
    /// Patch that only changes the rating.
    pub fn rating(rating: u8) -> Result<Self> {
        Ok(Self {
            body: None,
            rating: Some(Rating::new(rating)?),
        })
    }

    /// Patch that only changes the body text.
    pub fn body(body: impl Into<String>) -> Self {
        Self {
            body: Some(body.into()),
            rating: None,
        }
    }

    /// Rejects empty patches and blank bodies.
    pub fn validate(&self) -> Result<()> {
        if self.body.is_none() && self.rating.is_none() {
            return Err(ReviewSyncError::InvalidFeedback(
                "patch changes nothing".to_string(),
            ));
        }
        if matches!(&self.body, Some(body) if body.trim().is_empty()) {
            return Err(ReviewSyncError::InvalidFeedback(
                "feedback text cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}
