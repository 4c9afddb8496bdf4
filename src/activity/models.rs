// Activity models — the summary handed to the presentation layer and the
// identifiers it is built from.
//
// Summaries are immutable snapshots: the aggregator builds a fresh one on
// every change and shares it behind an Arc.

use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use super::error::InvalidUserId;

/// Separators of the document layout: '.' in field paths, '/' in collection
/// paths, '_' between the two ids of a conversation.
pub const RESERVED_ID_CHARS: [char; 3] = ['.', '/', '_'];

/// An account identifier as issued by the authentication provider.
///
/// `new` and the `From` impls accept anything, since ids read back from
/// stored documents were validated when written. Ids coming from callers go
/// through `parse` or `validate` before they name a document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Construct a user id that is safe to use as a document key.
    pub fn parse(id: impl Into<String>) -> Result<Self, InvalidUserId> {
        let id = Self(id.into());
        id.validate()?;
        Ok(id)
    }

    pub fn validate(&self) -> Result<(), InvalidUserId> {
        if self.is_empty() {
            return Err(InvalidUserId::Empty);
        }
        match self.0.chars().find(|c| RESERVED_ID_CHARS.contains(c)) {
            Some(reserved) => Err(InvalidUserId::ReservedChar {
                id: self.0.clone(),
                reserved,
            }),
            None => Ok(()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for UserId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&UserId> for UserId {
    fn from(id: &UserId) -> Self {
        id.clone()
    }
}

/// Milliseconds since the Unix epoch. Stored in documents as a JSON integer.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Watermark used when a user has never read a conversation.
    pub const EPOCH: Timestamp = Timestamp(0);

    pub fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    pub fn as_millis(&self) -> i64 {
        self.0
    }

    pub fn now() -> Self {
        Self(Utc::now().timestamp_millis())
    }

    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        Self(at.timestamp_millis())
    }

    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.0).single()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_datetime() {
            Some(at) => write!(f, "{}", at.format("%Y-%m-%d %H:%M:%S")),
            None => write!(f, "{}ms", self.0),
        }
    }
}

/// The three activity feeds the aggregator watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Messages,
    Followers,
    Posts,
}

impl SourceKind {
    pub const ALL: [SourceKind; 3] = [SourceKind::Messages, SourceKind::Followers, SourceKind::Posts];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Messages => "messages",
            SourceKind::Followers => "followers",
            SourceKind::Posts => "posts",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health of one source, shown next to its (possibly stale) count.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SourceStatus {
    /// The aggregator is not started.
    #[default]
    Idle,
    /// Subscribing; no snapshot received yet.
    Connecting,
    /// Receiving updates.
    Live,
    /// Transient failure, retrying. The count shown is the last known value.
    Stale { reason: String },
    /// Hard failure (e.g. permission denied). Not retried.
    Failed { reason: String },
    /// A prerequisite read failed, so the stream could not be established.
    Unavailable { reason: String },
    /// Nothing to watch (posts when the user follows nobody).
    Inactive,
}

impl SourceStatus {
    /// The source is reporting something other than current data.
    pub fn is_degraded(&self) -> bool {
        matches!(
            self,
            SourceStatus::Stale { .. } | SourceStatus::Failed { .. } | SourceStatus::Unavailable { .. }
        )
    }

    /// The source has finished its first attempt to connect, one way or another.
    pub fn is_settled(&self) -> bool {
        !matches!(self, SourceStatus::Idle | SourceStatus::Connecting)
    }

    pub fn label(&self) -> &'static str {
        match self {
            SourceStatus::Idle => "idle",
            SourceStatus::Connecting => "connecting",
            SourceStatus::Live => "live",
            SourceStatus::Stale { .. } => "stale",
            SourceStatus::Failed { .. } => "failed",
            SourceStatus::Unavailable { .. } => "unavailable",
            SourceStatus::Inactive => "inactive",
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            SourceStatus::Stale { reason }
            | SourceStatus::Failed { reason }
            | SourceStatus::Unavailable { reason } => Some(reason),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceHealth {
    pub messages: SourceStatus,
    pub followers: SourceStatus,
    pub posts: SourceStatus,
}

impl SourceHealth {
    pub fn all(status: SourceStatus) -> Self {
        Self {
            messages: status.clone(),
            followers: status.clone(),
            posts: status,
        }
    }

    pub fn get(&self, kind: SourceKind) -> &SourceStatus {
        match kind {
            SourceKind::Messages => &self.messages,
            SourceKind::Followers => &self.followers,
            SourceKind::Posts => &self.posts,
        }
    }

    pub fn set(&mut self, kind: SourceKind, status: SourceStatus) {
        match kind {
            SourceKind::Messages => self.messages = status,
            SourceKind::Followers => self.followers = status,
            SourceKind::Posts => self.posts = status,
        }
    }

    pub fn is_settled(&self) -> bool {
        SourceKind::ALL.iter().all(|k| self.get(*k).is_settled())
    }

    pub fn is_degraded(&self) -> bool {
        SourceKind::ALL.iter().any(|k| self.get(*k).is_degraded())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePreview {
    pub conversation_id: String,
    pub participants: Vec<UserId>,
    pub sender_id: UserId,
    pub content: String,
    pub sent_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowerHandle {
    pub follower_id: UserId,
    pub followed_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostPreview {
    pub post_id: String,
    pub author_id: UserId,
    pub content: String,
    pub posted_at: Timestamp,
}

/// Unread activity for one user, derived from the three sources.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivitySummary {
    /// None while the aggregator is stopped.
    pub user_id: Option<UserId>,
    /// Increases by one with every publish while started; 0 when stopped.
    pub sequence: u64,
    /// Every unread message, even those not in `unread_messages`.
    pub unread_message_count: u64,
    /// The most recent unread messages, newest first.
    pub unread_messages: Vec<MessagePreview>,
    /// Followers gained since the subscription snapshot, newest first.
    pub new_followers: Vec<FollowerHandle>,
    /// Posts by followed accounts since the subscription snapshot, newest first.
    pub new_posts: Vec<PostPreview>,
    pub health: SourceHealth,
}

impl ActivitySummary {
    /// Always the sum of the three parts; never tracked separately.
    pub fn total_unread(&self) -> u64 {
        self.unread_message_count + self.new_followers.len() as u64 + self.new_posts.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.total_unread() == 0
    }

    pub fn has_follower(&self, id: &str) -> bool {
        self.new_followers.iter().any(|f| f.follower_id.as_str() == id)
    }
}
