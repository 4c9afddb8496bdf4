// Record decoding — typed views over raw store documents.
//
// Decoding is lenient: missing fields fall back to defaults so that a record
// written by an older client still counts. A document that cannot be decoded
// at all is reported as an error and skipped by the caller.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::models::{FollowerHandle, PostPreview, Timestamp, UserId};
use crate::store::Document;

/// One message inside a conversation document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub sender_id: UserId,
    #[serde(default)]
    pub text: String,
    pub sent_at: Timestamp,
}

#[derive(Debug, Default, Deserialize)]
struct ConversationFields {
    #[serde(default)]
    participants: Vec<UserId>,
    #[serde(default)]
    last_read: HashMap<UserId, Timestamp>,
    #[serde(default)]
    messages: Vec<MessageRecord>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConversationRecord {
    pub id: String,
    pub participants: Vec<UserId>,
    pub last_read: HashMap<UserId, Timestamp>,
    pub messages: Vec<MessageRecord>,
}

impl ConversationRecord {
    pub fn from_document(doc: &Document) -> Result<Self, serde_json::Error> {
        let fields: ConversationFields = serde_json::from_value(Value::Object(doc.data.clone()))?;
        Ok(Self {
            id: doc.id.clone(),
            participants: fields.participants,
            last_read: fields.last_read,
            messages: fields.messages,
        })
    }

    /// The user's read watermark; epoch zero if they never opened the conversation.
    pub fn watermark(&self, user: &UserId) -> Timestamp {
        self.last_read.get(user).copied().unwrap_or(Timestamp::EPOCH)
    }

    /// Messages addressed to `user` that arrived after their watermark.
    pub fn unread_for<'a>(&'a self, user: &'a UserId) -> impl Iterator<Item = &'a MessageRecord> + 'a {
        let watermark = self.watermark(user);
        self.messages
            .iter()
            .filter(move |m| m.sender_id != *user && m.sent_at > watermark)
    }
}

#[derive(Debug, Default, Deserialize)]
struct FollowFields {
    #[serde(default)]
    followed_at: Timestamp,
}

/// A follower relationship document. The document id is the follower's id.
pub fn decode_follower(doc: &Document) -> Result<FollowerHandle, serde_json::Error> {
    let fields: FollowFields = serde_json::from_value(Value::Object(doc.data.clone()))?;
    Ok(FollowerHandle {
        follower_id: UserId::new(doc.id.clone()),
        followed_at: fields.followed_at,
    })
}

#[derive(Debug, Deserialize)]
struct PostFields {
    author_id: UserId,
    #[serde(default)]
    content: String,
    #[serde(default)]
    posted_at: Timestamp,
}

pub fn decode_post(doc: &Document) -> Result<PostPreview, serde_json::Error> {
    let fields: PostFields = serde_json::from_value(Value::Object(doc.data.clone()))?;
    Ok(PostPreview {
        post_id: doc.id.clone(),
        author_id: fields.author_id,
        content: fields.content,
        posted_at: fields.posted_at,
    })
}
