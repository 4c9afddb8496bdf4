// Direct messages — one conversation document per pair of users.

use serde_json::{json, Value};
use tracing::{debug, info};

use super::SocialError;
use crate::activity::records::{ConversationRecord, MessageRecord};
use crate::activity::{Timestamp, UserId};
use crate::layout;
use crate::store::{DocumentStore, WriteBatch};

/// Append a message to the conversation between `from` and `to`, creating it
/// if needed. Returns the conversation id.
///
/// An existing document under that id must belong to exactly this pair.
pub async fn send_message(
    store: &dyn DocumentStore,
    from: &UserId,
    to: &UserId,
    text: &str,
    at: Timestamp,
) -> Result<String, SocialError> {
    from.validate()?;
    to.validate()?;
    if from == to {
        return Err(SocialError::SelfMessage(from.clone()));
    }
    let text = text.trim();
    if text.is_empty() {
        return Err(SocialError::EmptyMessage);
    }

    let conversation = layout::conversation_id(from, to);
    let mut participants = vec![from.clone(), to.clone()];
    participants.sort();

    if let Some(existing) = load_conversation(store, &conversation).await? {
        let mut found = existing.participants;
        found.sort();
        if found != participants {
            return Err(SocialError::ConversationMismatch {
                conversation,
                expected: participants,
                found,
            });
        }
    }

    let message = MessageRecord {
        sender_id: from.clone(),
        text: text.to_string(),
        sent_at: at,
    };
    let message = serde_json::to_value(&message).map_err(|error| SocialError::Malformed {
        what: "message".to_string(),
        error,
    })?;

    let mut membership = serde_json::Map::new();
    membership.insert(layout::PARTICIPANTS.to_string(), json!(participants));

    let batch = WriteBatch::new()
        .merge(layout::CONVERSATIONS, conversation.as_str(), membership)
        .array_union(
            layout::CONVERSATIONS,
            conversation.as_str(),
            layout::MESSAGES,
            vec![message],
        );
    store.commit(batch).await?;

    info!(conversation = %conversation, from = %from, to = %to, "Message sent");
    Ok(conversation)
}

/// Move `user`'s read watermark in a conversation forward to `at`.
///
/// The watermark never moves backwards; returns false if it was already at
/// or past `at`.
pub async fn mark_read(
    store: &dyn DocumentStore,
    conversation: &str,
    user: &UserId,
    at: Timestamp,
) -> Result<bool, SocialError> {
    user.validate()?;
    let record = load_conversation(store, conversation)
        .await?
        .ok_or_else(|| SocialError::UnknownConversation(conversation.to_string()))?;

    if !record.participants.contains(user) {
        return Err(SocialError::NotParticipant {
            user: user.clone(),
            conversation: conversation.to_string(),
        });
    }
    if record.watermark(user) >= at {
        debug!(conversation, user = %user, "Watermark already past requested time");
        return Ok(false);
    }

    let mut update = serde_json::Map::new();
    update.insert(layout::last_read_field(user), Value::from(at.as_millis()));
    store
        .commit(WriteBatch::new().merge(layout::CONVERSATIONS, conversation, update))
        .await?;

    info!(conversation, user = %user, at = at.as_millis(), "Conversation marked read");
    Ok(true)
}

async fn load_conversation(
    store: &dyn DocumentStore,
    conversation: &str,
) -> Result<Option<ConversationRecord>, SocialError> {
    let Some(doc) = store.get_document(layout::CONVERSATIONS, conversation).await? else {
        return Ok(None);
    };
    ConversationRecord::from_document(&doc)
        .map(Some)
        .map_err(|error| SocialError::Malformed {
            what: format!("conversation {conversation}"),
            error,
        })
}
