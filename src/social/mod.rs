// Social actions — the writes the client performs against the store.
//
// These are what the activity aggregator reacts to: following someone
// creates a follower record, sending a message changes a conversation,
// opening a conversation moves its read watermark, publishing adds a post.

pub mod graph;
pub mod messaging;
pub mod posts;

use crate::activity::{InvalidUserId, UserId};
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum SocialError {
    #[error(transparent)]
    InvalidUserId(#[from] InvalidUserId),

    #[error("{0} cannot follow themselves")]
    SelfFollow(UserId),

    #[error("{0} cannot message themselves")]
    SelfMessage(UserId),

    #[error("message text is empty")]
    EmptyMessage,

    #[error("post content is empty")]
    EmptyPost,

    #[error("conversation {0} does not exist")]
    UnknownConversation(String),

    #[error("{user} is not a participant of conversation {conversation}")]
    NotParticipant { user: UserId, conversation: String },

    #[error("conversation {conversation} belongs to {found:?}, not {expected:?}")]
    ConversationMismatch {
        conversation: String,
        expected: Vec<UserId>,
        found: Vec<UserId>,
    },

    #[error("malformed {what}: {error}")]
    Malformed {
        what: String,
        #[source]
        error: serde_json::Error,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub use graph::{follow, following, is_following, profile, unfollow, Profile};
pub use messaging::{mark_read, send_message};
pub use posts::{delete_post, publish_post};
