// Document layout — where each kind of record lives in the store.
//
// Shared by the social actions (writers) and the activity aggregator
// (reader), so both agree on collection names and field names.
//
//   conversations/{a_b}              participants, last_read.{uid}, messages[]
//   users/{uid}                      username, followers_count, following_count
//   users/{uid}/followers/{other}    followed_at
//   users/{uid}/following/{other}    followed_at
//   posts/{id}                       author_id, content, posted_at

use crate::activity::models::UserId;
use crate::store::Query;

pub const CONVERSATIONS: &str = "conversations";
pub const USERS: &str = "users";
pub const POSTS: &str = "posts";

pub const PARTICIPANTS: &str = "participants";
pub const MESSAGES: &str = "messages";
pub const LAST_READ: &str = "last_read";
pub const AUTHOR_ID: &str = "author_id";
pub const FOLLOWERS_COUNT: &str = "followers_count";
pub const FOLLOWING_COUNT: &str = "following_count";

pub fn followers_collection(user: &UserId) -> String {
    format!("{USERS}/{user}/followers")
}

pub fn following_collection(user: &UserId) -> String {
    format!("{USERS}/{user}/following")
}

/// Conversation ids are the two participant ids, sorted and joined by '_'.
pub fn conversation_id(a: &UserId, b: &UserId) -> String {
    if a <= b {
        format!("{a}_{b}")
    } else {
        format!("{b}_{a}")
    }
}

/// Field path of a user's read watermark inside a conversation document.
pub fn last_read_field(user: &UserId) -> String {
    format!("{LAST_READ}.{user}")
}

// --- Queries the aggregator subscribes to ---

pub fn conversations_of(user: &UserId) -> Query {
    Query::collection(CONVERSATIONS).array_contains(PARTICIPANTS, user.as_str())
}

pub fn followers_of(user: &UserId) -> Query {
    Query::collection(followers_collection(user))
}

pub fn following_of(user: &UserId) -> Query {
    Query::collection(following_collection(user))
}

pub fn posts_by(authors: &[UserId]) -> Query {
    Query::collection(POSTS).where_in(
        AUTHOR_ID,
        authors.iter().map(|a| a.as_str().into()).collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_id_is_order_independent() {
        let a = UserId::from("user1");
        let b = UserId::from("user2");
        assert_eq!(conversation_id(&a, &b), "user1_user2");
        assert_eq!(conversation_id(&b, &a), "user1_user2");
    }

    #[test]
    fn subcollection_paths() {
        let u = UserId::from("U1");
        assert_eq!(followers_collection(&u), "users/U1/followers");
        assert_eq!(following_collection(&u), "users/U1/following");
        assert_eq!(last_read_field(&u), "last_read.U1");
    }
}
