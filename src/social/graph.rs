// Follow graph — follow/unfollow with denormalized counters.
//
// A follow touches four documents: the follower record under the followed
// user, the following record under the follower, and both users' counters.
// They go out in one atomic batch so counters never disagree with records.
// The batch also carries a precondition on the following record, so two
// racing follows (or unfollows) can't both move the counters.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use super::SocialError;
use crate::activity::{Timestamp, UserId};
use crate::layout;
use crate::store::{fields, DocumentStore, StoreError, StoreErrorKind, WriteBatch};

/// Public profile of one user. Every field is optional in the stored
/// document; a field of the wrong type reads as absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub user_id: UserId,
    pub username: Option<String>,
    pub real_name: Option<String>,
    pub age: Option<i64>,
    pub height: Option<i64>,
    pub current_school: Option<String>,
    pub school_year: Option<String>,
    pub profile_picture_url: Option<String>,
    pub followers_count: i64,
    pub following_count: i64,
}

/// Field names of the user document.
mod profile_fields {
    pub const USERNAME: &str = "username";
    pub const REAL_NAME: &str = "realName";
    pub const AGE: &str = "age";
    pub const HEIGHT: &str = "height";
    pub const CURRENT_SCHOOL: &str = "currentSchool";
    pub const SCHOOL_YEAR: &str = "schoolYear";
    pub const PROFILE_PICTURE_URL: &str = "profilePictureURL";
}

/// Returns false if `follower` already follows `followed`.
pub async fn follow(
    store: &dyn DocumentStore,
    follower: &UserId,
    followed: &UserId,
    at: Timestamp,
) -> Result<bool, SocialError> {
    follower.validate()?;
    followed.validate()?;
    if follower == followed {
        return Err(SocialError::SelfFollow(follower.clone()));
    }

    let record = fields(json!({ "followed_at": at }));
    let batch = WriteBatch::new()
        .require_missing(layout::following_collection(follower), followed.as_str())
        .set(layout::followers_collection(followed), follower.as_str(), record.clone())
        .set(layout::following_collection(follower), followed.as_str(), record)
        .increment(layout::USERS, followed.as_str(), layout::FOLLOWERS_COUNT, 1)
        .increment(layout::USERS, follower.as_str(), layout::FOLLOWING_COUNT, 1);
    if !commit_unless_precondition_fails(store, batch).await? {
        return Ok(false);
    }

    info!(follower = %follower, followed = %followed, "Followed");
    Ok(true)
}

/// Returns false if `follower` was not following `followed`.
pub async fn unfollow(
    store: &dyn DocumentStore,
    follower: &UserId,
    followed: &UserId,
) -> Result<bool, SocialError> {
    follower.validate()?;
    followed.validate()?;

    let batch = WriteBatch::new()
        .require_exists(layout::following_collection(follower), followed.as_str())
        .delete(layout::followers_collection(followed), follower.as_str())
        .delete(layout::following_collection(follower), followed.as_str())
        .increment(layout::USERS, followed.as_str(), layout::FOLLOWERS_COUNT, -1)
        .increment(layout::USERS, follower.as_str(), layout::FOLLOWING_COUNT, -1);
    if !commit_unless_precondition_fails(store, batch).await? {
        return Ok(false);
    }

    info!(follower = %follower, followed = %followed, "Unfollowed");
    Ok(true)
}

/// False when the batch was refused because a precondition didn't hold.
async fn commit_unless_precondition_fails(
    store: &dyn DocumentStore,
    batch: WriteBatch,
) -> Result<bool, StoreError> {
    match store.commit(batch).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind == StoreErrorKind::FailedPrecondition => Ok(false),
        Err(e) => Err(e),
    }
}

pub async fn is_following(
    store: &dyn DocumentStore,
    follower: &UserId,
    followed: &UserId,
) -> Result<bool, SocialError> {
    let existing = store
        .get_document(&layout::following_collection(follower), followed.as_str())
        .await?;
    Ok(existing.is_some())
}

/// Everyone `user` follows, sorted by id.
pub async fn following(store: &dyn DocumentStore, user: &UserId) -> Result<Vec<UserId>, SocialError> {
    let docs = store.get(&layout::following_of(user)).await?;
    Ok(docs.into_iter().map(|doc| UserId::new(doc.id)).collect())
}

/// A missing user document reads as an empty profile.
pub async fn profile(store: &dyn DocumentStore, user: &UserId) -> Result<Profile, SocialError> {
    let doc = store.get_document(layout::USERS, user.as_str()).await?;
    let field = |name: &str| doc.as_ref().and_then(|d| d.get(name));
    let text = |name: &str| field(name).and_then(Value::as_str).map(String::from);
    let number = |name: &str| field(name).and_then(Value::as_i64);

    Ok(Profile {
        user_id: user.clone(),
        username: text(profile_fields::USERNAME),
        real_name: text(profile_fields::REAL_NAME),
        age: number(profile_fields::AGE),
        height: number(profile_fields::HEIGHT),
        current_school: text(profile_fields::CURRENT_SCHOOL),
        school_year: text(profile_fields::SCHOOL_YEAR),
        profile_picture_url: text(profile_fields::PROFILE_PICTURE_URL),
        followers_count: number(layout::FOLLOWERS_COUNT).unwrap_or(0),
        following_count: number(layout::FOLLOWING_COUNT).unwrap_or(0),
    })
}
