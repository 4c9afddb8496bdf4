// Posts — the feed items followers see.

use serde_json::json;
use tracing::info;

use super::SocialError;
use crate::activity::{Timestamp, UserId};
use crate::layout;
use crate::store::{fields, DocumentStore, WriteBatch};

/// Publish a post and return its id.
pub async fn publish_post(
    store: &dyn DocumentStore,
    author: &UserId,
    content: &str,
    at: Timestamp,
) -> Result<String, SocialError> {
    author.validate()?;
    let content = content.trim();
    if content.is_empty() {
        return Err(SocialError::EmptyPost);
    }

    let id = uuid::Uuid::new_v4().to_string();
    let mut data = fields(json!({ "content": content, "posted_at": at }));
    data.insert(layout::AUTHOR_ID.to_string(), json!(author));
    store
        .commit(WriteBatch::new().set(layout::POSTS, id.as_str(), data))
        .await?;

    info!(post = %id, author = %author, "Post published");
    Ok(id)
}

/// Returns false if the post did not exist.
pub async fn delete_post(store: &dyn DocumentStore, post_id: &str) -> Result<bool, SocialError> {
    if store.get_document(layout::POSTS, post_id).await?.is_none() {
        return Ok(false);
    }
    store
        .commit(WriteBatch::new().delete(layout::POSTS, post_id))
        .await?;
    info!(post = %post_id, "Post deleted");
    Ok(true)
}
