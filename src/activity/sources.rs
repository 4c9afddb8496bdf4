// Per-source state and summary derivation.
//
// Each source keeps the latest known contents of its live query. The summary
// is recomputed from all three every time, never patched incrementally, so a
// count can't drift from the records it was derived from. Nothing in this
// module is async; the aggregator serializes access to it.

use std::collections::{HashMap, HashSet};

use tracing::warn;

use super::models::{
    ActivitySummary, FollowerHandle, MessagePreview, PostPreview, SourceHealth, SourceKind, UserId,
};
use super::records::{decode_follower, decode_post, ConversationRecord};
use crate::store::{ChangeBatch, ChangeKind, Document};

/// Conversations the user takes part in, keyed by conversation id.
#[derive(Debug, Default)]
pub struct MessagesState {
    conversations: HashMap<String, ConversationRecord>,
}

impl MessagesState {
    pub fn apply(&mut self, batch: &ChangeBatch) {
        if batch.is_initial_snapshot {
            // A fresh snapshot (first subscribe or resubscribe) is the whole truth.
            self.conversations.clear();
        }
        for change in &batch.changes {
            match change.kind {
                ChangeKind::Added | ChangeKind::Modified => {
                    match ConversationRecord::from_document(&change.document) {
                        Ok(conv) => {
                            self.conversations.insert(conv.id.clone(), conv);
                        }
                        Err(e) => {
                            warn!(document = %change.document.path(), error = %e, "Skipping malformed conversation");
                        }
                    }
                }
                ChangeKind::Removed => {
                    self.conversations.remove(&change.document.id);
                }
            }
        }
    }

    /// Unread count plus previews, newest first.
    pub fn unread(&self, user: &UserId) -> (u64, Vec<MessagePreview>) {
        let mut previews: Vec<MessagePreview> = self
            .conversations
            .values()
            .flat_map(|conv| {
                conv.unread_for(user).map(move |m| MessagePreview {
                    conversation_id: conv.id.clone(),
                    participants: conv.participants.clone(),
                    sender_id: m.sender_id.clone(),
                    content: m.text.clone(),
                    sent_at: m.sent_at,
                })
            })
            .collect();
        previews.sort_by(|a, b| {
            b.sent_at
                .cmp(&a.sent_at)
                .then_with(|| a.conversation_id.cmp(&b.conversation_id))
        });
        (previews.len() as u64, previews)
    }

    pub fn conversation_count(&self) -> usize {
        self.conversations.len()
    }
}

/// Tracks which records of a live query are "new": inserted after the
/// subscription's initial snapshot.
///
/// The baseline is taken from the first snapshot only. If the query is
/// re-established after a failure, its snapshot is diffed against what was
/// already known, so records that appeared during the outage count as new
/// and records from the original baseline never do.
#[derive(Debug)]
pub struct NoveltyTracker<T> {
    baseline_taken: bool,
    known: HashMap<String, T>,
    fresh: HashSet<String>,
}

impl<T> Default for NoveltyTracker<T> {
    fn default() -> Self {
        Self {
            baseline_taken: false,
            known: HashMap::new(),
            fresh: HashSet::new(),
        }
    }
}

impl<T: Clone> NoveltyTracker<T> {
    pub fn apply<F, E>(&mut self, batch: &ChangeBatch, decode: F)
    where
        F: Fn(&Document) -> Result<T, E>,
        E: std::fmt::Display,
    {
        let decode_logged = |doc: &Document| match decode(doc) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(document = %doc.path(), error = %e, "Skipping malformed record");
                None
            }
        };

        if batch.is_initial_snapshot {
            let mut present = HashSet::new();
            for change in &batch.changes {
                let id = change.document.id.clone();
                present.insert(id.clone());
                if self.baseline_taken && !self.known.contains_key(&id) {
                    self.fresh.insert(id.clone());
                }
                if let Some(value) = decode_logged(&change.document) {
                    self.known.insert(id, value);
                }
            }
            self.known.retain(|id, _| present.contains(id));
            self.fresh.retain(|id| present.contains(id));
            self.baseline_taken = true;
            return;
        }

        for change in &batch.changes {
            let id = &change.document.id;
            match change.kind {
                ChangeKind::Added => {
                    if !self.known.contains_key(id) {
                        self.fresh.insert(id.clone());
                    }
                    if let Some(value) = decode_logged(&change.document) {
                        self.known.insert(id.clone(), value);
                    }
                }
                ChangeKind::Modified => {
                    // A modification never makes a record new.
                    if let Some(value) = decode_logged(&change.document) {
                        self.known.insert(id.clone(), value);
                    }
                }
                ChangeKind::Removed => {
                    self.known.remove(id);
                    self.fresh.remove(id);
                }
            }
        }
    }

    /// The new records that decoded successfully.
    pub fn fresh(&self) -> impl Iterator<Item = &T> {
        self.fresh.iter().filter_map(|id| self.known.get(id))
    }

    pub fn known_count(&self) -> usize {
        self.known.len()
    }
}

/// Everything the aggregator knows, across all three sources.
#[derive(Debug, Default)]
pub struct SourceStates {
    pub messages: MessagesState,
    pub followers: NoveltyTracker<FollowerHandle>,
    pub posts: NoveltyTracker<PostPreview>,
    pub health: SourceHealth,
}

impl SourceStates {
    pub fn apply(&mut self, kind: SourceKind, batch: &ChangeBatch) {
        match kind {
            SourceKind::Messages => self.messages.apply(batch),
            SourceKind::Followers => self.followers.apply(batch, decode_follower),
            SourceKind::Posts => self.posts.apply(batch, decode_post),
        }
    }

    /// Build a complete summary from current state.
    pub fn summarize(&self, user: &UserId, preview_limit: usize, sequence: u64) -> ActivitySummary {
        let (unread_message_count, mut unread_messages) = self.messages.unread(user);
        unread_messages.truncate(preview_limit);

        let mut new_followers: Vec<FollowerHandle> = self.followers.fresh().cloned().collect();
        new_followers.sort_by(|a, b| {
            b.followed_at
                .cmp(&a.followed_at)
                .then_with(|| a.follower_id.cmp(&b.follower_id))
        });

        let mut new_posts: Vec<PostPreview> = self.posts.fresh().cloned().collect();
        new_posts.sort_by(|a, b| {
            b.posted_at
                .cmp(&a.posted_at)
                .then_with(|| a.post_id.cmp(&b.post_id))
        });

        ActivitySummary {
            user_id: Some(user.clone()),
            sequence,
            unread_message_count,
            unread_messages,
            new_followers,
            new_posts,
            health: self.health.clone(),
        }
    }
}
