// DocumentStore trait — backend-agnostic async interface to the remote
// document database.
//
// Implementors: MemoryStore (in-process, with fault injection for tests) and
// SqliteStore (documents persisted as JSON rows). Everything above this layer
// holds an `Arc<dyn DocumentStore>` and never knows which one it has.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{BoxStream, Stream, StreamExt};

use super::error::StoreError;
use super::models::{ChangeBatch, Document, WriteBatch};
use super::query::Query;

/// One item from a live query: a batch of changes, or a backend failure.
pub type ChangeEvent = Result<ChangeBatch, StoreError>;

/// A live query handle.
///
/// The listener behind it is released exactly once: when the stream is
/// dropped or `release` is called, whichever comes first. Holders never
/// unregister manually.
pub struct ChangeStream {
    inner: BoxStream<'static, ChangeEvent>,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl ChangeStream {
    pub fn new<S, F>(inner: S, release: F) -> Self
    where
        S: Stream<Item = ChangeEvent> + Send + 'static,
        F: FnOnce() + Send + 'static,
    {
        Self {
            inner: inner.boxed(),
            release: Some(Box::new(release)),
        }
    }

    /// Release the listener now.
    pub fn release(mut self) {
        self.run_release();
    }

    fn run_release(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Stream for ChangeStream {
    type Item = ChangeEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl Drop for ChangeStream {
    fn drop(&mut self) {
        self.run_release();
    }
}

impl std::fmt::Debug for ChangeStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeStream")
            .field("released", &self.release.is_none())
            .finish()
    }
}

/// Exponential backoff owned by the backend. Subscribers ask the store how
/// long to wait instead of carrying their own schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Give up after this many consecutive failures (None = never).
    pub max_attempts: Option<u32>,
}

impl RetryPolicy {
    pub fn new(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay,
            max_attempts: None,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Delay before retry number `attempt` (0-based), or None to stop retrying.
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        if self.max_attempts.is_some_and(|max| attempt >= max) {
            return None;
        }
        let factor = 2u32.saturating_pow(attempt.min(16));
        Some(self.initial_delay.saturating_mul(factor).min(self.max_delay))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(30))
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    // --- Reads ---

    /// Run a one-shot query.
    async fn get(&self, query: &Query) -> Result<Vec<Document>, StoreError>;

    /// Fetch a single document, if it exists.
    async fn get_document(&self, collection: &str, id: &str)
        -> Result<Option<Document>, StoreError>;

    // --- Live queries ---

    /// Open a live query. The first item is the initial snapshot batch.
    async fn subscribe(&self, query: Query) -> Result<ChangeStream, StoreError>;

    // --- Writes ---

    /// Apply every write in the batch atomically.
    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError>;

    // --- Retry policy ---

    /// How long a subscriber should wait before retrying after its
    /// `attempt`-th consecutive transient failure. None = stop retrying.
    fn retry_delay(&self, attempt: u32) -> Option<Duration> {
        RetryPolicy::default().delay(attempt)
    }
}
