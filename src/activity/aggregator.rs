// ActivityAggregator — folds three live queries into one unread summary.
//
// Each source (messages, followers, posts) runs on its own tokio task and
// owns its ChangeStream. All three funnel into one gate: a tokio Mutex
// around "apply change, recompute, publish". Publishing is a watch-channel
// replace done while the gate is held, so observers only ever see whole
// summaries.
//
// Every start() bumps a generation number. A task from an older generation
// finds the gate's generation moved on and exits without publishing, and
// stop() aborts and awaits the tasks before clearing state. A stopped
// aggregator therefore never publishes again until the next start().

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::error::{AggregatorError, SourceError};
use super::models::{ActivitySummary, SourceHealth, SourceKind, SourceStatus, UserId};
use super::sources::SourceStates;
use crate::layout;
use crate::store::{ChangeBatch, ChangeStream, DocumentStore, StoreError};

/// Default number of message previews carried in a summary.
pub const DEFAULT_PREVIEW_LIMIT: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregatorConfig {
    /// Cap on `unread_messages`. The unread count itself is never capped.
    pub preview_limit: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            preview_limit: DEFAULT_PREVIEW_LIMIT,
        }
    }
}

/// State behind the recompute gate.
struct Gate {
    generation: u64,
    user: Option<UserId>,
    sequence: u64,
    states: SourceStates,
}

impl Gate {
    fn publish(&mut self, tx: &watch::Sender<Arc<ActivitySummary>>, preview_limit: usize) {
        let Some(user) = &self.user else {
            return;
        };
        self.sequence += 1;
        let summary = self.states.summarize(user, preview_limit, self.sequence);
        debug!(
            user = %user,
            sequence = summary.sequence,
            total = summary.total_unread(),
            "Publishing activity summary"
        );
        tx.send_replace(Arc::new(summary));
    }
}

struct Shared {
    gate: Mutex<Gate>,
    summary_tx: watch::Sender<Arc<ActivitySummary>>,
    preview_limit: usize,
}

/// Which user the aggregator serves, and the tasks serving them.
#[derive(Default)]
struct Lifecycle {
    user: Option<UserId>,
    tasks: Vec<(SourceKind, JoinHandle<()>)>,
}

pub struct ActivityAggregator {
    store: Arc<dyn DocumentStore>,
    shared: Arc<Shared>,
    lifecycle: Mutex<Lifecycle>,
}

impl ActivityAggregator {
    pub fn new(store: Arc<dyn DocumentStore>, config: AggregatorConfig) -> Self {
        let (summary_tx, _) = watch::channel(Arc::new(ActivitySummary::default()));
        Self {
            store,
            shared: Arc::new(Shared {
                gate: Mutex::new(Gate {
                    generation: 0,
                    user: None,
                    sequence: 0,
                    states: SourceStates::default(),
                }),
                summary_tx,
                preview_limit: config.preview_limit,
            }),
            lifecycle: Mutex::new(Lifecycle::default()),
        }
    }

    /// Start watching activity for `user_id`.
    ///
    /// A no-op if already started for the same user. Fails with
    /// `InvalidState` if started for someone else; call `stop()` first.
    pub async fn start(&self, user_id: impl Into<UserId>) -> Result<(), AggregatorError> {
        let user = user_id.into();
        if user.is_empty() {
            return Err(AggregatorError::EmptyUserId);
        }
        user.validate()?;

        let mut lifecycle = self.lifecycle.lock().await;
        match &lifecycle.user {
            Some(active) if *active == user => {
                debug!(user = %user, "Aggregator already started for this user");
                return Ok(());
            }
            Some(active) => {
                return Err(AggregatorError::InvalidState {
                    active: active.clone(),
                    requested: user,
                });
            }
            None => {}
        }

        // A previous session's tasks must be gone before new listeners open.
        release_tasks(&mut lifecycle.tasks).await;

        let generation = {
            let mut gate = self.shared.gate.lock().await;
            gate.generation += 1;
            gate.user = Some(user.clone());
            gate.sequence = 0;
            gate.states = SourceStates {
                health: SourceHealth::all(SourceStatus::Connecting),
                ..SourceStates::default()
            };
            gate.publish(&self.shared.summary_tx, self.shared.preview_limit);
            gate.generation
        };

        for kind in SourceKind::ALL {
            let worker = SourceWorker {
                kind,
                user: user.clone(),
                generation,
                store: self.store.clone(),
                shared: self.shared.clone(),
            };
            lifecycle.tasks.push((kind, tokio::spawn(worker.run())));
        }
        lifecycle.user = Some(user.clone());

        info!(user = %user, generation, "Activity aggregator started");
        Ok(())
    }

    /// Release every subscription and clear the summary. Safe to call at any time.
    pub async fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        let user = lifecycle.user.take();
        if user.is_none() && lifecycle.tasks.is_empty() {
            return;
        }

        release_tasks(&mut lifecycle.tasks).await;

        let mut gate = self.shared.gate.lock().await;
        gate.generation += 1;
        gate.user = None;
        gate.sequence = 0;
        gate.states = SourceStates::default();
        self.shared
            .summary_tx
            .send_replace(Arc::new(ActivitySummary::default()));

        if let Some(user) = user {
            info!(user = %user, "Activity aggregator stopped");
        }
    }

    /// The latest published summary (empty while stopped).
    pub fn current_summary(&self) -> Arc<ActivitySummary> {
        self.shared.summary_tx.borrow().clone()
    }

    /// Observe every publish. The receiver starts at the current summary.
    pub fn subscribe(&self) -> watch::Receiver<Arc<ActivitySummary>> {
        self.shared.summary_tx.subscribe()
    }

    /// Wait until every source has finished its first connection attempt.
    ///
    /// Returns immediately with the current summary if the aggregator is stopped.
    pub async fn settled(&self) -> Arc<ActivitySummary> {
        let mut rx = self.subscribe();
        let result = rx
            .wait_for(|s| s.user_id.is_none() || s.health.is_settled())
            .await
            .map(|s| Arc::clone(&*s));
        match result {
            Ok(summary) => summary,
            Err(_) => self.current_summary(),
        }
    }

    pub async fn active_user(&self) -> Option<UserId> {
        self.lifecycle.lock().await.user.clone()
    }
}

impl Drop for ActivityAggregator {
    fn drop(&mut self) {
        // No await here: aborted tasks drop their ChangeStreams as they unwind.
        for (_, handle) in self.lifecycle.get_mut().tasks.drain(..) {
            handle.abort();
        }
    }
}

/// Abort every source task and wait for it to finish unwinding, which drops
/// its ChangeStream and releases the listener.
async fn release_tasks(tasks: &mut Vec<(SourceKind, JoinHandle<()>)>) {
    for (kind, handle) in tasks.drain(..) {
        handle.abort();
        match handle.await {
            Ok(()) => debug!(source = %kind, "Source task had already finished"),
            Err(e) if e.is_cancelled() => debug!(source = %kind, "Source task cancelled"),
            Err(e) => warn!(source = %kind, error = %e, "Source task ended abnormally"),
        }
    }
}

/// One source's subscription loop.
struct SourceWorker {
    kind: SourceKind,
    user: UserId,
    generation: u64,
    store: Arc<dyn DocumentStore>,
    shared: Arc<Shared>,
}

/// Why a pass through the subscription loop ended.
enum Interrupted {
    /// Failed; may be retried.
    Failed(SourceError),
    /// This worker's generation is over.
    Superseded,
}

impl SourceWorker {
    async fn run(self) {
        let mut attempt: u32 = 0;
        // Point-in-time for the whole session once read successfully.
        let mut following: Option<Vec<UserId>> = None;

        loop {
            let stream = match self.establish(&mut following).await {
                Ok(Some(stream)) => stream,
                Ok(None) => {
                    info!(user = %self.user, source = %self.kind, "Nothing to watch");
                    self.set_status(SourceStatus::Inactive).await;
                    return;
                }
                Err(err) => match self.backoff(err, attempt).await {
                    Some(delay) => {
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }
                    None => return,
                },
            };

            let err = match self.pump(stream, &mut attempt).await {
                Interrupted::Superseded => return,
                Interrupted::Failed(err) => err,
            };
            // The broken stream was dropped inside pump(), so the retry below
            // never overlaps two listeners on this source.
            match self.backoff(err, attempt).await {
                Some(delay) => {
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                None => return,
            }
        }
    }

    /// Open this source's live query. `Ok(None)` means there is nothing to watch.
    async fn establish(
        &self,
        following: &mut Option<Vec<UserId>>,
    ) -> Result<Option<ChangeStream>, SourceError> {
        let query = match self.kind {
            SourceKind::Messages => layout::conversations_of(&self.user),
            SourceKind::Followers => layout::followers_of(&self.user),
            SourceKind::Posts => {
                if following.is_none() {
                    *following = Some(self.resolve_following().await?);
                }
                match following.as_deref() {
                    Some(authors) if !authors.is_empty() => layout::posts_by(authors),
                    _ => return Ok(None),
                }
            }
        };

        debug!(user = %self.user, source = %self.kind, collection = %query.collection, "Subscribing");
        self.store
            .subscribe(query)
            .await
            .map(Some)
            .map_err(|error| SourceError::SubscriptionFailure {
                source_kind: self.kind,
                error,
            })
    }

    /// The accounts the user follows, read once per session.
    async fn resolve_following(&self) -> Result<Vec<UserId>, SourceError> {
        let docs = self
            .store
            .get(&layout::following_of(&self.user))
            .await
            .map_err(|error| SourceError::DependencyUnavailable { error })?;
        // Following documents are keyed by the followed account's id.
        let authors: Vec<UserId> = docs.into_iter().map(|doc| UserId::new(doc.id)).collect();
        debug!(user = %self.user, following = authors.len(), "Resolved following list");
        Ok(authors)
    }

    /// Feed the stream into the gate until it fails or this worker is superseded.
    async fn pump(&self, mut stream: ChangeStream, attempt: &mut u32) -> Interrupted {
        while let Some(event) = stream.next().await {
            match event {
                Ok(batch) => {
                    if !self.apply(batch).await {
                        return Interrupted::Superseded;
                    }
                    *attempt = 0;
                }
                Err(error) => {
                    return Interrupted::Failed(SourceError::SubscriptionFailure {
                        source_kind: self.kind,
                        error,
                    });
                }
            }
        }
        Interrupted::Failed(SourceError::SubscriptionFailure {
            source_kind: self.kind,
            error: StoreError::unavailable("change stream closed by backend"),
        })
    }

    /// Decide whether to retry after `err`, recording the outcome in the summary.
    async fn backoff(&self, err: SourceError, attempt: u32) -> Option<Duration> {
        let delay = if err.is_transient() {
            self.store.retry_delay(attempt)
        } else {
            None
        };

        match delay {
            Some(delay) => warn!(
                user = %self.user,
                source = %self.kind,
                attempt,
                retry_in_ms = delay.as_millis() as u64,
                error = %err,
                "Source degraded, retrying"
            ),
            None => error!(
                user = %self.user,
                source = %self.kind,
                error = %err,
                "Source failed, giving up"
            ),
        }

        if !self.set_status(err.status(delay.is_some())).await {
            return None;
        }
        delay
    }

    /// Apply a batch, recompute, publish. False if this worker is superseded.
    async fn apply(&self, batch: ChangeBatch) -> bool {
        let mut gate = self.shared.gate.lock().await;
        if gate.generation != self.generation {
            return false;
        }
        gate.states.apply(self.kind, &batch);
        gate.states.health.set(self.kind, SourceStatus::Live);
        gate.publish(&self.shared.summary_tx, self.shared.preview_limit);
        true
    }

    /// Record a status change and publish. False if this worker is superseded.
    async fn set_status(&self, status: SourceStatus) -> bool {
        let mut gate = self.shared.gate.lock().await;
        if gate.generation != self.generation {
            return false;
        }
        gate.states.health.set(self.kind, status);
        gate.publish(&self.shared.summary_tx, self.shared.preview_limit);
        true
    }
}
