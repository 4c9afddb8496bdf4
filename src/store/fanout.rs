// Listener registry — delivers committed writes to live queries.
//
// Shared by both backends. A backend applies a batch, collects the
// before/after contents of every touched document into a ChangeSet, and
// dispatches it while still holding its own write lock, so a listener never
// sees a torn batch and a subscribe racing a commit never double-counts.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use futures::channel::mpsc;
use tracing::debug;

use super::error::StoreError;
use super::models::{ChangeBatch, ChangeKind, Document, DocumentChange};
use super::query::Query;
use super::traits::{ChangeEvent, ChangeStream};

/// Before/after contents of every document touched by one batch.
#[derive(Debug, Default)]
pub(crate) struct ChangeSet {
    order: Vec<(String, String)>,
    entries: HashMap<(String, String), (Option<Document>, Option<Document>)>,
}

impl ChangeSet {
    /// Record a write. The first `before` seen for a key wins; the latest
    /// `after` wins, so several writes to one document collapse into one change.
    pub fn record(
        &mut self,
        key: (String, String),
        before: Option<Document>,
        after: Option<Document>,
    ) {
        match self.entries.get_mut(&key) {
            Some(entry) => entry.1 = after,
            None => {
                self.order.push(key.clone());
                self.entries.insert(key, (before, after));
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    fn pairs(&self) -> impl Iterator<Item = &(Option<Document>, Option<Document>)> {
        self.order.iter().filter_map(|key| self.entries.get(key))
    }
}

struct Listener {
    query: Query,
    tx: mpsc::UnboundedSender<ChangeEvent>,
}

#[derive(Default)]
struct RegistryInner {
    next_id: u64,
    listeners: HashMap<u64, Listener>,
}

#[derive(Clone, Default)]
pub(crate) struct ListenerRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

fn lock(inner: &Mutex<RegistryInner>) -> MutexGuard<'_, RegistryInner> {
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ListenerRegistry {
    /// Register a live query whose initial snapshot is `snapshot`.
    pub fn register(&self, query: Query, snapshot: Vec<Document>) -> ChangeStream {
        let (tx, rx) = mpsc::unbounded();
        // Queued before the listener becomes visible, so it is always first.
        let _ = tx.unbounded_send(Ok(ChangeBatch::initial(snapshot)));

        let id = {
            let mut inner = lock(&self.inner);
            let id = inner.next_id;
            inner.next_id += 1;
            debug!(listener = id, collection = %query.collection, "Listener registered");
            inner.listeners.insert(id, Listener { query, tx });
            id
        };

        let registry: Weak<Mutex<RegistryInner>> = Arc::downgrade(&self.inner);
        ChangeStream::new(rx, move || {
            if let Some(inner) = registry.upgrade() {
                if lock(&inner).listeners.remove(&id).is_some() {
                    debug!(listener = id, "Listener released");
                }
            }
        })
    }

    /// Deliver one committed batch to every listener it affects.
    pub fn dispatch(&self, changes: &ChangeSet) {
        let mut inner = lock(&self.inner);
        let mut closed = Vec::new();

        for (id, listener) in &inner.listeners {
            let batch: Vec<DocumentChange> = changes
                .pairs()
                .filter_map(|(before, after)| diff(&listener.query, before.as_ref(), after.as_ref()))
                .collect();
            if batch.is_empty() {
                continue;
            }
            if listener
                .tx
                .unbounded_send(Ok(ChangeBatch::incremental(batch)))
                .is_err()
            {
                closed.push(*id);
            }
        }

        for id in closed {
            inner.listeners.remove(&id);
        }
    }

    /// Push an error into every live query on `collection` and close them,
    /// as a backend does when a listener breaks.
    pub fn break_listeners(&self, collection: &str, error: StoreError) -> usize {
        let mut inner = lock(&self.inner);
        let ids: Vec<u64> = inner
            .listeners
            .iter()
            .filter(|(_, l)| l.query.collection == collection)
            .map(|(id, _)| *id)
            .collect();
        for id in &ids {
            if let Some(listener) = inner.listeners.remove(id) {
                let _ = listener.tx.unbounded_send(Err(error.clone()));
            }
        }
        ids.len()
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).listeners.len()
    }

    /// Live queries currently open on `collection`.
    pub fn count_for(&self, collection: &str) -> usize {
        lock(&self.inner)
            .listeners
            .values()
            .filter(|l| l.query.collection == collection)
            .count()
    }
}

fn diff(query: &Query, before: Option<&Document>, after: Option<&Document>) -> Option<DocumentChange> {
    let was = before.filter(|d| query.matches(d));
    let is = after.filter(|d| query.matches(d));
    match (was, is) {
        (None, Some(doc)) => Some(DocumentChange {
            kind: ChangeKind::Added,
            document: doc.clone(),
        }),
        (Some(old), Some(doc)) if old != doc => Some(DocumentChange {
            kind: ChangeKind::Modified,
            document: doc.clone(),
        }),
        (Some(old), None) => Some(DocumentChange {
            kind: ChangeKind::Removed,
            document: old.clone(),
        }),
        _ => None,
    }
}
