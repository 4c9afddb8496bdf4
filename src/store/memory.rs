// MemoryStore — in-process DocumentStore.
//
// Holds every collection in a HashMap behind a std Mutex (never held across
// an .await). Used by tests and by the CLI's `memory` backend. It can also
// misbehave on request: fail the next read or subscribe on a collection, or
// break every live query on it, which is how the aggregator's failure
// isolation is exercised.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use super::error::StoreError;
use super::fanout::{ChangeSet, ListenerRegistry};
use super::models::{Document, Fields, WriteBatch};
use super::query::Query;
use super::traits::{ChangeStream, DocumentStore, RetryPolicy};

#[derive(Default)]
struct MemoryState {
    collections: HashMap<String, BTreeMap<String, Fields>>,
    failing_gets: HashMap<String, VecDeque<StoreError>>,
    failing_subscribes: HashMap<String, VecDeque<StoreError>>,
}

impl MemoryState {
    fn matching(&self, query: &Query) -> Vec<Document> {
        let mut docs: Vec<Document> = self
            .collections
            .get(&query.collection)
            .into_iter()
            .flat_map(|docs| docs.iter())
            .map(|(id, data)| Document::new(query.collection.clone(), id.clone(), data.clone()))
            .filter(|doc| query.matches(doc))
            .collect();
        query.arrange(&mut docs);
        docs
    }

    fn take_fault(
        faults: &mut HashMap<String, VecDeque<StoreError>>,
        collection: &str,
    ) -> Option<StoreError> {
        faults.get_mut(collection).and_then(VecDeque::pop_front)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    listeners: ListenerRegistry,
    retry: RetryPolicy,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a custom backoff schedule (tests use millisecond delays).
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // --- Fault injection ---

    /// Make the next `get` on `collection` fail with `error`. Calls queue up.
    pub fn fail_next_get(&self, collection: &str, error: StoreError) {
        self.lock()
            .failing_gets
            .entry(collection.to_string())
            .or_default()
            .push_back(error);
    }

    /// Make the next `subscribe` on `collection` fail with `error`. Calls queue up.
    pub fn fail_next_subscribe(&self, collection: &str, error: StoreError) {
        self.lock()
            .failing_subscribes
            .entry(collection.to_string())
            .or_default()
            .push_back(error);
    }

    /// Deliver `error` to every live query on `collection` and close them.
    /// Returns how many listeners were broken.
    pub fn break_listeners(&self, collection: &str, error: StoreError) -> usize {
        let _state = self.lock();
        self.listeners.break_listeners(collection, error)
    }

    // --- Introspection ---

    /// Number of live queries currently registered.
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Number of live queries currently registered on `collection`.
    pub fn listeners_on(&self, collection: &str) -> usize {
        self.listeners.count_for(collection)
    }

    /// Total documents across all collections.
    pub fn document_count(&self) -> usize {
        self.lock().collections.values().map(BTreeMap::len).sum()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, query: &Query) -> Result<Vec<Document>, StoreError> {
        query.validate()?;
        let mut state = self.lock();
        if let Some(error) = MemoryState::take_fault(&mut state.failing_gets, &query.collection) {
            return Err(error);
        }
        Ok(state.matching(query))
    }

    async fn get_document(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<Document>, StoreError> {
        let mut state = self.lock();
        if let Some(error) = MemoryState::take_fault(&mut state.failing_gets, collection) {
            return Err(error);
        }
        Ok(state
            .collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|data| Document::new(collection, id, data.clone())))
    }

    async fn subscribe(&self, query: Query) -> Result<ChangeStream, StoreError> {
        query.validate_live()?;
        let mut state = self.lock();
        if let Some(error) =
            MemoryState::take_fault(&mut state.failing_subscribes, &query.collection)
        {
            return Err(error);
        }
        // Snapshot and registration happen under the same lock as commits.
        let snapshot = state.matching(&query);
        Ok(self.listeners.register(query, snapshot))
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let mut state = self.lock();
        let mut changes = ChangeSet::default();

        for op in batch.ops() {
            let (collection, id) = op.target();
            if collection.is_empty() || id.is_empty() {
                return Err(StoreError::invalid_query(
                    "write target needs a collection and an id",
                ));
            }
        }
        for condition in batch.preconditions() {
            let found = state
                .collections
                .get(&condition.collection)
                .is_some_and(|docs| docs.contains_key(&condition.id));
            condition.check(found)?;
        }

        for op in batch.ops() {
            let (collection, id) = op.target();
            let docs = state.collections.entry(collection.to_string()).or_default();
            let before = docs.get(id).cloned();
            let after = op.apply(before.clone());
            match &after {
                Some(data) => {
                    docs.insert(id.to_string(), data.clone());
                }
                None => {
                    docs.remove(id);
                }
            }
            changes.record(
                (collection.to_string(), id.to_string()),
                before.map(|d| Document::new(collection, id, d)),
                after.map(|d| Document::new(collection, id, d)),
            );
        }

        if !changes.is_empty() {
            self.listeners.dispatch(&changes);
        }
        Ok(())
    }

    fn retry_delay(&self, attempt: u32) -> Option<Duration> {
        self.retry.delay(attempt)
    }
}
