// SqliteStore — DocumentStore backed by a local SQLite file.
//
// The Connection is wrapped in tokio::sync::Mutex because Connection is !Sync.
// Trait methods lock the mutex, do synchronous rusqlite work, and return.
// Commits dispatch to live queries before the lock is released, so
// listeners observe writes in commit order. Live queries only see writes
// made through this process's handle.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;
use tracing::debug;

use super::error::StoreError;
use super::fanout::{ChangeSet, ListenerRegistry};
use super::models::{Document, Fields, WriteBatch};
use super::query::Query;
use super::schema;
use super::traits::{ChangeStream, DocumentStore, RetryPolicy};

pub struct SqliteStore {
    conn: Mutex<Connection>,
    listeners: ListenerRegistry,
    retry: RetryPolicy,
}

impl SqliteStore {
    /// Open (or create) the database file and make sure the schema exists.
    pub fn initialize(db_path: &str) -> Result<Self, StoreError> {
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::storage(format!(
                        "failed to create directory for database {db_path}: {e}"
                    ))
                })?;
            }
        }

        let conn = Connection::open(db_path)?;
        // WAL for better concurrent read performance
        conn.pragma_update(None, "journal_mode", "WAL")?;
        schema::create_tables(&conn)?;
        Ok(Self::wrap(conn))
    }

    /// Open an existing database (fails if it doesn't exist yet).
    pub fn open(db_path: &str) -> Result<Self, StoreError> {
        if !Path::new(db_path).exists() {
            return Err(StoreError::not_found(format!(
                "database not found at {db_path}; run `visio init` first"
            )));
        }
        let conn = Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        schema::create_tables(&conn)?;
        Ok(Self::wrap(conn))
    }

    /// A throwaway in-memory database.
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        schema::create_tables(&conn)?;
        Ok(Self::wrap(conn))
    }

    fn wrap(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
            listeners: ListenerRegistry::default(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub async fn table_count(&self) -> Result<i64, StoreError> {
        let conn = self.conn.lock().await;
        schema::table_count(&conn)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

fn load_collection(conn: &Connection, query: &Query) -> Result<Vec<Document>, StoreError> {
    let mut stmt = conn.prepare("SELECT id, data FROM documents WHERE collection = ?1")?;
    let rows = stmt.query_map(params![query.collection], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;

    let mut docs = Vec::new();
    for row in rows {
        let (id, json) = row?;
        let data: Fields = serde_json::from_str(&json)?;
        let doc = Document::new(query.collection.clone(), id, data);
        if query.matches(&doc) {
            docs.push(doc);
        }
    }
    query.arrange(&mut docs);
    Ok(docs)
}

fn load_document(conn: &Connection, collection: &str, id: &str) -> Result<Option<Fields>, StoreError> {
    let json: Option<String> = conn
        .query_row(
            "SELECT data FROM documents WHERE collection = ?1 AND id = ?2",
            params![collection, id],
            |row| row.get(0),
        )
        .optional()?;
    match json {
        Some(json) => Ok(Some(serde_json::from_str(&json)?)),
        None => Ok(None),
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn get(&self, query: &Query) -> Result<Vec<Document>, StoreError> {
        query.validate()?;
        let conn = self.conn.lock().await;
        load_collection(&conn, query)
    }

    async fn get_document(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<Document>, StoreError> {
        let conn = self.conn.lock().await;
        Ok(load_document(&conn, collection, id)?.map(|data| Document::new(collection, id, data)))
    }

    async fn subscribe(&self, query: Query) -> Result<ChangeStream, StoreError> {
        query.validate_live()?;
        let conn = self.conn.lock().await;
        let snapshot = load_collection(&conn, &query)?;
        Ok(self.listeners.register(query, snapshot))
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let mut changes = ChangeSet::default();

        for condition in batch.preconditions() {
            let found = load_document(&tx, &condition.collection, &condition.id)?.is_some();
            condition.check(found)?;
        }

        for op in batch.ops() {
            let (collection, id) = op.target();
            if collection.is_empty() || id.is_empty() {
                // Dropping the transaction rolls it back.
                return Err(StoreError::invalid_query(
                    "write target needs a collection and an id",
                ));
            }
            let before = load_document(&tx, collection, id)?;
            let after = op.apply(before.clone());
            match &after {
                Some(data) => {
                    tx.execute(
                        "INSERT INTO documents (collection, id, data, updated_at)
                         VALUES (?1, ?2, ?3, datetime('now'))
                         ON CONFLICT(collection, id) DO UPDATE SET
                            data = ?3,
                            updated_at = datetime('now')",
                        params![collection, id, serde_json::to_string(data)?],
                    )?;
                }
                None => {
                    tx.execute(
                        "DELETE FROM documents WHERE collection = ?1 AND id = ?2",
                        params![collection, id],
                    )?;
                }
            }
            changes.record(
                (collection.to_string(), id.to_string()),
                before.map(|d| Document::new(collection, id, d)),
                after.map(|d| Document::new(collection, id, d)),
            );
        }

        tx.commit()?;
        debug!(writes = batch.len(), "Committed batch");

        if !changes.is_empty() {
            self.listeners.dispatch(&changes);
        }
        Ok(())
    }

    fn retry_delay(&self, attempt: u32) -> Option<Duration> {
        self.retry.delay(attempt)
    }
}
