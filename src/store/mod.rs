// Document store layer — the remote database the client reads and listens to.
//
// The aggregator and the social actions only see the `DocumentStore` trait.
// Two backends implement it: an in-process map (tests, demos) and a SQLite
// file (the CLI's default, behind the `sqlite` feature).

pub mod error;
mod fanout;
pub mod memory;
pub mod models;
pub mod query;
#[cfg(feature = "sqlite")]
pub mod schema;
#[cfg(feature = "sqlite")]
pub mod sqlite;
pub mod traits;

pub use error::{StoreError, StoreErrorKind};
pub use memory::MemoryStore;
pub use models::{
    fields, ChangeBatch, ChangeKind, Document, DocumentChange, Fields, Precondition, WriteBatch,
    WriteOp,
};
pub use query::{Direction, Filter, Query};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
pub use traits::{ChangeEvent, ChangeStream, DocumentStore, RetryPolicy};
