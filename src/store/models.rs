// Document model — the records, change batches, and writes that flow through
// a DocumentStore.
//
// Documents are schemaless JSON objects addressed by (collection, id).
// Subcollections are plain collection strings such as "users/U1/followers".

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::StoreError;

/// The field map of a document.
pub type Fields = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub collection: String,
    pub id: String,
    pub data: Fields,
}

impl Document {
    pub fn new(collection: impl Into<String>, id: impl Into<String>, data: Fields) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
            data,
        }
    }

    /// Look up a field by dotted path ("last_read.U1").
    pub fn get(&self, path: &str) -> Option<&Value> {
        get_path(&self.data, path)
    }

    /// "collection/id", for logs.
    pub fn path(&self) -> String {
        format!("{}/{}", self.collection, self.id)
    }
}

/// How a record changed relative to a live query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// The record started matching the query (created, or edited into it).
    Added,
    /// The record still matches but its fields changed.
    Modified,
    /// The record stopped matching (deleted, or edited out of it).
    Removed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocumentChange {
    pub kind: ChangeKind,
    /// The new contents for Added/Modified, the last known contents for Removed.
    pub document: Document,
}

/// One delivery from a live query.
///
/// The first batch of every subscription is the initial snapshot: every
/// record that matched at subscribe time, tagged Added. Later batches only
/// carry records that changed after that boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeBatch {
    pub is_initial_snapshot: bool,
    pub changes: Vec<DocumentChange>,
}

impl ChangeBatch {
    pub fn initial(documents: Vec<Document>) -> Self {
        Self {
            is_initial_snapshot: true,
            changes: documents
                .into_iter()
                .map(|document| DocumentChange {
                    kind: ChangeKind::Added,
                    document,
                })
                .collect(),
        }
    }

    pub fn incremental(changes: Vec<DocumentChange>) -> Self {
        Self {
            is_initial_snapshot: false,
            changes,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// A single write inside an atomic batch.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Replace the document entirely (creating it if missing).
    Set {
        collection: String,
        id: String,
        data: Fields,
    },
    /// Set the given (possibly dotted) field paths, creating the document if missing.
    Merge {
        collection: String,
        id: String,
        data: Fields,
    },
    Delete {
        collection: String,
        id: String,
    },
    /// Add `by` to an integer field. A missing or non-integer field counts as 0.
    Increment {
        collection: String,
        id: String,
        field: String,
        by: i64,
    },
    /// Append each value to an array field unless an equal value is already present.
    ArrayUnion {
        collection: String,
        id: String,
        field: String,
        values: Vec<Value>,
    },
}

impl WriteOp {
    /// The (collection, id) this write targets.
    pub fn target(&self) -> (&str, &str) {
        match self {
            WriteOp::Set { collection, id, .. }
            | WriteOp::Merge { collection, id, .. }
            | WriteOp::Delete { collection, id }
            | WriteOp::Increment { collection, id, .. }
            | WriteOp::ArrayUnion { collection, id, .. } => (collection, id),
        }
    }

    /// Compute the document contents after this write. `None` means deleted.
    pub fn apply(&self, current: Option<Fields>) -> Option<Fields> {
        match self {
            WriteOp::Set { data, .. } => Some(data.clone()),
            WriteOp::Merge { data, .. } => {
                let mut fields = current.unwrap_or_default();
                for (path, value) in data {
                    set_path(&mut fields, path, value.clone());
                }
                Some(fields)
            }
            WriteOp::Delete { .. } => None,
            WriteOp::Increment { field, by, .. } => {
                let mut fields = current.unwrap_or_default();
                let base = get_path(&fields, field).and_then(Value::as_i64).unwrap_or(0);
                set_path(&mut fields, field, Value::from(base + by));
                Some(fields)
            }
            WriteOp::ArrayUnion { field, values, .. } => {
                let mut fields = current.unwrap_or_default();
                let mut items = match get_path(&fields, field) {
                    Some(Value::Array(items)) => items.clone(),
                    _ => Vec::new(),
                };
                for value in values {
                    if !items.contains(value) {
                        items.push(value.clone());
                    }
                }
                set_path(&mut fields, field, Value::Array(items));
                Some(fields)
            }
        }
    }
}

/// A condition on one document, checked under the backend's write lock
/// before any write in the batch is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Precondition {
    pub collection: String,
    pub id: String,
    /// Whether the document must exist (true) or be absent (false).
    pub exists: bool,
}

impl Precondition {
    /// Error describing why `found` violates this condition, if it does.
    pub fn check(&self, found: bool) -> Result<(), StoreError> {
        if found == self.exists {
            return Ok(());
        }
        let expected = if self.exists { "to exist" } else { "to be absent" };
        Err(StoreError::failed_precondition(format!(
            "expected {}/{} {expected}",
            self.collection, self.id
        )))
    }
}

/// An ordered list of writes committed atomically: either every write lands
/// and listeners see them together, or none do.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    preconditions: Vec<Precondition>,
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, collection: impl Into<String>, id: impl Into<String>, data: Fields) -> Self {
        self.ops.push(WriteOp::Set {
            collection: collection.into(),
            id: id.into(),
            data,
        });
        self
    }

    pub fn merge(
        mut self,
        collection: impl Into<String>,
        id: impl Into<String>,
        data: Fields,
    ) -> Self {
        self.ops.push(WriteOp::Merge {
            collection: collection.into(),
            id: id.into(),
            data,
        });
        self
    }

    pub fn delete(mut self, collection: impl Into<String>, id: impl Into<String>) -> Self {
        self.ops.push(WriteOp::Delete {
            collection: collection.into(),
            id: id.into(),
        });
        self
    }

    pub fn increment(
        mut self,
        collection: impl Into<String>,
        id: impl Into<String>,
        field: impl Into<String>,
        by: i64,
    ) -> Self {
        self.ops.push(WriteOp::Increment {
            collection: collection.into(),
            id: id.into(),
            field: field.into(),
            by,
        });
        self
    }

    pub fn array_union(
        mut self,
        collection: impl Into<String>,
        id: impl Into<String>,
        field: impl Into<String>,
        values: Vec<Value>,
    ) -> Self {
        self.ops.push(WriteOp::ArrayUnion {
            collection: collection.into(),
            id: id.into(),
            field: field.into(),
            values,
        });
        self
    }

    /// Fail the whole batch unless the document exists at commit time.
    pub fn require_exists(mut self, collection: impl Into<String>, id: impl Into<String>) -> Self {
        self.preconditions.push(Precondition {
            collection: collection.into(),
            id: id.into(),
            exists: true,
        });
        self
    }

    /// Fail the whole batch unless the document is absent at commit time.
    pub fn require_missing(mut self, collection: impl Into<String>, id: impl Into<String>) -> Self {
        self.preconditions.push(Precondition {
            collection: collection.into(),
            id: id.into(),
            exists: false,
        });
        self
    }

    pub fn preconditions(&self) -> &[Precondition] {
        &self.preconditions
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Build a `Fields` map from a `serde_json::json!` object literal.
/// Non-object values produce an empty map.
pub fn fields(value: Value) -> Fields {
    match value {
        Value::Object(map) => map,
        _ => Fields::new(),
    }
}

pub(crate) fn get_path<'a>(fields: &'a Fields, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = fields.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

pub(crate) fn set_path(fields: &mut Fields, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            fields.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let entry = fields
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Fields::new()));
            if !entry.is_object() {
                *entry = Value::Object(Fields::new());
            }
            if let Value::Object(child) = entry {
                set_path(child, rest, value);
            }
        }
    }
}
