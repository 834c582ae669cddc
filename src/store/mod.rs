//! Execution Record Store
//!
//! The engine's only shared mutable resource. Records are JSON documents
//! grouped in four logical collections; execution records are keyed by a
//! store-assigned [`ExecutionId`], definitions are looked up by
//! (namespace, name, version).
//!
//! Every mutation is a single-record merge: fields in the update replace
//! the fields of the stored document, other fields are left alone. An
//! optional guard makes the merge conditional on the current contents.
//!
//! # Backends
//!
//! - [`MemoryStore`]: in-process, used by tests and the `memory` backend
//! - [`FileStore`]: one JSON file per record on disk
//!
//! Engine components do not use [`RecordStore`] directly; they go through
//! the typed [`Records`] facade.

pub mod file;
pub mod memory;
pub mod records;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use records::Records;

use std::fmt;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::id::ExecutionId;

/// A stored record.
pub type Document = Map<String, Value>;

/// Field holding the record identifier in returned documents.
pub const ID_FIELD: &str = "_id";

/// The logical collections of the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    ActionExecutions,
    WorkflowExecutions,
    ActionDefinitions,
    WorkflowDefinitions,
}

impl Collection {
    pub const ALL: [Collection; 4] = [
        Collection::ActionExecutions,
        Collection::WorkflowExecutions,
        Collection::ActionDefinitions,
        Collection::WorkflowDefinitions,
    ];

    /// Name of the collection in the document store.
    pub fn name(self) -> &'static str {
        match self {
            Self::ActionExecutions => "runnerExecution",
            Self::WorkflowExecutions => "workflowExecution",
            Self::ActionDefinitions => "actionDefinition",
            Self::WorkflowDefinitions => "workflowDefinition",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single condition on a document field.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Field is present and equal to the value.
    Eq(String, Value),
    /// Field is absent or not equal to any of the values.
    NotIn(String, Vec<Value>),
}

/// A conjunction of conditions. The empty filter matches every document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<Condition>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push(Condition::Eq(field.into(), value.into()));
        self
    }

    pub fn not_in<V: Into<Value>>(
        mut self,
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.conditions.push(Condition::NotIn(
            field.into(),
            values.into_iter().map(Into::into).collect(),
        ));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Checks the filter against a document.
    pub fn matches(&self, document: &Document) -> bool {
        self.conditions.iter().all(|condition| match condition {
            Condition::Eq(field, value) => document.get(field) == Some(value),
            Condition::NotIn(field, values) => match document.get(field) {
                Some(current) => !values.contains(current),
                None => true,
            },
        })
    }
}

/// Result of a guarded update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The fields were merged into the record.
    Applied,
    /// The record exists but did not match the guard; nothing was written.
    Skipped,
}

/// Errors raised by store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no record in '{collection}' matches {key}")]
    NotFound { collection: Collection, key: String },

    #[error("record {id} in '{collection}' is not a JSON object")]
    Corrupt { collection: Collection, id: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn not_found(collection: Collection, key: impl fmt::Display) -> Self {
        Self::NotFound {
            collection,
            key: key.to_string(),
        }
    }
}

/// Persistence operations required by the engine.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Fetches a record by identifier.
    async fn get_by_id(&self, collection: Collection, id: &ExecutionId)
        -> Result<Document, StoreError>;

    /// Fetches the first record matching the filter.
    async fn find_one(&self, collection: Collection, filter: &Filter)
        -> Result<Document, StoreError>;

    /// Inserts a record and returns its new identifier.
    async fn insert(&self, collection: Collection, document: Document)
        -> Result<ExecutionId, StoreError>;

    /// Inserts a record unless one already matches `existing`, checking and
    /// inserting atomically. Returns `None` when a match was found.
    async fn insert_unless_exists(
        &self,
        collection: Collection,
        existing: &Filter,
        document: Document,
    ) -> Result<Option<ExecutionId>, StoreError>;

    /// Merges `fields` into the record if it currently matches `guard`.
    async fn update_by_id_if(
        &self,
        collection: Collection,
        id: &ExecutionId,
        guard: &Filter,
        fields: Document,
    ) -> Result<UpdateOutcome, StoreError>;

    /// Merges `fields` into the record unconditionally.
    async fn update_by_id(
        &self,
        collection: Collection,
        id: &ExecutionId,
        fields: Document,
    ) -> Result<(), StoreError> {
        self.update_by_id_if(collection, id, &Filter::new(), fields)
            .await
            .map(|_| ())
    }
}

/// Merges `fields` into `target`, never touching the identifier.
pub(crate) fn merge_fields(target: &mut Document, fields: Document) {
    for (key, value) in fields {
        if key != ID_FIELD {
            target.insert(key, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_collection_names() {
        assert_eq!(Collection::ActionExecutions.name(), "runnerExecution");
        assert_eq!(Collection::WorkflowExecutions.name(), "workflowExecution");
        assert_eq!(Collection::ActionDefinitions.to_string(), "actionDefinition");
        assert_eq!(Collection::WorkflowDefinitions.to_string(), "workflowDefinition");
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        assert!(Filter::new().is_empty());
        assert!(Filter::new().matches(&Document::new()));
    }

    #[test]
    fn test_filter_eq() {
        let document = doc(json!({"namespace": "core", "version": 1}));

        assert!(Filter::new().eq("namespace", "core").eq("version", 1).matches(&document));
        assert!(!Filter::new().eq("namespace", "core").eq("version", 2).matches(&document));
        assert!(!Filter::new().eq("missing", "x").matches(&document));
    }

    #[test]
    fn test_filter_not_in() {
        let running = doc(json!({"status": "running"}));
        let done = doc(json!({"status": "success"}));
        let guard = Filter::new().not_in("status", ["success", "failed"]);

        assert!(guard.matches(&running));
        assert!(!guard.matches(&done));
        assert!(guard.matches(&Document::new()));
    }

    #[test]
    fn test_merge_fields_keeps_id() {
        let mut target = doc(json!({"_id": "a", "status": "submitted", "keep": true}));
        merge_fields(&mut target, doc(json!({"_id": "b", "status": "success"})));

        assert_eq!(target["_id"], json!("a"));
        assert_eq!(target["status"], json!("success"));
        assert_eq!(target["keep"], json!(true));
    }
}
