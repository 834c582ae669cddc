//! In-memory record store.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use super::{
    merge_fields, Collection, Document, Filter, RecordStore, StoreError, UpdateOutcome, ID_FIELD,
};
use crate::id::ExecutionId;

/// A [`RecordStore`] holding every collection in process memory.
///
/// Updates take the write lock for the duration of the merge, so each
/// record update is atomic with respect to concurrent readers and writers.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<Collection, BTreeMap<String, Document>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records in a collection.
    pub async fn len(&self, collection: Collection) -> usize {
        self.collections
            .read()
            .await
            .get(&collection)
            .map_or(0, BTreeMap::len)
    }

    /// True if a collection holds no records.
    pub async fn is_empty(&self, collection: Collection) -> bool {
        self.len(collection).await == 0
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn get_by_id(
        &self,
        collection: Collection,
        id: &ExecutionId,
    ) -> Result<Document, StoreError> {
        self.collections
            .read()
            .await
            .get(&collection)
            .and_then(|records| records.get(id.as_str()))
            .cloned()
            .ok_or_else(|| StoreError::not_found(collection, id))
    }

    async fn find_one(
        &self,
        collection: Collection,
        filter: &Filter,
    ) -> Result<Document, StoreError> {
        self.collections
            .read()
            .await
            .get(&collection)
            .and_then(|records| records.values().find(|doc| filter.matches(doc)))
            .cloned()
            .ok_or_else(|| StoreError::not_found(collection, format!("{:?}", filter)))
    }

    async fn insert(
        &self,
        collection: Collection,
        mut document: Document,
    ) -> Result<ExecutionId, StoreError> {
        let id = ExecutionId::generate();
        document.insert(ID_FIELD.to_string(), Value::String(id.to_string()));

        self.collections
            .write()
            .await
            .entry(collection)
            .or_default()
            .insert(id.to_string(), document);

        Ok(id)
    }

    async fn insert_unless_exists(
        &self,
        collection: Collection,
        existing: &Filter,
        mut document: Document,
    ) -> Result<Option<ExecutionId>, StoreError> {
        let mut collections = self.collections.write().await;
        let records = collections.entry(collection).or_default();
        if records.values().any(|doc| existing.matches(doc)) {
            return Ok(None);
        }

        let id = ExecutionId::generate();
        document.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
        records.insert(id.to_string(), document);
        Ok(Some(id))
    }

    async fn update_by_id_if(
        &self,
        collection: Collection,
        id: &ExecutionId,
        guard: &Filter,
        fields: Document,
    ) -> Result<UpdateOutcome, StoreError> {
        let mut collections = self.collections.write().await;
        let record = collections
            .get_mut(&collection)
            .and_then(|records| records.get_mut(id.as_str()))
            .ok_or_else(|| StoreError::not_found(collection, id))?;

        if !guard.matches(record) {
            return Ok(UpdateOutcome::Skipped);
        }

        merge_fields(record, fields);
        Ok(UpdateOutcome::Applied)
    }
}
