//! File-backed record store.
//!
//! Records are saved as pretty-printed JSON under
//! `{root}/{collection}/{id}.json`. Writes go to a temporary file that is
//! renamed over the record, so readers never observe a half-written
//! document. Read-modify-write cycles are serialised by a store-wide lock.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::{debug, info};
use serde_json::Value;
use tokio::fs;
use tokio::sync::Mutex;

use super::{
    merge_fields, Collection, Document, Filter, RecordStore, StoreError, UpdateOutcome, ID_FIELD,
};
use crate::id::ExecutionId;

/// A [`RecordStore`] persisting records as JSON files.
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Opens a store rooted at `root`, creating the collection directories.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        for collection in Collection::ALL {
            fs::create_dir_all(root.join(collection.name())).await?;
        }

        info!("Opened file store at {}", root.display());
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, collection: Collection, id: &str) -> PathBuf {
        self.root.join(collection.name()).join(format!("{}.json", id))
    }

    async fn read_record(&self, collection: Collection, id: &str) -> Result<Document, StoreError> {
        let content = match fs::read_to_string(self.record_path(collection, id)).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::not_found(collection, id));
            }
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str::<Value>(&content)? {
            Value::Object(document) => Ok(document),
            _ => Err(StoreError::Corrupt {
                collection,
                id: id.to_string(),
            }),
        }
    }

    async fn write_record(
        &self,
        collection: Collection,
        id: &str,
        document: &Document,
    ) -> Result<(), StoreError> {
        let path = self.record_path(collection, id);
        let temp_path = path.with_extension("json.tmp");

        let json = serde_json::to_string_pretty(document)?;
        fs::write(&temp_path, json).await?;
        fs::rename(&temp_path, &path).await?;

        debug!("Saved {}/{}", collection, id);
        Ok(())
    }

    /// Record identifiers in a collection, in lexical order.
    async fn record_ids(&self, collection: Collection) -> Result<Vec<String>, StoreError> {
        let mut entries = fs::read_dir(self.root.join(collection.name())).await?;
        let mut ids = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(stem.to_string());
            }
        }

        ids.sort();
        Ok(ids)
    }
}

#[async_trait]
impl RecordStore for FileStore {
    async fn get_by_id(
        &self,
        collection: Collection,
        id: &ExecutionId,
    ) -> Result<Document, StoreError> {
        self.read_record(collection, id.as_str()).await
    }

    async fn find_one(
        &self,
        collection: Collection,
        filter: &Filter,
    ) -> Result<Document, StoreError> {
        for id in self.record_ids(collection).await? {
            match self.read_record(collection, &id).await {
                Ok(document) if filter.matches(&document) => return Ok(document),
                Ok(_) => {}
                // Removed between listing and reading
                Err(StoreError::NotFound { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        Err(StoreError::not_found(collection, format!("{:?}", filter)))
    }

    async fn insert(
        &self,
        collection: Collection,
        mut document: Document,
    ) -> Result<ExecutionId, StoreError> {
        let id = ExecutionId::generate();
        document.insert(ID_FIELD.to_string(), Value::String(id.to_string()));

        let _guard = self.write_lock.lock().await;
        self.write_record(collection, id.as_str(), &document).await?;
        Ok(id)
    }

    async fn insert_unless_exists(
        &self,
        collection: Collection,
        existing: &Filter,
        mut document: Document,
    ) -> Result<Option<ExecutionId>, StoreError> {
        let _guard = self.write_lock.lock().await;

        match self.find_one(collection, existing).await {
            Ok(_) => return Ok(None),
            Err(StoreError::NotFound { .. }) => {}
            Err(e) => return Err(e),
        }

        let id = ExecutionId::generate();
        document.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
        self.write_record(collection, id.as_str(), &document).await?;
        Ok(Some(id))
    }

    async fn update_by_id_if(
        &self,
        collection: Collection,
        id: &ExecutionId,
        guard: &Filter,
        fields: Document,
    ) -> Result<UpdateOutcome, StoreError> {
        let _guard = self.write_lock.lock().await;

        let mut record = self.read_record(collection, id.as_str()).await?;
        if !guard.matches(&record) {
            return Ok(UpdateOutcome::Skipped);
        }

        merge_fields(&mut record, fields);
        self.write_record(collection, id.as_str(), &record).await?;
        Ok(UpdateOutcome::Applied)
    }
}
