//! Test doubles for the store and the compute fabric.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;

use super::ingest::{ResultIngestion, RunnerReport};
use crate::fabric::{ComputeFabric, FabricError, JobRequest, ENV_EXECUTION_ID, ENV_JOB_ID};
use crate::id::ExecutionId;
use crate::store::{
    Collection, Document, Filter, MemoryStore, RecordStore, Records, StoreError, UpdateOutcome,
};
use crate::workflow::model::ActionDefinition;

/// A store that fails the test on any access.
pub struct PanickingStore;

#[async_trait]
impl RecordStore for PanickingStore {
    async fn get_by_id(&self, collection: Collection, _: &ExecutionId) -> Result<Document, StoreError> {
        panic!("unexpected get_by_id on {}", collection)
    }

    async fn find_one(&self, collection: Collection, _: &Filter) -> Result<Document, StoreError> {
        panic!("unexpected find_one on {}", collection)
    }

    async fn insert(&self, collection: Collection, _: Document) -> Result<ExecutionId, StoreError> {
        panic!("unexpected insert on {}", collection)
    }

    async fn insert_unless_exists(
        &self,
        collection: Collection,
        _: &Filter,
        _: Document,
    ) -> Result<Option<ExecutionId>, StoreError> {
        panic!("unexpected insert on {}", collection)
    }

    async fn update_by_id_if(
        &self,
        collection: Collection,
        _: &ExecutionId,
        _: &Filter,
        _: Document,
    ) -> Result<UpdateOutcome, StoreError> {
        panic!("unexpected update on {}", collection)
    }
}

/// A memory store counting `get_by_id` calls, optionally merging fields
/// into the requested record on the n-th call.
#[derive(Default)]
pub struct CountingStore {
    inner: MemoryStore,
    gets: AtomicUsize,
    pending: Mutex<Option<(usize, Document)>>,
}

impl CountingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    /// Applies `fields` right before the `n`-th `get_by_id` reads.
    pub fn update_on_get(&self, n: usize, fields: Document) {
        *self.pending.lock().unwrap() = Some((n, fields));
    }
}

#[async_trait]
impl RecordStore for CountingStore {
    async fn get_by_id(&self, collection: Collection, id: &ExecutionId) -> Result<Document, StoreError> {
        let count = self.gets.fetch_add(1, Ordering::SeqCst) + 1;

        let due = {
            let mut pending = self.pending.lock().unwrap();
            match pending.as_ref() {
                Some((n, _)) if *n == count => pending.take().map(|(_, fields)| fields),
                _ => None,
            }
        };
        if let Some(fields) = due {
            self.inner.update_by_id(collection, id, fields).await?;
        }

        self.inner.get_by_id(collection, id).await
    }

    async fn find_one(&self, collection: Collection, filter: &Filter) -> Result<Document, StoreError> {
        self.inner.find_one(collection, filter).await
    }

    async fn insert(&self, collection: Collection, document: Document) -> Result<ExecutionId, StoreError> {
        self.inner.insert(collection, document).await
    }

    async fn insert_unless_exists(
        &self,
        collection: Collection,
        existing: &Filter,
        document: Document,
    ) -> Result<Option<ExecutionId>, StoreError> {
        self.inner.insert_unless_exists(collection, existing, document).await
    }

    async fn update_by_id_if(
        &self,
        collection: Collection,
        id: &ExecutionId,
        guard: &Filter,
        fields: Document,
    ) -> Result<UpdateOutcome, StoreError> {
        self.inner.update_by_id_if(collection, id, guard, fields).await
    }
}

/// A fabric that records requests and accepts or rejects all of them.
#[derive(Default)]
pub struct RecordingFabric {
    requests: Mutex<Vec<JobRequest>>,
    reject: bool,
}

impl RecordingFabric {
    pub fn rejecting() -> Self {
        Self {
            requests: Mutex::default(),
            reject: true,
        }
    }

    pub fn requests(&self) -> Vec<JobRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ComputeFabric for RecordingFabric {
    async fn submit(&self, request: &JobRequest) -> Result<(), FabricError> {
        self.requests.lock().unwrap().push(request.clone());
        if self.reject {
            return Err(FabricError::Rejected {
                job_id: request.job_id.clone(),
                message: "quota exceeded".to_string(),
            });
        }
        Ok(())
    }
}

/// How a scripted runner behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scripted {
    Succeed,
    Fail,
    /// Never reports back
    Silent,
}

/// A fabric whose runners post their result through ingestion as soon as
/// they are submitted. Actions without a script succeed.
pub struct ScriptedFabric {
    ingestion: ResultIngestion,
    scripts: HashMap<String, Scripted>,
    requests: Mutex<Vec<JobRequest>>,
}

impl ScriptedFabric {
    pub fn new(records: Records) -> Self {
        Self {
            ingestion: ResultIngestion::new(records),
            scripts: HashMap::new(),
            requests: Mutex::default(),
        }
    }

    /// Scripts the runner of action `core/<name>@1`.
    pub fn script(mut self, action_name: &str, behaviour: Scripted) -> Self {
        self.scripts.insert(image_of(action_name), behaviour);
        self
    }

    pub fn requests(&self) -> Vec<JobRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Execution ids of all submitted units, in submission order.
    pub fn execution_ids(&self) -> Vec<String> {
        self.requests()
            .iter()
            .filter_map(|request| request.literal(ENV_EXECUTION_ID).map(str::to_string))
            .collect()
    }
}

#[async_trait]
impl ComputeFabric for ScriptedFabric {
    async fn submit(&self, request: &JobRequest) -> Result<(), FabricError> {
        self.requests.lock().unwrap().push(request.clone());

        let status = match self.scripts.get(&request.image).copied().unwrap_or(Scripted::Succeed) {
            Scripted::Succeed => "success",
            Scripted::Fail => "failed",
            Scripted::Silent => return Ok(()),
        };

        let execution_id = request.literal(ENV_EXECUTION_ID).unwrap_or_default();
        let report = RunnerReport {
            job_id: request.literal(ENV_JOB_ID).map(str::to_string),
            pod_id: Some(format!("{}-pod", request.job_id)),
            execution_id: Some(execution_id.to_string()),
            execution_status: status.to_string(),
            execution_output: Some(json!(format!("ran {}", request.image))),
            error_output: None,
        };

        self.ingestion
            .report(execution_id, report)
            .await
            .map_err(|e| FabricError::Rejected {
                job_id: request.job_id.clone(),
                message: e.to_string(),
            })?;
        Ok(())
    }
}

fn image_of(action_name: &str) -> String {
    format!("repo/runner-{}:1", action_name)
}

/// A memory-backed store holding action definitions `core/<name>@1`.
pub async fn records_with_actions(names: &[&str]) -> Records {
    let records = Records::new(Arc::new(MemoryStore::new()));
    for name in names {
        let container = format!("runner-{}", name);
        let action = ActionDefinition::new("core", *name, 1, ("repo", container.as_str(), "1"));
        records.put_action_definition(&action).await.unwrap();
    }
    records
}
