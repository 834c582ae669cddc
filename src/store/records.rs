//! Typed record access.
//!
//! One method per record kind and operation, translating between the
//! engine's types and store documents, and between store errors and the
//! engine's error taxonomy.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::{Collection, Document, Filter, RecordStore, StoreError, UpdateOutcome};
use crate::error::EngineError;
use crate::id::ExecutionId;
use crate::workflow::model::{ActionDefinition, DefinitionKey, WorkflowDefinition};
use crate::workflow::state::{
    ActionExecution, ActionResult, ActionStatus, NewActionExecution, NewWorkflowExecution,
    WorkflowExecution, WorkflowOutcome, WorkflowStatus,
};

/// Typed view over a shared [`RecordStore`].
#[derive(Clone)]
pub struct Records {
    store: Arc<dyn RecordStore>,
}

impl Records {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub async fn action_definition(
        &self,
        key: &DefinitionKey,
    ) -> Result<ActionDefinition, EngineError> {
        let filter = definition_filter("action_name", key);
        match self.store.find_one(Collection::ActionDefinitions, &filter).await {
            Ok(document) => decode_definition(document, key),
            Err(StoreError::NotFound { .. }) => Err(EngineError::ActionDefinitionNotFound {
                namespace: key.namespace.clone(),
                name: key.name.clone(),
                version: key.version,
            }),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn workflow_definition(
        &self,
        key: &DefinitionKey,
    ) -> Result<WorkflowDefinition, EngineError> {
        let filter = definition_filter("workflow_name", key);
        match self.store.find_one(Collection::WorkflowDefinitions, &filter).await {
            Ok(document) => decode_definition(document, key),
            Err(StoreError::NotFound { .. }) => Err(EngineError::WorkflowDefinitionNotFound {
                namespace: key.namespace.clone(),
                name: key.name.clone(),
                version: key.version,
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Stores an action definition unless one with the same key exists.
    /// Returns true if it was inserted. The check and the insert are one
    /// atomic store operation, so concurrent seeders never duplicate a key.
    pub async fn put_action_definition(
        &self,
        definition: &ActionDefinition,
    ) -> Result<bool, EngineError> {
        let existing = definition_filter("action_name", &definition.key());
        let inserted = self
            .store
            .insert_unless_exists(Collection::ActionDefinitions, &existing, encode(definition)?)
            .await?;
        Ok(inserted.is_some())
    }

    /// Stores a workflow definition unless one with the same key exists.
    /// Returns true if it was inserted.
    pub async fn put_workflow_definition(
        &self,
        definition: &WorkflowDefinition,
    ) -> Result<bool, EngineError> {
        let existing = definition_filter("workflow_name", &definition.key());
        let inserted = self
            .store
            .insert_unless_exists(Collection::WorkflowDefinitions, &existing, encode(definition)?)
            .await?;
        Ok(inserted.is_some())
    }

    pub async fn action_execution(&self, id: &ExecutionId) -> Result<ActionExecution, EngineError> {
        self.get(Collection::ActionExecutions, id).await
    }

    pub async fn workflow_execution(
        &self,
        id: &ExecutionId,
    ) -> Result<WorkflowExecution, EngineError> {
        self.get(Collection::WorkflowExecutions, id).await
    }

    /// Raw document of an execution record, for read-only views.
    pub async fn execution_document(
        &self,
        collection: Collection,
        id: &ExecutionId,
    ) -> Result<Document, EngineError> {
        match self.store.get_by_id(collection, id).await {
            Ok(document) => Ok(document),
            Err(StoreError::NotFound { .. }) => Err(EngineError::ExecutionNotFound(id.clone())),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn insert_action_execution(
        &self,
        execution: &NewActionExecution,
    ) -> Result<ExecutionId, EngineError> {
        Ok(self
            .store
            .insert(Collection::ActionExecutions, encode(execution)?)
            .await?)
    }

    pub async fn insert_workflow_execution(
        &self,
        execution: &NewWorkflowExecution,
    ) -> Result<ExecutionId, EngineError> {
        Ok(self
            .store
            .insert(Collection::WorkflowExecutions, encode(execution)?)
            .await?)
    }

    /// Merges a postback into an action execution that is still `submitted`.
    pub async fn record_action_result(
        &self,
        id: &ExecutionId,
        result: &ActionResult,
    ) -> Result<UpdateOutcome, EngineError> {
        let guard = Filter::new().eq("execution_status", ActionStatus::Submitted.as_str());
        self.update_if(Collection::ActionExecutions, id, &guard, encode(result)?)
            .await
    }

    /// Moves a workflow execution from `submitted` to `running`.
    ///
    /// Only one claim can succeed; an execution that is already running or
    /// terminal is left untouched and `Skipped` is returned.
    pub async fn claim_workflow_execution(
        &self,
        id: &ExecutionId,
    ) -> Result<UpdateOutcome, EngineError> {
        let guard = Filter::new().eq("status", WorkflowStatus::Submitted.as_str());
        let mut fields = Document::new();
        fields.insert(
            "status".to_string(),
            Value::String(WorkflowStatus::Running.as_str().to_string()),
        );
        self.update_if(Collection::WorkflowExecutions, id, &guard, fields)
            .await
    }

    /// Writes the terminal result of a workflow execution unless one exists.
    pub async fn record_workflow_outcome(
        &self,
        id: &ExecutionId,
        outcome: &WorkflowOutcome,
    ) -> Result<UpdateOutcome, EngineError> {
        self.update_if(Collection::WorkflowExecutions, id, &not_terminal(), encode(outcome)?)
            .await
    }

    async fn get<T: DeserializeOwned>(
        &self,
        collection: Collection,
        id: &ExecutionId,
    ) -> Result<T, EngineError> {
        decode(self.execution_document(collection, id).await?)
    }

    async fn update_if(
        &self,
        collection: Collection,
        id: &ExecutionId,
        guard: &Filter,
        fields: Document,
    ) -> Result<UpdateOutcome, EngineError> {
        match self.store.update_by_id_if(collection, id, guard, fields).await {
            Ok(outcome) => Ok(outcome),
            Err(StoreError::NotFound { .. }) => Err(EngineError::ExecutionNotFound(id.clone())),
            Err(e) => Err(e.into()),
        }
    }
}

fn definition_filter(name_field: &str, key: &DefinitionKey) -> Filter {
    Filter::new()
        .eq("namespace", key.namespace.as_str())
        .eq(name_field, key.name.as_str())
        .eq("version", key.version)
}

fn not_terminal() -> Filter {
    Filter::new().not_in(
        "status",
        WorkflowStatus::TERMINAL.iter().map(|status| status.as_str()),
    )
}

fn encode<T: Serialize>(value: &T) -> Result<Document, EngineError> {
    match serde_json::to_value(value).map_err(StoreError::from)? {
        Value::Object(document) => Ok(document),
        _ => Err(StoreError::Serialization(serde::ser::Error::custom(
            "record must serialize to a JSON object",
        ))
        .into()),
    }
}

/// Definitions that no longer decode are a definition fault, not a store fault.
fn decode_definition<T: DeserializeOwned>(
    document: Document,
    key: &DefinitionKey,
) -> Result<T, EngineError> {
    serde_json::from_value(Value::Object(document)).map_err(|e| {
        EngineError::MalformedDefinition {
            key: key.to_string(),
            message: e.to_string(),
        }
    })
}

fn decode<T: DeserializeOwned>(document: Document) -> Result<T, EngineError> {
    Ok(serde_json::from_value(Value::Object(document)).map_err(StoreError::from)?)
}
