//! Engine Error Types
//!
//! One taxonomy for everything the engine reports to its callers.
//! Identifier and report-format problems are client errors and are raised
//! before any side effect; the rest describe why a record could not be
//! resolved or why a workflow execution stopped.

use thiserror::Error;

use crate::fabric::FabricError;
use crate::id::{ExecutionId, InvalidIdFormat};
use crate::store::StoreError;

/// Errors produced by the engine's public operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    InvalidIdFormat(#[from] InvalidIdFormat),

    #[error("execution {0} not found")]
    ExecutionNotFound(ExecutionId),

    #[error("action in namespace '{namespace}' with name '{name}' and version {version} not found")]
    ActionDefinitionNotFound {
        namespace: String,
        name: String,
        version: i64,
    },

    #[error("workflow in namespace '{namespace}' with name '{name}' and version {version} not found")]
    WorkflowDefinitionNotFound {
        namespace: String,
        name: String,
        version: i64,
    },

    #[error("workflow definition is broken: step '{step}' references unknown step '{target}'")]
    WorkflowDefinitionFault { step: String, target: String },

    #[error("stored definition {key} is malformed: {message}")]
    MalformedDefinition { key: String, message: String },

    #[error("action execution {execution_id} failed")]
    ActionExecutionFailed { execution_id: ExecutionId },

    #[error("action execution {execution_id} did not finish after {attempts} polls")]
    ExecutionTimeout {
        execution_id: ExecutionId,
        attempts: u32,
    },

    #[error("workflow exceeded the limit of {limit} steps")]
    StepLimitExceeded { limit: usize },

    #[error("execution {id} is already terminal with status '{status}'")]
    AlreadyTerminal { id: ExecutionId, status: String },

    #[error("execution {0} is already running")]
    AlreadyRunning(ExecutionId),

    #[error("execution cancelled")]
    Cancelled,

    #[error("invalid runner report: {0}")]
    InvalidReport(String),

    #[error("dispatch failed: {0}")]
    Dispatch(#[from] FabricError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl EngineError {
    /// True for errors caused by the caller's input rather than engine state.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidIdFormat(_)
                | Self::InvalidReport(_)
                | Self::AlreadyTerminal { .. }
                | Self::AlreadyRunning(_)
        )
    }

    /// True for "record or definition absent" errors.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::ExecutionNotFound(_)
                | Self::ActionDefinitionNotFound { .. }
                | Self::WorkflowDefinitionNotFound { .. }
        )
    }
}
