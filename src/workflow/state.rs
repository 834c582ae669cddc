//! Execution Records
//!
//! Mutable records tracking runs: one [`ActionExecution`] per dispatched
//! step and one [`WorkflowExecution`] per workflow run. Workflow results
//! are written once, at the end of a run, as a [`WorkflowOutcome`].

use std::fmt;

use chrono::Utc;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::id::ExecutionId;

/// Current Unix time in seconds, as stamped on completed records.
pub fn unix_now() -> i64 {
    Utc::now().timestamp()
}

/// Lifecycle of an action execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Submitted,
    Success,
    Failed,
}

impl ActionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Submitted)
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a workflow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Submitted,
    Running,
    Success,
    Failed,
    Cancelled,
}

impl WorkflowStatus {
    pub const TERMINAL: [WorkflowStatus; 3] = [Self::Success, Self::Failed, Self::Cancelled];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        Self::TERMINAL.contains(&self)
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a workflow execution did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    ActionExecutionFailed,
    ExecutionTimeout,
    DefinitionNotFound,
    ActionDefinitionNotFound,
    DefinitionFault,
    StepLimitExceeded,
    DispatchFailed,
    Cancelled,
    /// The record store failed mid-run
    InternalError,
}

/// A dispatched action, as stored in the `runnerExecution` collection.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ActionExecution {
    #[serde(rename = "_id")]
    pub id: ExecutionId,

    pub action_namespace: String,
    pub action_name: String,
    pub version: i64,

    #[serde(default)]
    pub parameters: Value,

    /// Dispatch identifier of the compute-fabric unit of work
    pub job_id: String,

    pub execution_status: ActionStatus,

    /// Worker that ran the action, reported by the postback
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub standard_output: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_output: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<i64>,
}

/// Fields of an action execution at creation time.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct NewActionExecution {
    pub action_namespace: String,
    pub action_name: String,
    pub version: i64,
    pub parameters: Value,
    pub job_id: String,
    pub execution_status: ActionStatus,
}

/// Terminal fields merged into an action execution by a postback.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ActionResult {
    pub execution_status: ActionStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pod_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub standard_output: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_output: Option<Value>,

    pub completion_time: i64,
}

/// Ordered mapping of step name to the action execution that ran it.
///
/// Serialized as a JSON object whose keys follow traversal order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepLedger {
    entries: Vec<(String, ExecutionId)>,
}

impl StepLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the execution of a step. A revisited step keeps its
    /// original position and takes the newer execution id.
    pub fn record(&mut self, step: impl Into<String>, execution_id: ExecutionId) {
        let step = step.into();
        match self.entries.iter_mut().find(|(name, _)| *name == step) {
            Some(entry) => entry.1 = execution_id,
            None => self.entries.push((step, execution_id)),
        }
    }

    pub fn get(&self, step: &str) -> Option<&ExecutionId> {
        self.entries
            .iter()
            .find(|(name, _)| name == step)
            .map(|(_, id)| id)
    }

    /// Step names in traversal order.
    pub fn steps(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ExecutionId)> {
        self.entries.iter().map(|(name, id)| (name.as_str(), id))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for StepLedger {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (step, id) in &self.entries {
            map.serialize_entry(step, id)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for StepLedger {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct LedgerVisitor;

        impl<'de> Visitor<'de> for LedgerVisitor {
            type Value = StepLedger;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of step name to execution id")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<StepLedger, A::Error> {
                let mut ledger = StepLedger::new();
                while let Some((step, id)) = access.next_entry::<String, ExecutionId>()? {
                    ledger.record(step, id);
                }
                Ok(ledger)
            }
        }

        deserializer.deserialize_map(LedgerVisitor)
    }
}

/// A workflow run, as stored in the `workflowExecution` collection.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WorkflowExecution {
    #[serde(rename = "_id")]
    pub id: ExecutionId,

    pub workflow_namespace: String,
    pub workflow_name: String,
    pub version: i64,

    #[serde(default)]
    pub parameters: Value,

    pub status: WorkflowStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_executions: Option<StepLedger>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<FailureReason>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<i64>,
}

/// Fields of a workflow execution at submission time.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct NewWorkflowExecution {
    pub workflow_namespace: String,
    pub workflow_name: String,
    pub version: i64,
    pub parameters: Value,
    pub status: WorkflowStatus,
}

impl NewWorkflowExecution {
    pub fn submitted(namespace: impl Into<String>, name: impl Into<String>, version: i64) -> Self {
        Self {
            workflow_namespace: namespace.into(),
            workflow_name: name.into(),
            version,
            parameters: Value::Null,
            status: WorkflowStatus::Submitted,
        }
    }
}

/// The terminal result of a workflow run, written exactly once.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct WorkflowOutcome {
    pub status: WorkflowStatus,

    pub action_executions: StepLedger,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<FailureReason>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub completion_time: i64,
}

impl WorkflowOutcome {
    /// Every step reached `complete_workflow`.
    pub fn success(ledger: StepLedger) -> Self {
        Self {
            status: WorkflowStatus::Success,
            action_executions: ledger,
            failed_step: None,
            failure_reason: None,
            error: None,
            completion_time: unix_now(),
        }
    }

    /// Traversal stopped at `step` (if one was being processed).
    pub fn failed(
        ledger: StepLedger,
        step: Option<String>,
        reason: FailureReason,
        error: impl Into<String>,
    ) -> Self {
        let status = if reason == FailureReason::Cancelled {
            WorkflowStatus::Cancelled
        } else {
            WorkflowStatus::Failed
        };

        Self {
            status,
            action_executions: ledger,
            failed_step: step,
            failure_reason: Some(reason),
            error: Some(error.into()),
            completion_time: unix_now(),
        }
    }
}
