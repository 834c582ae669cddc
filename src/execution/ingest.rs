//! Result Ingestion
//!
//! Merges a runner's postback into its action execution record. This is
//! the only writer of terminal action status. The first terminal report
//! wins; repeated postbacks are acknowledged without writing.

use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::EngineError;
use crate::id::ExecutionId;
use crate::store::{Records, UpdateOutcome};
use crate::workflow::state::{unix_now, ActionResult, ActionStatus};

/// Body a runner posts to `<postback_base_url>/<execution_id>`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RunnerReport {
    #[serde(default)]
    pub job_id: Option<String>,

    #[serde(default)]
    pub pod_id: Option<String>,

    /// Echo of the execution id; must match the URL when present
    #[serde(default)]
    pub execution_id: Option<String>,

    /// `success` or `failed`
    pub execution_status: String,

    #[serde(default)]
    pub execution_output: Option<Value>,

    #[serde(default)]
    pub error_output: Option<Value>,
}

/// What a report did to the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Recorded,
    /// The execution already had a terminal result; nothing was written.
    AlreadyRecorded,
}

impl IngestOutcome {
    pub fn is_recorded(self) -> bool {
        self == Self::Recorded
    }
}

/// Accepts runner postbacks.
#[derive(Clone)]
pub struct ResultIngestion {
    records: Records,
}

impl ResultIngestion {
    pub fn new(records: Records) -> Self {
        Self { records }
    }

    /// Records the outcome reported for an action execution.
    ///
    /// The id and the report are checked before the store is touched.
    pub async fn report(
        &self,
        execution_id: &str,
        report: RunnerReport,
    ) -> Result<IngestOutcome, EngineError> {
        let id = ExecutionId::parse(execution_id)?;

        let status = match report.execution_status.as_str() {
            "success" => ActionStatus::Success,
            "failed" => ActionStatus::Failed,
            other => {
                return Err(EngineError::InvalidReport(format!(
                    "execution_status must be 'success' or 'failed', got '{}'",
                    other
                )))
            }
        };

        if let Some(echoed) = report.execution_id.as_deref() {
            if echoed != id.as_str() {
                return Err(EngineError::InvalidReport(format!(
                    "report names execution '{}' but was posted for '{}'",
                    echoed, id
                )));
            }
        }

        let result = ActionResult {
            execution_status: status,
            pod_id: report.pod_id,
            standard_output: report.execution_output,
            error_output: report.error_output,
            completion_time: unix_now(),
        };

        match self.records.record_action_result(&id, &result).await? {
            UpdateOutcome::Applied => {
                info!(
                    "Recorded {} for execution {} (job {})",
                    status,
                    id,
                    report.job_id.as_deref().unwrap_or("-")
                );
                Ok(IngestOutcome::Recorded)
            }
            UpdateOutcome::Skipped => {
                warn!("Execution {} already has a result, ignoring report", id);
                Ok(IngestOutcome::AlreadyRecorded)
            }
        }
    }
}
