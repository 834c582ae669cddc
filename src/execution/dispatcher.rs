//! Action Dispatch
//!
//! Turns one workflow step into one unit of work on the compute fabric:
//! - Resolve the action definition
//! - Insert the action execution record in status `submitted`
//! - Hand the container image and its environment to the fabric
//!
//! Dispatch is fire-and-forget. Success means the fabric accepted the
//! work; the result arrives later through a postback.

use std::sync::Arc;

use chrono::Utc;
use log::{debug, error, info};
use serde_json::Value;

use crate::error::EngineError;
use crate::fabric::{
    ComputeFabric, EnvVar, JobRequest, ENV_EXECUTION_ID, ENV_JOB_ID, ENV_POD_ID,
    ENV_POSTBACK_BASE_URL, ENV_RUNNER_ARGS,
};
use crate::id::ExecutionId;
use crate::store::Records;
use crate::workflow::model::DefinitionKey;
use crate::workflow::state::{unix_now, ActionResult, ActionStatus, NewActionExecution};

/// Longest dispatch identifier the fabric accepts as a unit name.
const MAX_JOB_ID_LEN: usize = 63;

/// Submits actions to the compute fabric.
#[derive(Clone)]
pub struct Dispatcher {
    records: Records,
    fabric: Arc<dyn ComputeFabric>,
}

impl Dispatcher {
    pub fn new(records: Records, fabric: Arc<dyn ComputeFabric>) -> Self {
        Self { records, fabric }
    }

    /// Dispatches one action and returns the id of its execution record.
    ///
    /// If the fabric refuses the work, the record is closed as `failed`
    /// with the refusal in its error output.
    pub async fn submit(
        &self,
        action: &DefinitionKey,
        parameters: &Value,
        callback_base_url: &str,
    ) -> Result<ExecutionId, EngineError> {
        let definition = self.records.action_definition(action).await?;
        let job_id = job_id(&action.namespace, &action.name, unix_nanos());

        let execution_id = self
            .records
            .insert_action_execution(&NewActionExecution {
                action_namespace: action.namespace.clone(),
                action_name: action.name.clone(),
                version: action.version,
                parameters: parameters.clone(),
                job_id: job_id.clone(),
                execution_status: ActionStatus::Submitted,
            })
            .await?;

        let request = JobRequest {
            job_id: job_id.clone(),
            image: definition.image(),
            env: vec![
                EnvVar::literal(ENV_RUNNER_ARGS, runner_args(parameters)),
                EnvVar::pod_name(ENV_POD_ID),
                EnvVar::literal(ENV_JOB_ID, &job_id),
                EnvVar::literal(ENV_EXECUTION_ID, execution_id.as_str()),
                EnvVar::literal(ENV_POSTBACK_BASE_URL, callback_base_url),
            ],
        };

        debug!(
            "Submitting job '{}' with image {} for execution {}",
            job_id, request.image, execution_id
        );

        if let Err(e) = self.fabric.submit(&request).await {
            error!("Dispatch of {} failed: {}", action, e);
            let refusal = ActionResult {
                execution_status: ActionStatus::Failed,
                pod_id: None,
                standard_output: None,
                error_output: Some(Value::String(e.to_string())),
                completion_time: unix_now(),
            };
            self.records
                .record_action_result(&execution_id, &refusal)
                .await?;
            return Err(e.into());
        }

        info!(
            "Dispatched {} as job '{}' (execution {})",
            action, job_id, execution_id
        );
        Ok(execution_id)
    }
}

/// Builds a dispatch identifier: `<namespace>-<name>-<nanos>`.
///
/// The result is a valid unit name: lowercase alphanumerics and `-`, at
/// most 63 characters, starting with an alphanumeric. The timestamp suffix
/// is always kept whole.
pub fn job_id(namespace: &str, name: &str, nanos: i64) -> String {
    let suffix = format!("-{}", nanos);
    let prefix: String = format!("{}-{}", namespace, name)
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' { c } else { '-' })
        .collect();

    let mut prefix = prefix.trim_start_matches('-').to_string();
    prefix.truncate(MAX_JOB_ID_LEN.saturating_sub(suffix.len()));
    if prefix.is_empty() {
        prefix.push_str("job");
    }

    format!("{}{}", prefix, suffix)
}

/// Renders step parameters for the runner: strings as-is, anything else
/// as compact JSON, nothing as an empty string.
pub fn runner_args(parameters: &Value) -> String {
    match parameters {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn unix_nanos() -> i64 {
    let now = Utc::now();
    now.timestamp_nanos_opt()
        .unwrap_or_else(|| now.timestamp_micros().saturating_mul(1_000))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::testing::{records_with_actions, RecordingFabric};
    use crate::fabric::{EnvValue, FabricError};
    use crate::workflow::state::ActionStatus;
    use serde_json::json;

    #[test]
    fn test_job_id_format() {
        assert_eq!(job_id("core", "echo", 1715113092000000000), "core-echo-1715113092000000000");
        assert_eq!(job_id("Core", "Run_Script.v2", 7), "core-run-script-v2-7");
        assert_eq!(job_id("_x", "y", 1), "x-y-1");
        assert_eq!(job_id("", "", 1), "job-1");
    }

    #[test]
    fn test_job_id_truncated_keeps_suffix() {
        let id = job_id(&"n".repeat(80), "echo", 1715113092000000000);
        assert_eq!(id.len(), MAX_JOB_ID_LEN);
        assert!(id.ends_with("-1715113092000000000"));
    }

    #[test]
    fn test_runner_args() {
        assert_eq!(runner_args(&json!("hello world")), "hello world");
        assert_eq!(runner_args(&json!({"wait_seconds": 5})), r#"{"wait_seconds":5}"#);
        assert_eq!(runner_args(&json!([1, 2])), "[1,2]");
        assert_eq!(runner_args(&Value::Null), "");
    }

    #[tokio::test]
    async fn test_submit_creates_record_and_job() {
        let records = records_with_actions(&["echo"]).await;
        let fabric = Arc::new(RecordingFabric::default());
        let dispatcher = Dispatcher::new(records.clone(), fabric.clone());

        let id = dispatcher
            .submit(&DefinitionKey::new("core", "echo", 1), &json!("hi"), "http://engine/runner")
            .await
            .unwrap();

        let execution = records.action_execution(&id).await.unwrap();
        assert_eq!(execution.execution_status, ActionStatus::Submitted);
        assert_eq!(execution.parameters, json!("hi"));
        assert!(execution.job_id.starts_with("core-echo-"));

        let requests = fabric.requests();
        assert_eq!(requests.len(), 1);
        let request = &requests[0];
        assert_eq!(request.job_id, execution.job_id);
        assert_eq!(request.image, "repo/runner-echo:1");
        assert_eq!(request.literal(ENV_RUNNER_ARGS), Some("hi"));
        assert_eq!(request.literal(ENV_EXECUTION_ID), Some(id.as_str()));
        assert_eq!(request.literal(ENV_JOB_ID), Some(execution.job_id.as_str()));
        assert_eq!(request.literal(ENV_POSTBACK_BASE_URL), Some("http://engine/runner"));
        assert_eq!(request.env_value(ENV_POD_ID), Some(&EnvValue::PodName));
    }

    #[tokio::test]
    async fn test_submit_unknown_action() {
        let records = records_with_actions(&[]).await;
        let fabric = Arc::new(RecordingFabric::default());
        let dispatcher = Dispatcher::new(records, fabric.clone());

        let err = dispatcher
            .submit(&DefinitionKey::new("core", "missing", 1), &Value::Null, "http://engine/runner")
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::ActionDefinitionNotFound { .. }));
        assert!(fabric.requests().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_dispatch_closes_record() {
        let records = records_with_actions(&["echo"]).await;
        let fabric = Arc::new(RecordingFabric::rejecting());
        let dispatcher = Dispatcher::new(records.clone(), fabric.clone());

        let err = dispatcher
            .submit(&DefinitionKey::new("core", "echo", 1), &Value::Null, "http://engine/runner")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Dispatch(FabricError::Rejected { .. })));

        let id: ExecutionId = fabric.requests()[0]
            .literal(ENV_EXECUTION_ID)
            .unwrap()
            .parse()
            .unwrap();
        let execution = records.action_execution(&id).await.unwrap();
        assert_eq!(execution.execution_status, ActionStatus::Failed);
        assert!(execution.error_output.is_some());
    }
}
