//! Workflow Orchestrator
//!
//! Runs one workflow execution from its entrypoint to `complete_workflow`:
//! - Load the execution and its definition, then claim it (`running`)
//! - For each step: dispatch its action, wait for the result, follow
//!   `on_success`
//! - Write the terminal outcome once, success or failure
//!
//! Steps of one execution run strictly one after another. Separate
//! executions share nothing but the record store, so any number of them
//! can run as concurrent tasks.

use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::dispatcher::Dispatcher;
use super::waiter::{PollPolicy, Waiter};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::fabric::ComputeFabric;
use crate::id::ExecutionId;
use crate::monitoring::{ExecutionTimeline, SpanOutcome};
use crate::store::{Records, UpdateOutcome};
use crate::workflow::model::{DefinitionKey, Transition, WorkflowDefinition};
use crate::workflow::state::{FailureReason, StepLedger, WorkflowOutcome, WorkflowStatus};

/// Where traversal stopped and why.
struct StepFailure {
    step: Option<String>,
    error: EngineError,
}

impl StepFailure {
    fn at(step: &str, error: EngineError) -> Self {
        Self {
            step: Some(step.to_string()),
            error,
        }
    }
}

/// Workflow execution engine.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use runbook_engine::{EngineConfig, KubectlFabric, MemoryStore, Orchestrator, Records};
/// use tokio_util::sync::CancellationToken;
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let config = EngineConfig::default();
/// let records = Records::new(Arc::new(MemoryStore::new()));
/// let fabric = Arc::new(KubectlFabric::from_config(&config.fabric, true));
///
/// let orchestrator = Orchestrator::new(records, fabric, &config);
/// let outcome = orchestrator
///     .execute("663a8c84bbe4cf949c6e51e4", CancellationToken::new())
///     .await?;
/// println!("{}", outcome.status);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Orchestrator {
    records: Records,
    dispatcher: Dispatcher,
    waiter: Waiter,
    postback_base_url: String,
    max_steps: usize,
}

impl Orchestrator {
    pub fn new(records: Records, fabric: Arc<dyn ComputeFabric>, config: &EngineConfig) -> Self {
        Self {
            dispatcher: Dispatcher::new(records.clone(), fabric),
            waiter: Waiter::new(records.clone(), PollPolicy::from(&config.waiter)),
            records,
            postback_base_url: config.postback_base_url.clone(),
            max_steps: config.max_steps,
        }
    }

    /// Replaces the poll policy.
    pub fn with_poll_policy(mut self, policy: PollPolicy) -> Self {
        self.waiter = Waiter::new(self.records.clone(), policy);
        self
    }

    /// Sets the most steps a single run may dispatch.
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn records(&self) -> &Records {
        &self.records
    }

    /// Runs a workflow execution to its terminal state.
    ///
    /// The id is validated before any store access. An execution that is
    /// already terminal is rejected with [`EngineError::AlreadyTerminal`],
    /// one claimed by another runner with [`EngineError::AlreadyRunning`];
    /// both are left untouched. Every other outcome, including failures and
    /// cancellation, is written to the execution record before returning.
    ///
    /// # Returns
    ///
    /// * `Ok(WorkflowOutcome)` - The workflow reached `complete_workflow`
    /// * `Err` - Why the run stopped (already persisted, unless the
    ///   execution could not be loaded)
    pub async fn execute(
        &self,
        execution_id: &str,
        cancel: CancellationToken,
    ) -> Result<WorkflowOutcome, EngineError> {
        let id = ExecutionId::parse(execution_id)?;

        let execution = self.records.workflow_execution(&id).await?;
        refuse_started(&id, execution.status)?;

        let key = DefinitionKey::new(
            &execution.workflow_namespace,
            &execution.workflow_name,
            execution.version,
        );
        info!("Loading workflow {} for execution {}", key, id);

        let definition = match self.records.workflow_definition(&key).await {
            Ok(definition) => definition,
            Err(e) => {
                let failure = StepFailure { step: None, error: e };
                return Err(self.fail(&id, StepLedger::new(), failure).await);
            }
        };

        if self.records.claim_workflow_execution(&id).await? == UpdateOutcome::Skipped {
            let current = self.records.workflow_execution(&id).await?;
            refuse_started(&id, current.status)?;
            return Err(EngineError::AlreadyRunning(id));
        }

        info!(
            "Starting execution {} of {} ({} steps, entrypoint '{}')",
            id,
            key,
            definition.len(),
            definition.entrypoint
        );

        let mut ledger = StepLedger::new();
        let mut timeline = ExecutionTimeline::new();
        let result = self
            .traverse(&definition, &mut ledger, &mut timeline, &cancel)
            .await;
        debug!("{}", timeline.report());

        match result {
            Ok(()) => {
                let outcome = WorkflowOutcome::success(ledger);
                self.persist(&id, &outcome).await?;
                info!(
                    "Workflow execution {} completed: {} steps in {:.2?}",
                    id,
                    outcome.action_executions.len(),
                    timeline.elapsed()
                );
                Ok(outcome)
            }
            Err(failure) => Err(self.fail(&id, ledger, failure).await),
        }
    }

    /// Runs an execution on its own task.
    pub fn spawn(
        &self,
        execution_id: ExecutionId,
        cancel: CancellationToken,
    ) -> JoinHandle<Result<WorkflowOutcome, EngineError>> {
        let orchestrator = self.clone();
        tokio::spawn(async move {
            let result = orchestrator.execute(execution_id.as_str(), cancel).await;
            if let Err(e) = &result {
                warn!("Workflow execution {} ended with error: {}", execution_id, e);
            }
            result
        })
    }

    /// Walks the success chain from the entrypoint.
    async fn traverse(
        &self,
        definition: &WorkflowDefinition,
        ledger: &mut StepLedger,
        timeline: &mut ExecutionTimeline,
        cancel: &CancellationToken,
    ) -> Result<(), StepFailure> {
        let mut current = definition.entrypoint.clone();
        let mut dispatched = 0usize;

        let mut step = definition.step(&current).ok_or_else(|| StepFailure {
            step: None,
            error: EngineError::WorkflowDefinitionFault {
                step: "entrypoint".to_string(),
                target: current.clone(),
            },
        })?;

        loop {
            if cancel.is_cancelled() {
                return Err(StepFailure::at(&current, EngineError::Cancelled));
            }
            if dispatched >= self.max_steps {
                return Err(StepFailure::at(
                    &current,
                    EngineError::StepLimitExceeded {
                        limit: self.max_steps,
                    },
                ));
            }

            info!("Dispatching step '{}' ({})", current, step.action_key());
            timeline.start(&current);

            let action_id = match self
                .dispatcher
                .submit(&step.action_key(), &step.parameters, &self.postback_base_url)
                .await
            {
                Ok(action_id) => action_id,
                Err(e) => {
                    timeline.finish(&current, SpanOutcome::Failed);
                    return Err(StepFailure::at(&current, e));
                }
            };
            dispatched += 1;
            ledger.record(current.as_str(), action_id.clone());

            if let Err(e) = self.waiter.await_completion(&action_id, cancel).await {
                timeline.finish(&current, SpanOutcome::Failed);
                return Err(StepFailure::at(&current, e));
            }
            timeline.finish(&current, SpanOutcome::Completed);
            info!("Step '{}' completed (execution {})", current, action_id);

            match &step.on_success {
                Transition::Complete => return Ok(()),
                Transition::Step(next) => {
                    step = definition.step(next).ok_or_else(|| {
                        StepFailure::at(
                            &current,
                            EngineError::WorkflowDefinitionFault {
                                step: current.clone(),
                                target: next.clone(),
                            },
                        )
                    })?;
                    current = next.clone();
                }
            }
        }
    }

    /// Persists a failed outcome and returns the error that caused it.
    async fn fail(&self, id: &ExecutionId, ledger: StepLedger, failure: StepFailure) -> EngineError {
        let reason = failure_reason(&failure.error);
        match &failure.step {
            Some(step) => error!("Workflow execution {} failed at step '{}': {}", id, step, failure.error),
            None => error!("Workflow execution {} failed: {}", id, failure.error),
        }

        let outcome = WorkflowOutcome::failed(ledger, failure.step, reason, failure.error.to_string());
        if let Err(e) = self.persist(id, &outcome).await {
            error!("Could not record failure of execution {}: {}", id, e);
        }
        failure.error
    }

    async fn persist(&self, id: &ExecutionId, outcome: &WorkflowOutcome) -> Result<(), EngineError> {
        if self.records.record_workflow_outcome(id, outcome).await? == UpdateOutcome::Skipped {
            warn!(
                "Execution {} already had a terminal result; '{}' not recorded",
                id, outcome.status
            );
        }
        Ok(())
    }
}

/// Rejects executions another runner has already started or finished.
fn refuse_started(id: &ExecutionId, status: WorkflowStatus) -> Result<(), EngineError> {
    if status.is_terminal() {
        return Err(EngineError::AlreadyTerminal {
            id: id.clone(),
            status: status.to_string(),
        });
    }
    if status == WorkflowStatus::Running {
        return Err(EngineError::AlreadyRunning(id.clone()));
    }
    Ok(())
}

/// Classifies why a run stopped, as stored in `failure_reason`.
pub fn failure_reason(error: &EngineError) -> FailureReason {
    match error {
        EngineError::ActionExecutionFailed { .. } => FailureReason::ActionExecutionFailed,
        EngineError::ExecutionTimeout { .. } => FailureReason::ExecutionTimeout,
        EngineError::WorkflowDefinitionNotFound { .. } => FailureReason::DefinitionNotFound,
        EngineError::ActionDefinitionNotFound { .. } => FailureReason::ActionDefinitionNotFound,
        EngineError::WorkflowDefinitionFault { .. } | EngineError::MalformedDefinition { .. } => {
            FailureReason::DefinitionFault
        }
        EngineError::StepLimitExceeded { .. } => FailureReason::StepLimitExceeded,
        EngineError::Dispatch(_) => FailureReason::DispatchFailed,
        EngineError::Cancelled => FailureReason::Cancelled,
        _ => FailureReason::InternalError,
    }
}
