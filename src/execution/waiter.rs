//! Completion Waiting
//!
//! Polls an action execution until it leaves `submitted` or the poll
//! budget runs out. The sleep between polls suspends only the calling
//! task, and a cancellation signal interrupts it.

use std::time::Duration;

use log::debug;
use tokio_util::sync::CancellationToken;

use crate::config::WaiterConfig;
use crate::error::EngineError;
use crate::id::ExecutionId;
use crate::store::Records;
use crate::workflow::state::{ActionExecution, ActionStatus};

/// How often and how many times to poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl PollPolicy {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }
}

impl From<&WaiterConfig> for PollPolicy {
    fn from(config: &WaiterConfig) -> Self {
        Self::new(config.poll_interval(), config.max_attempts)
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::from(&WaiterConfig::default())
    }
}

/// Waits for action executions to finish.
#[derive(Clone)]
pub struct Waiter {
    records: Records,
    policy: PollPolicy,
}

impl Waiter {
    pub fn new(records: Records, policy: PollPolicy) -> Self {
        Self { records, policy }
    }

    pub fn policy(&self) -> PollPolicy {
        self.policy
    }

    /// Polls the action execution until it is terminal.
    ///
    /// Makes at most `max_attempts` polls and does not sleep after the
    /// last one. A `failed` status ends the wait at once; a failure is
    /// final, not transient.
    pub async fn await_completion(
        &self,
        id: &ExecutionId,
        cancel: &CancellationToken,
    ) -> Result<ActionExecution, EngineError> {
        let attempts = self.policy.max_attempts;

        for attempt in 1..=attempts {
            let execution = self.records.action_execution(id).await?;
            debug!(
                "Poll {}/{} of execution {}: {}",
                attempt, attempts, id, execution.execution_status
            );

            match execution.execution_status {
                ActionStatus::Success => return Ok(execution),
                ActionStatus::Failed => {
                    return Err(EngineError::ActionExecutionFailed {
                        execution_id: id.clone(),
                    })
                }
                ActionStatus::Submitted => {}
            }

            if attempt < attempts {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(EngineError::Cancelled),
                    _ = tokio::time::sleep(self.policy.interval) => {}
                }
            }
        }

        Err(EngineError::ExecutionTimeout {
            execution_id: id.clone(),
            attempts,
        })
    }
}
