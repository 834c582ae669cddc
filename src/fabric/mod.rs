//! Compute Fabric Boundary
//!
//! The compute fabric runs one container per dispatched action and the
//! container reports back through the postback URL it is given. Submission
//! is fire-and-forget: success means "accepted for execution", and the
//! fabric offers no way to cancel work once accepted.
//!
//! - [`KubectlFabric`]: renders a Kubernetes Job and applies it with kubectl

pub mod kubectl;

pub use kubectl::KubectlFabric;

use async_trait::async_trait;
use thiserror::Error;

/// Runner arguments (the step's parameters).
pub const ENV_RUNNER_ARGS: &str = "RUNNER_ARGS";
/// Worker identity, assigned by the fabric.
pub const ENV_POD_ID: &str = "POD_ID";
/// Dispatch identifier.
pub const ENV_JOB_ID: &str = "JOB_ID";
/// Action execution record the worker reports on.
pub const ENV_EXECUTION_ID: &str = "EXECUTION_ID";
/// Base URL the worker posts its result to.
pub const ENV_POSTBACK_BASE_URL: &str = "POSTBACK_BASE_URL";

/// Value of an environment entry handed to a unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvValue {
    Literal(String),
    /// Filled in by the fabric with the worker's own name.
    PodName,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvVar {
    pub name: String,
    pub value: EnvValue,
}

impl EnvVar {
    pub fn literal(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: EnvValue::Literal(value.into()),
        }
    }

    pub fn pod_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: EnvValue::PodName,
        }
    }
}

/// One unit of work for the fabric.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRequest {
    /// Dispatch identifier, also used as the unit's name
    pub job_id: String,

    /// Container image reference
    pub image: String,

    pub env: Vec<EnvVar>,
}

impl JobRequest {
    /// Looks up an environment entry by name.
    pub fn env_value(&self, name: &str) -> Option<&EnvValue> {
        self.env.iter().find(|var| var.name == name).map(|var| &var.value)
    }

    /// Looks up a literal environment entry by name.
    pub fn literal(&self, name: &str) -> Option<&str> {
        match self.env_value(name) {
            Some(EnvValue::Literal(value)) => Some(value),
            _ => None,
        }
    }
}

/// Errors raised while handing work to the fabric.
#[derive(Debug, Error)]
pub enum FabricError {
    #[error("failed to launch fabric client: {0}")]
    Launch(#[from] std::io::Error),

    #[error("failed to render job manifest: {0}")]
    Manifest(#[from] serde_yaml::Error),

    #[error("fabric rejected job '{job_id}': {message}")]
    Rejected { job_id: String, message: String },
}

/// Schedules units of work.
#[async_trait]
pub trait ComputeFabric: Send + Sync {
    /// Accepts a unit of work for execution. Returns once accepted.
    async fn submit(&self, request: &JobRequest) -> Result<(), FabricError>;
}
