//! Definition Data Model
//!
//! Immutable definitions the engine reads: actions (a container image
//! plus a parameter schema) and workflows (a graph of named steps linked by
//! success transitions).
//!
//! # Example YAML Format
//!
//! ```yaml
//! namespace: ops
//! workflow_name: restart-service
//! version: 1
//! entrypoint: drain
//! workflow:
//!   drain:
//!     action_namespace: core
//!     action_name: echo
//!     version: 1
//!     parameters: "draining node"
//!     on_success: restart
//!   restart:
//!     action_namespace: core
//!     action_name: wait
//!     version: 1
//!     parameters: { wait_seconds: 5 }
//!     on_success: complete_workflow
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Sentinel `on_success` value ending a workflow.
pub const COMPLETE_WORKFLOW: &str = "complete_workflow";

/// Lookup key of a versioned definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DefinitionKey {
    pub namespace: String,
    pub name: String,
    pub version: i64,
}

impl DefinitionKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, version: i64) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            version,
        }
    }
}

impl fmt::Display for DefinitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.namespace, self.name, self.version)
    }
}

/// A versioned action backed by a container image.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ActionDefinition {
    pub namespace: String,
    pub action_name: String,
    pub version: i64,

    /// Image registry/repository (e.g. "registry.local:5000/runners")
    pub container_repo: String,

    /// Image name (e.g. "runner-echo")
    pub container_name: String,

    /// Image tag
    pub container_tag: String,

    /// Reserved; parameters are not validated against it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameter_schema: Option<Value>,
}

impl ActionDefinition {
    pub fn new(
        namespace: impl Into<String>,
        action_name: impl Into<String>,
        version: i64,
        image: (&str, &str, &str),
    ) -> Self {
        let (repo, name, tag) = image;
        Self {
            namespace: namespace.into(),
            action_name: action_name.into(),
            version,
            container_repo: repo.to_string(),
            container_name: name.to_string(),
            container_tag: tag.to_string(),
            parameter_schema: None,
        }
    }

    /// Full image reference, `repo/name:tag`.
    pub fn image(&self) -> String {
        format!(
            "{}/{}:{}",
            self.container_repo, self.container_name, self.container_tag
        )
    }

    pub fn key(&self) -> DefinitionKey {
        DefinitionKey::new(&self.namespace, &self.action_name, self.version)
    }
}

/// Where a step goes after its action succeeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Transition {
    /// Continue with the named step.
    Step(String),
    /// The workflow is finished.
    Complete,
}

impl From<String> for Transition {
    fn from(value: String) -> Self {
        if value == COMPLETE_WORKFLOW {
            Self::Complete
        } else {
            Self::Step(value)
        }
    }
}

impl From<Transition> for String {
    fn from(value: Transition) -> Self {
        match value {
            Transition::Step(name) => name,
            Transition::Complete => COMPLETE_WORKFLOW.to_string(),
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Step(name) => f.write_str(name),
            Self::Complete => f.write_str(COMPLETE_WORKFLOW),
        }
    }
}

/// One step of a workflow: which action to run and where to go next.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StepDescriptor {
    pub action_namespace: String,
    pub action_name: String,
    pub version: i64,

    /// Opaque payload handed to the action's container
    #[serde(default)]
    pub parameters: Value,

    pub on_success: Transition,
}

impl StepDescriptor {
    /// Creates a step that completes the workflow on success.
    pub fn new(action_namespace: impl Into<String>, action_name: impl Into<String>, version: i64) -> Self {
        Self {
            action_namespace: action_namespace.into(),
            action_name: action_name.into(),
            version,
            parameters: Value::Null,
            on_success: Transition::Complete,
        }
    }

    pub fn with_parameters(mut self, parameters: impl Into<Value>) -> Self {
        self.parameters = parameters.into();
        self
    }

    /// Continues with `step` after this one succeeds.
    pub fn then(mut self, step: impl Into<String>) -> Self {
        self.on_success = Transition::Step(step.into());
        self
    }

    pub fn action_key(&self) -> DefinitionKey {
        DefinitionKey::new(&self.action_namespace, &self.action_name, self.version)
    }
}

/// A versioned graph of steps.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WorkflowDefinition {
    pub namespace: String,
    pub workflow_name: String,
    pub version: i64,

    /// Name of the first step
    pub entrypoint: String,

    /// Steps by name
    #[serde(rename = "workflow", alias = "steps", default)]
    pub steps: BTreeMap<String, StepDescriptor>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameter_schema: Option<Value>,
}

impl WorkflowDefinition {
    pub fn new(
        namespace: impl Into<String>,
        workflow_name: impl Into<String>,
        version: i64,
        entrypoint: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            workflow_name: workflow_name.into(),
            version,
            entrypoint: entrypoint.into(),
            steps: BTreeMap::new(),
            parameter_schema: None,
        }
    }

    /// Adds or replaces a step.
    pub fn with_step(mut self, name: impl Into<String>, step: StepDescriptor) -> Self {
        self.steps.insert(name.into(), step);
        self
    }

    pub fn step(&self, name: &str) -> Option<&StepDescriptor> {
        self.steps.get(name)
    }

    pub fn key(&self) -> DefinitionKey {
        DefinitionKey::new(&self.namespace, &self.workflow_name, self.version)
    }

    /// Returns the number of steps in the workflow.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns true if the workflow has no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}
