//! Workflow Definition Module
//!
//! Definitions the engine runs and the records that track each run.
//!
//! # Structure
//!
//! - [`model`]: Action and workflow definitions
//! - [`state`]: Action and workflow execution records
//! - [`parser`]: YAML definition bundles
//! - [`validator`]: Definition lint

pub mod model;
pub mod parser;
pub mod state;
pub mod validator;

pub use model::{ActionDefinition, DefinitionKey, StepDescriptor, Transition, WorkflowDefinition};
pub use parser::{load_bundle, seed_definitions, DefinitionBundle};
pub use state::{
    ActionExecution, ActionStatus, FailureReason, StepLedger, WorkflowExecution, WorkflowOutcome,
    WorkflowStatus,
};
pub use validator::validate_definition;
