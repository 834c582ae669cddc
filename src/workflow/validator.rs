//! Workflow Definition Validation
//!
//! Lints a workflow definition before it is stored:
//! - Steps and entrypoint present
//! - Step fields filled in
//! - Success transitions point at existing steps
//! - The success chain from the entrypoint reaches `complete_workflow`
//!
//! The orchestrator runs definitions without calling this; a broken
//! definition there surfaces as a traversal fault instead.

use std::collections::HashSet;

use log::{debug, info, warn};

use super::model::{Transition, WorkflowDefinition, COMPLETE_WORKFLOW};

/// Validation error types for user-friendly error messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    EmptyWorkflow,
    EmptyStepName,
    MissingEntrypoint(String),
    EmptyAction(String),
    UnknownTarget { step: String, target: String },
    Cycle { step: String },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyWorkflow => write!(f, "Workflow has no steps"),
            Self::EmptyStepName => write!(f, "Step has empty or whitespace-only name"),
            Self::MissingEntrypoint(name) => {
                write!(f, "Entrypoint '{}' is not a step of the workflow", name)
            }
            Self::EmptyAction(step) => {
                write!(f, "Step '{}' has no action namespace or name", step)
            }
            Self::UnknownTarget { step, target } => {
                write!(f, "Step '{}' continues with unknown step '{}'", step, target)
            }
            Self::Cycle { step } => write!(
                f,
                "Success chain revisits step '{}' and never reaches '{}'",
                step, COMPLETE_WORKFLOW
            ),
        }
    }
}

/// Validates a workflow definition.
///
/// On success returns the step names of the success chain, in the order
/// they would run. On failure returns every structural problem found; the
/// chain is only walked once the structure is sound.
pub fn validate_definition(workflow: &WorkflowDefinition) -> Result<Vec<String>, Vec<ValidationError>> {
    info!(
        "Validating workflow '{}' with {} steps",
        workflow.key(),
        workflow.len()
    );

    if workflow.is_empty() {
        return Err(vec![ValidationError::EmptyWorkflow]);
    }

    let mut errors = Vec::new();

    if !workflow.steps.contains_key(&workflow.entrypoint) {
        errors.push(ValidationError::MissingEntrypoint(workflow.entrypoint.clone()));
    }

    for (name, step) in &workflow.steps {
        if name.trim().is_empty() {
            errors.push(ValidationError::EmptyStepName);
            continue;
        }

        if step.action_namespace.trim().is_empty() || step.action_name.trim().is_empty() {
            errors.push(ValidationError::EmptyAction(name.clone()));
        }

        if let Transition::Step(target) = &step.on_success {
            if !workflow.steps.contains_key(target) {
                errors.push(ValidationError::UnknownTarget {
                    step: name.clone(),
                    target: target.clone(),
                });
            }
        }
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    let chain = success_chain(workflow).map_err(|e| vec![e])?;

    let reachable: HashSet<&str> = chain.iter().map(String::as_str).collect();
    for name in workflow.steps.keys() {
        if !reachable.contains(name.as_str()) {
            warn!("Step '{}' is not reachable from the entrypoint", name);
        }
    }

    info!(
        "Workflow '{}' validated: {} of {} steps on the success chain",
        workflow.key(),
        chain.len(),
        workflow.len()
    );
    Ok(chain)
}

/// Follows `on_success` from the entrypoint until the sentinel.
///
/// Each step has a single successor, so revisiting any step means the
/// chain loops forever.
fn success_chain(workflow: &WorkflowDefinition) -> Result<Vec<String>, ValidationError> {
    let mut chain = Vec::new();
    let mut visited = HashSet::new();
    let mut current = workflow.entrypoint.clone();

    loop {
        if !visited.insert(current.clone()) {
            return Err(ValidationError::Cycle { step: current });
        }
        chain.push(current.clone());

        let step = workflow
            .step(&current)
            .ok_or_else(|| ValidationError::MissingEntrypoint(current.clone()))?;

        match &step.on_success {
            Transition::Complete => {
                debug!("Step '{}' completes the workflow", current);
                return Ok(chain);
            }
            Transition::Step(next) => {
                debug!("Step '{}' continues with '{}'", current, next);
                current = next.clone();
            }
        }
    }
}

/// Joins validation errors into one message, one error per line.
pub fn describe(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}
