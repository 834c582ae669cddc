//! Definition Bundle Parser
//!
//! Loads action and workflow definitions from YAML bundle files and seeds
//! them into the record store.
//!
//! # Bundle Format
//!
//! ```yaml
//! actions:
//!   - namespace: core
//!     action_name: echo
//!     version: 1
//!     container_repo: registry.local:5000/runners
//!     container_name: runner-echo
//!     container_tag: "1"
//! workflows:
//!   - namespace: ops
//!     workflow_name: greet
//!     version: 1
//!     entrypoint: hello
//!     workflow:
//!       hello:
//!         action_namespace: core
//!         action_name: echo
//!         version: 1
//!         parameters: "hello"
//!         on_success: complete_workflow
//! ```

use std::error::Error;
use std::fs;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use super::model::{ActionDefinition, WorkflowDefinition};
use super::validator::{describe, validate_definition};
use crate::error::EngineError;
use crate::store::Records;

/// Definitions read from one bundle file.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct DefinitionBundle {
    #[serde(default)]
    pub actions: Vec<ActionDefinition>,

    #[serde(default)]
    pub workflows: Vec<WorkflowDefinition>,
}

impl DefinitionBundle {
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty() && self.workflows.is_empty()
    }
}

/// What seeding a bundle changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub actions_inserted: usize,
    pub workflows_inserted: usize,
    /// Definitions already present under the same key
    pub unchanged: usize,
    /// Workflows that failed validation
    pub rejected: usize,
}

/// Parses a bundle from YAML text.
pub fn parse_bundle(yaml_content: &str) -> Result<DefinitionBundle, Box<dyn Error>> {
    let bundle: DefinitionBundle = serde_yaml::from_str(yaml_content).map_err(|e| {
        format!(
            "Failed to parse definition bundle: {}. Check the file format.",
            e
        )
    })?;

    info!(
        "Parsed {} action definitions, {} workflow definitions",
        bundle.actions.len(),
        bundle.workflows.len()
    );
    Ok(bundle)
}

/// Loads a definition bundle from a YAML file.
///
/// # Example
///
/// ```rust,no_run
/// use runbook_engine::workflow::load_bundle;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let bundle = load_bundle("definitions.yaml")?;
///     println!("Loaded {} workflows", bundle.workflows.len());
///     Ok(())
/// }
/// ```
pub fn load_bundle(path: &str) -> Result<DefinitionBundle, Box<dyn Error>> {
    info!("Loading definitions from: {}", path);

    let yaml_content = fs::read_to_string(path).map_err(|e| {
        format!(
            "Failed to read definition file '{}': {}. Check that the file exists and is readable.",
            path, e
        )
    })?;

    debug!("YAML content loaded ({} bytes)", yaml_content.len());
    parse_bundle(&yaml_content)
}

/// Inserts the bundle's definitions that are not stored yet.
///
/// Workflows failing validation are skipped with a warning; existing
/// definitions with the same key are left untouched.
pub async fn seed_definitions(
    records: &Records,
    bundle: &DefinitionBundle,
) -> Result<SeedReport, EngineError> {
    let mut report = SeedReport::default();

    for action in &bundle.actions {
        if records.put_action_definition(action).await? {
            debug!("Stored action definition {}", action.key());
            report.actions_inserted += 1;
        } else {
            report.unchanged += 1;
        }
    }

    for workflow in &bundle.workflows {
        if let Err(errors) = validate_definition(workflow) {
            warn!(
                "Skipping workflow definition {}:\n{}",
                workflow.key(),
                describe(&errors)
            );
            report.rejected += 1;
            continue;
        }

        if records.put_workflow_definition(workflow).await? {
            debug!("Stored workflow definition {}", workflow.key());
            report.workflows_inserted += 1;
        } else {
            report.unchanged += 1;
        }
    }

    info!(
        "Seeded definitions: {} actions, {} workflows inserted, {} unchanged, {} rejected",
        report.actions_inserted, report.workflows_inserted, report.unchanged, report.rejected
    );
    Ok(report)
}
