//! Workflow Execution Module
//!
//! The orchestration core: dispatching actions, waiting for their results,
//! walking workflow graphs and ingesting runner postbacks.
//!
//! # Architecture
//!
//! - [`engine`]: Workflow orchestrator (the traversal state machine)
//! - [`dispatcher`]: Hands one action to the compute fabric
//! - [`waiter`]: Polls an action execution until it finishes
//! - [`ingest`]: Records results posted back by runners

pub mod dispatcher;
pub mod engine;
pub mod ingest;
pub mod waiter;

#[cfg(test)]
pub(crate) mod testing;

pub use dispatcher::Dispatcher;
pub use engine::Orchestrator;
pub use ingest::{IngestOutcome, ResultIngestion, RunnerReport};
pub use waiter::{PollPolicy, Waiter};
