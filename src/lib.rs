//! Runbook Engine - Workflow Orchestration for Container Runbooks
//!
//! Runs declarative workflows whose steps are versioned, container-backed
//! actions. Each step is dispatched to a compute fabric, its result is
//! posted back asynchronously, and the engine follows success transitions
//! until the workflow completes or a step fails.
//!
//! # Architecture
//!
//! - [`id`]: Execution identifier codec
//! - [`store`]: Execution record store and its backends
//! - [`workflow`]: Definitions, execution records, bundles and validation
//! - [`fabric`]: Compute fabric boundary (Kubernetes Jobs via kubectl)
//! - [`execution`]: Dispatcher, completion waiter, orchestrator, result ingestion
//! - [`monitoring`]: Per-run step timeline
//! - [`api`]: HTTP surface
//! - [`config`]: Engine configuration
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use runbook_engine::{EngineConfig, FileStore, KubectlFabric, Orchestrator, Records};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = EngineConfig::resolve(None)?;
//! let store = FileStore::open(&config.store.path).await?;
//! let records = Records::new(Arc::new(store));
//! let fabric = Arc::new(KubectlFabric::from_config(&config.fabric, false));
//!
//! let orchestrator = Orchestrator::new(records, fabric, &config);
//! orchestrator
//!     .execute("663a8c84bbe4cf949c6e51e4", CancellationToken::new())
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod execution;
pub mod fabric;
pub mod id;
pub mod monitoring;
pub mod store;
pub mod workflow;

// Re-export commonly used types
pub use config::EngineConfig;
pub use error::EngineError;
pub use execution::{Orchestrator, ResultIngestion, RunnerReport};
pub use fabric::{ComputeFabric, KubectlFabric};
pub use id::ExecutionId;
pub use store::{FileStore, MemoryStore, RecordStore, Records};
pub use workflow::{load_bundle, validate_definition, WorkflowDefinition};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "Runbook Engine";
