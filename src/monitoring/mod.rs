//! Run Monitoring Module
//!
//! # Components
//!
//! - [`ExecutionTimeline`]: Step dispatch and completion timing

pub mod timeline;

pub use timeline::{ExecutionTimeline, SpanOutcome, StepSpan};
