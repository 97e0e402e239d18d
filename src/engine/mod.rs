// src/engine/mod.rs

//! Execution engine.
//!
//! - [`readiness`] decides which nodes of a level run, skip or wait.
//! - [`runner`] executes a single node and records its result.
//! - [`scheduler`] drives the levels with bounded concurrency and the
//!   configured error strategy.
//! - [`projector`] decodes the output node's result.
//! - [`run`] seeds state, applies the run deadline and ties it together.
//! - [`hooks`] defines the observability callbacks.

pub mod hooks;
pub mod projector;
pub mod readiness;
pub mod run;
pub mod runner;
pub mod scheduler;

pub use hooks::{ExecutionHooks, NoopHooks, TracingHooks};
pub use projector::ResultProjector;
pub use readiness::{Readiness, ReadinessFilter};
pub use run::{ExecutionOutput, RunMetadata, StatusCounts};
pub use runner::{NodeOutcome, NodeRunner};
pub use scheduler::LevelScheduler;
