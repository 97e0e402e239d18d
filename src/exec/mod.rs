// src/exec/mod.rs

//! Built-in node executors.
//!
//! - [`func`] adapts async closures, the usual way to embed business logic.
//! - [`command`] runs a shell command per node; config-defined graphs use it.

pub mod command;
pub mod func;

pub use command::CommandExecutor;
pub use func::FnExecutor;
