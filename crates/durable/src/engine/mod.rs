//! Workflow execution engine
//!
//! The engine module provides the `WorkflowExecutor` which resumes
//! workflow instances by replaying their bodies against the store.

mod executor;
mod registry;

pub use executor::{ExecutorConfig, ExecutorError, ResumeReport, WorkflowExecutor};
pub use registry::{AnyWorkflow, RegistryError, WorkflowRegistry};
