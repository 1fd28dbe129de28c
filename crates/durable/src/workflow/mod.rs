//! Workflow abstractions and types
//!
//! This module contains the core workflow primitives:
//! - [`Workflow`] trait for defining replayable workflow bodies
//! - [`WorkflowContext`] with memoized `step` and durable `sleep`
//! - [`WorkflowInterrupt`] for the ways a body stops
//! - [`StepError`] for failures inside a step body

mod context;
mod definition;
mod step;

pub use context::{iteration_name, Journal, WorkflowContext, WorkflowInterrupt, DUPLICATE_OPERATION};
pub(crate) use context::lease_expiry;
pub use definition::{error_codes, ValidationError, Workflow, WorkflowError};
pub use step::StepError;
