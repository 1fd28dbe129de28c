//! Workflow trait definition

use std::convert::Infallible;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use super::{WorkflowContext, WorkflowInterrupt};

/// Well-known [`WorkflowError`] codes set by the engine
pub mod error_codes {
    /// A step failed after exhausting its retry policy
    pub const STEP_FAILED: &str = "STEP_FAILED";

    /// A step result could not be encoded or decoded
    pub const STEP_RESULT_INVALID: &str = "STEP_RESULT_INVALID";

    /// A sleep duration does not fit the timestamp range
    pub const INVALID_DURATION: &str = "INVALID_DURATION";

    /// The stored input no longer deserializes into the workflow's input type
    pub const INVALID_INPUT: &str = "INVALID_INPUT";

    /// The instance names a workflow type this process does not know
    pub const UNKNOWN_WORKFLOW: &str = "UNKNOWN_WORKFLOW";

    /// The body reached more steps and sleeps in one resume than allowed
    pub const OPERATION_LIMIT: &str = "OPERATION_LIMIT";
}

/// Error that terminates a workflow instance (status `Failed`)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkflowError {
    /// Error message
    pub message: String,

    /// Error code for programmatic handling
    pub code: Option<String>,
}

impl WorkflowError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

impl std::fmt::Display for WorkflowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for WorkflowError {}

/// Rejected workflow input; no instance is created
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {field}: {message}")]
pub struct ValidationError {
    /// Offending field (or `payload` when the shape itself is wrong)
    pub field: String,

    /// Human-readable reason
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Payload that does not match the workflow's input shape
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new("payload", message)
    }
}

/// A durable workflow definition
///
/// The body in [`run`](Workflow::run) is re-executed from the top on every
/// resume. All side effects must go through [`WorkflowContext::step`] and
/// all waiting through [`WorkflowContext::sleep`], so that replay reads
/// recorded results instead of repeating work.
///
/// # Determinism
///
/// Step and sleep names, and the order they are reached in, must depend
/// only on the input and on values returned by earlier steps. Loop bodies
/// derive their names from the loop index via
/// [`iteration_name`](super::iteration_name).
///
/// # Termination
///
/// The body returns `Result<Infallible, _>`: it can only leave through a
/// [`WorkflowInterrupt`] (suspension, cancellation, failure, or a store
/// error). There is no completed outcome.
///
/// # Example
///
/// ```ignore
/// struct Reminder;
///
/// #[async_trait]
/// impl Workflow for Reminder {
///     const TYPE: &'static str = "reminder";
///     type Input = ReminderInput;
///
///     async fn run(
///         &self,
///         ctx: &WorkflowContext,
///         input: Self::Input,
///     ) -> Result<Infallible, WorkflowInterrupt> {
///         let mut i = 0;
///         loop {
///             ctx.step(iteration_name("remind", i), || send(&input)).await?;
///             ctx.sleep(iteration_name("pause", i), Duration::from_secs(86_400)).await?;
///             i += 1;
///         }
///     }
/// }
/// ```
#[async_trait]
pub trait Workflow: Send + Sync + 'static {
    /// Unique definition identifier, used to look the workflow up on resume
    const TYPE: &'static str;

    /// Input payload, stored as JSON on the instance
    type Input: Serialize + DeserializeOwned + Send + Sync + Clone;

    /// Check the input before an instance is created
    fn validate(&self, input: &Self::Input) -> Result<(), ValidationError> {
        let _ = input;
        Ok(())
    }

    /// The workflow body
    async fn run(
        &self,
        ctx: &WorkflowContext,
        input: Self::Input,
    ) -> Result<Infallible, WorkflowInterrupt>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workflow_error_display() {
        let error = WorkflowError::new("something went wrong");
        assert_eq!(error.to_string(), "something went wrong");
    }

    #[test]
    fn test_workflow_error_with_code() {
        let error = WorkflowError::new("gave up").with_code(error_codes::STEP_FAILED);
        assert_eq!(error.code.as_deref(), Some("STEP_FAILED"));
    }

    #[test]
    fn test_validation_error_display() {
        let error = ValidationError::new("email", "must not be empty");
        assert_eq!(error.to_string(), "invalid email: must not be empty");
        assert_eq!(ValidationError::malformed("x").field, "payload");
    }
}
