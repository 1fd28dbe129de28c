//! Workflow registry for type-erased workflow execution
//!
//! The registry maps workflow type names to registered workflow values so
//! the executor can resume an instance knowing only its stored type name
//! and JSON input.

use std::collections::HashMap;
use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::workflow::{error_codes, ValidationError, Workflow, WorkflowContext, WorkflowInterrupt};

/// Type-erased workflow interface
///
/// This trait allows the executor to work with workflows without knowing
/// their concrete types. Inputs are JSON.
#[async_trait]
pub trait AnyWorkflow: Send + Sync {
    /// Get the workflow type identifier
    fn workflow_type(&self) -> &'static str;

    /// Decode and validate a submitted payload
    fn validate_input(&self, input: &Value) -> Result<(), ValidationError>;

    /// Run the body against a stored JSON input
    async fn run_json(
        &self,
        ctx: &WorkflowContext,
        input: Value,
    ) -> Result<Infallible, WorkflowInterrupt>;
}

/// Wrapper to implement AnyWorkflow for any Workflow
struct WorkflowWrapper<W: Workflow> {
    inner: W,
}

#[async_trait]
impl<W: Workflow> AnyWorkflow for WorkflowWrapper<W> {
    fn workflow_type(&self) -> &'static str {
        W::TYPE
    }

    fn validate_input(&self, input: &Value) -> Result<(), ValidationError> {
        let typed: W::Input = serde_json::from_value(input.clone())
            .map_err(|e| ValidationError::malformed(e.to_string()))?;
        self.inner.validate(&typed)
    }

    async fn run_json(
        &self,
        ctx: &WorkflowContext,
        input: Value,
    ) -> Result<Infallible, WorkflowInterrupt> {
        let typed: W::Input = serde_json::from_value(input).map_err(|e| {
            WorkflowInterrupt::fail(
                format!("stored input does not decode: {e}"),
                error_codes::INVALID_INPUT,
            )
        })?;
        self.inner.run(ctx, typed).await
    }
}

/// Registry of workflow definitions
pub struct WorkflowRegistry {
    workflows: HashMap<String, Arc<dyn AnyWorkflow>>,
}

impl Default for WorkflowRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkflowRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            workflows: HashMap::new(),
        }
    }

    /// Register a workflow definition under its `TYPE`
    ///
    /// Registering the same type twice replaces the earlier definition.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let mut registry = WorkflowRegistry::new();
    /// registry.register(OnboardingWorkflow::new(evaluator, dispatcher));
    /// ```
    pub fn register<W: Workflow>(&mut self, workflow: W) {
        self.workflows.insert(
            W::TYPE.to_string(),
            Arc::new(WorkflowWrapper { inner: workflow }),
        );
    }

    /// Check if a workflow type is registered
    pub fn contains(&self, workflow_type: &str) -> bool {
        self.workflows.contains_key(workflow_type)
    }

    /// Look up a workflow by type name
    pub fn get(&self, workflow_type: &str) -> Result<Arc<dyn AnyWorkflow>, RegistryError> {
        self.workflows
            .get(workflow_type)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownWorkflowType(workflow_type.to_string()))
    }

    /// Get the number of registered workflow types
    pub fn len(&self) -> usize {
        self.workflows.len()
    }

    /// Check if registry is empty
    pub fn is_empty(&self) -> bool {
        self.workflows.is_empty()
    }

    /// Get all registered workflow type names
    pub fn workflow_types(&self) -> impl Iterator<Item = &str> {
        self.workflows.keys().map(|s| s.as_str())
    }
}

impl fmt::Debug for WorkflowRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowRegistry")
            .field("workflow_types", &self.workflows.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Errors from registry operations
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Workflow type not registered
    #[error("unknown workflow type: {0}")]
    UnknownWorkflowType(String),
}
