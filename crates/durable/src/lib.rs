//! # Durable Execution Engine
//!
//! Replay-based orchestration for workflows that run for weeks or months
//! across process restarts and redeployments.
//!
//! ## Features
//!
//! - **Memoized steps**: a named step runs at most once per instance; replays read its recorded result
//! - **Durable sleeps**: wake times are persisted once and compared on every resume
//! - **Unbounded loops**: loop bodies derive step names from the iteration index
//! - **Automatic retries**: configurable retry policies with exponential backoff and jitter
//! - **Per-instance mutual exclusion**: leases plus compare-and-set records
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      WakeScheduler                           │
//! │  (polls for elapsed sleeps and stale resumes)                │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      WorkflowExecutor                        │
//! │  (leases the instance, replays the body, applies outcome)    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      WorkflowStore                           │
//! │  (PostgreSQL: instances, step records, sleep records)        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use lifecycle_durable::prelude::*;
//!
//! struct Digest { mailer: Arc<Mailer> }
//!
//! #[async_trait]
//! impl Workflow for Digest {
//!     const TYPE: &'static str = "digest";
//!     type Input = DigestInput;
//!
//!     async fn run(&self, ctx: &WorkflowContext, input: DigestInput)
//!         -> Result<Infallible, WorkflowInterrupt>
//!     {
//!         let mut week = 0;
//!         loop {
//!             let mailer = &self.mailer;
//!             let to = input.email.as_str();
//!             ctx.step(iteration_name("send-digest", week), move || mailer.send(to)).await?;
//!             ctx.sleep(iteration_name("wait-a-week", week), WEEK).await?;
//!             week += 1;
//!         }
//!     }
//! }
//! ```

pub mod clock;
pub mod engine;
pub mod persistence;
pub mod reliability;
pub mod scheduler;
pub mod workflow;

pub(crate) mod serde_millis;

/// Prelude for common imports
pub mod prelude {
    pub use crate::clock::{Clock, ManualClock, SystemClock};
    pub use crate::engine::{ExecutorConfig, ExecutorError, ResumeReport, WorkflowExecutor};
    pub use crate::persistence::{
        InMemoryWorkflowStore, PostgresWorkflowStore, StoreError, WorkflowInstance,
        WorkflowStatus, WorkflowStore,
    };
    pub use crate::reliability::RetryPolicy;
    pub use crate::scheduler::{SchedulerConfig, WakeScheduler};
    pub use crate::workflow::{
        iteration_name, StepError, ValidationError, Workflow, WorkflowContext, WorkflowError,
        WorkflowInterrupt,
    };
    pub use async_trait::async_trait;
    pub use std::convert::Infallible;
}

// Re-export key types at crate root
pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{ExecutorConfig, ExecutorError, ResumeReport, WorkflowExecutor, WorkflowRegistry};
pub use persistence::{
    InMemoryWorkflowStore, PostgresWorkflowStore, StoreError, WorkflowInstance, WorkflowStatus,
    WorkflowStore,
};
pub use reliability::RetryPolicy;
pub use scheduler::{SchedulerConfig, SchedulerError, WakeScheduler};
pub use workflow::{
    error_codes, iteration_name, StepError, ValidationError, Workflow, WorkflowContext,
    WorkflowError, WorkflowInterrupt,
};
