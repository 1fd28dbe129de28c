//! Persistence layer for durable execution
//!
//! This module provides:
//! - [`WorkflowStore`] trait for instances, step records, and sleep records
//! - [`InMemoryWorkflowStore`] for testing
//! - [`PostgresWorkflowStore`] for production

mod memory;
mod postgres;
mod store;

pub use memory::InMemoryWorkflowStore;
pub use postgres::PostgresWorkflowStore;
pub use store::{
    SleepRecord, StatusUpdate, StepRecord, StoreError, WorkflowInstance, WorkflowStatus,
    WorkflowStore,
};
