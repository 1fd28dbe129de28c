//! Host scheduler
//!
//! - [`WakeScheduler`] - resumes instances whose sleeps elapsed

mod wake;

pub use wake::{SchedulerConfig, SchedulerError, TickSummary, WakeScheduler};
