//! Wake polling with exponential backoff
//!
//! Finds instances whose sleeps elapsed (or whose last resume never
//! finished) and resumes them. Resume is idempotent, so the scheduler
//! keeps no bookkeeping of its own.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::engine::{ExecutorError, WorkflowExecutor};
use crate::persistence::StoreError;

/// Polling configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchedulerConfig {
    /// Minimum poll interval (while instances are due)
    #[serde(with = "crate::serde_millis")]
    pub min_interval: Duration,

    /// Maximum poll interval (when idle)
    #[serde(with = "crate::serde_millis")]
    pub max_interval: Duration,

    /// Backoff multiplier when nothing is due
    pub backoff_multiplier: f64,

    /// Maximum instances to resume per poll
    pub batch_size: usize,

    /// Pending/Running instances untouched for this long are resumed again
    #[serde(with = "crate::serde_millis")]
    pub stale_after: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(30),
            backoff_multiplier: 1.5,
            batch_size: 50,
            stale_after: Duration::from_secs(600),
        }
    }
}

impl SchedulerConfig {
    /// Set minimum poll interval
    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    /// Set maximum poll interval
    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    /// Set backoff multiplier
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier.max(1.0);
        self
    }

    /// Set batch size
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }
}

/// Outcome of one poll
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    /// Instances returned by the store
    pub due: usize,
    /// Resumes that returned Ok
    pub resumed: usize,
    /// Resumes that returned an error
    pub failed: usize,
}

/// Scheduler errors
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// Store error
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Wake scheduler with adaptive backoff
///
/// Polls the store for resumable instances, resets to the minimum
/// interval when it found work, and backs off toward the maximum when idle.
pub struct WakeScheduler {
    executor: Arc<WorkflowExecutor>,
    config: SchedulerConfig,
    current_interval: Duration,
    shutdown_rx: watch::Receiver<bool>,
}

impl WakeScheduler {
    /// Create a new wake scheduler
    pub fn new(
        executor: Arc<WorkflowExecutor>,
        config: SchedulerConfig,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            executor,
            current_interval: config.min_interval,
            config,
            shutdown_rx,
        }
    }

    /// Poll once and resume every due instance
    #[instrument(skip(self))]
    pub async fn tick(&mut self) -> Result<TickSummary, SchedulerError> {
        let now = self.executor.clock().now();
        let stale_after = chrono::Duration::from_std(self.config.stale_after)
            .unwrap_or_else(|_| chrono::Duration::minutes(10));

        let due = self
            .executor
            .store()
            .list_resumable(now, now - stale_after, self.config.batch_size)
            .await?;

        let mut summary = TickSummary {
            due: due.len(),
            ..TickSummary::default()
        };

        if due.is_empty() {
            self.increase_backoff();
            trace!(
                interval_ms = self.current_interval.as_millis() as u64,
                "nothing due, backing off"
            );
            return Ok(summary);
        }

        self.reset_backoff();
        debug!(count = due.len(), "resuming due instances");

        for instance_id in due {
            if self.is_shutdown() {
                break;
            }
            match self.executor.resume(instance_id).await {
                Ok(report) => {
                    summary.resumed += 1;
                    debug!(%instance_id, status = %report.status, "resumed");
                }
                Err(ExecutorError::InstanceBusy(_) | ExecutorError::LeaseLost(_)) => {
                    summary.failed += 1;
                    debug!(%instance_id, "instance busy, will retry next poll");
                }
                Err(e) => {
                    summary.failed += 1;
                    error!(%instance_id, error = %e, "resume failed");
                }
            }
        }

        Ok(summary)
    }

    /// Wait for the current backoff interval
    ///
    /// Returns `true` if shutdown was signaled while waiting.
    pub async fn wait(&mut self) -> bool {
        let mut shutdown_rx = self.shutdown_rx.clone();
        tokio::select! {
            _ = tokio::time::sleep(self.current_interval) => false,
            _ = shutdown_rx.changed() => {
                debug!("shutdown signal received during wait");
                true
            }
        }
    }

    /// Poll until shutdown
    pub async fn run(mut self) {
        info!(
            min_interval_ms = self.config.min_interval.as_millis() as u64,
            max_interval_ms = self.config.max_interval.as_millis() as u64,
            "wake scheduler started"
        );

        while !self.is_shutdown() {
            if let Err(e) = self.tick().await {
                warn!(error = %e, "scheduler poll failed");
                self.increase_backoff();
            }
            if self.wait().await {
                break;
            }
        }

        info!("wake scheduler stopped");
    }

    /// Run on a background task
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Get the current poll interval
    pub fn current_interval(&self) -> Duration {
        self.current_interval
    }

    /// Check if shutdown has been requested
    pub fn is_shutdown(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    /// Reset backoff to minimum interval
    fn reset_backoff(&mut self) {
        self.current_interval = self.config.min_interval;
    }

    /// Increase backoff interval
    fn increase_backoff(&mut self) {
        let new_interval = Duration::from_secs_f64(
            self.current_interval.as_secs_f64() * self.config.backoff_multiplier,
        );
        self.current_interval = new_interval.min(self.config.max_interval);
    }
}
