//! Onboarding workflow definition
//!
//! ```text
//! new-signup ─▶ wait-for-3-days ─▶ ┌▶ check-user-state#i
//!                                  │      ├─ non-active ─▶ send-email-non-active#i
//!                                  │      └─ active ─────▶ send-email-active#i
//!                                  └── wait-for-1-month#i ◀┘
//! ```

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lifecycle_durable::{
    iteration_name, ValidationError, Workflow, WorkflowContext, WorkflowInterrupt,
};
use tracing::warn;

use crate::activity::{ActivityEvaluator, StateCheck, UserState};
use crate::notify::{Notification, NotificationDispatcher};
use crate::payload::OnboardingPayload;

/// Step and sleep names; loop names get an `#iteration` suffix
pub mod step_names {
    pub const NEW_SIGNUP: &str = "new-signup";
    pub const WAIT_FOR_3_DAYS: &str = "wait-for-3-days";
    pub const CHECK_USER_STATE: &str = "check-user-state";
    pub const SEND_EMAIL_NON_ACTIVE: &str = "send-email-non-active";
    pub const SEND_EMAIL_ACTIVE: &str = "send-email-active";
    pub const WAIT_FOR_1_MONTH: &str = "wait-for-1-month";
}

/// Failure code when the user directory keeps failing
pub const STATE_LOOKUP_FAILED: &str = "STATE_LOOKUP_FAILED";

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Timing and failure tolerance of the onboarding workflow
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnboardingConfig {
    /// Sleep between the welcome email and the first check
    pub initial_delay: Duration,
    /// Sleep between checks
    pub check_interval: Duration,
    /// Failed lookups tolerated in a row before the instance fails
    pub max_consecutive_lookup_failures: u32,
}

impl Default for OnboardingConfig {
    fn default() -> Self {
        Self {
            initial_delay: 3 * DAY,
            check_interval: 30 * DAY,
            max_consecutive_lookup_failures: 3,
        }
    }
}

impl OnboardingConfig {
    /// Longest sleep either interval may ask for
    pub const MAX_INTERVAL: Duration = Duration::from_secs(3650 * 24 * 60 * 60);

    /// Reject intervals that would spin the loop or overflow a wake time
    pub fn validate(&self) -> Result<(), ValidationError> {
        check_interval("initial_delay", self.initial_delay)?;
        check_interval("check_interval", self.check_interval)
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    pub fn with_max_consecutive_lookup_failures(mut self, max: u32) -> Self {
        self.max_consecutive_lookup_failures = max;
        self
    }
}

fn check_interval(field: &str, interval: Duration) -> Result<(), ValidationError> {
    if interval.is_zero() {
        return Err(ValidationError::new(field, "must be greater than zero"));
    }
    if interval > OnboardingConfig::MAX_INTERVAL {
        return Err(ValidationError::new(
            field,
            format!(
                "must not exceed {} seconds",
                OnboardingConfig::MAX_INTERVAL.as_secs()
            ),
        ));
    }
    Ok(())
}

/// Welcome email, then a state-dependent check-in every month, forever
pub struct OnboardingWorkflow {
    evaluator: Arc<ActivityEvaluator>,
    dispatcher: Arc<NotificationDispatcher>,
    config: OnboardingConfig,
}

impl OnboardingWorkflow {
    pub fn new(evaluator: Arc<ActivityEvaluator>, dispatcher: Arc<NotificationDispatcher>) -> Self {
        Self {
            evaluator,
            dispatcher,
            config: OnboardingConfig::default(),
        }
    }

    pub fn with_config(mut self, config: OnboardingConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &OnboardingConfig {
        &self.config
    }
}

#[async_trait]
impl Workflow for OnboardingWorkflow {
    const TYPE: &'static str = "onboarding";
    type Input = OnboardingPayload;

    fn validate(&self, input: &Self::Input) -> Result<(), ValidationError> {
        input.validate()
    }

    async fn run(
        &self,
        ctx: &WorkflowContext,
        input: Self::Input,
    ) -> Result<Infallible, WorkflowInterrupt> {
        use step_names::*;

        let evaluator: &ActivityEvaluator = &self.evaluator;
        let dispatcher: &NotificationDispatcher = &self.dispatcher;
        let email = input.email.as_str();
        let full_name = input.full_name.as_str();

        ctx.step(NEW_SIGNUP, move || {
            dispatcher.notify(email, Notification::Welcome, full_name)
        })
        .await?;

        ctx.sleep(WAIT_FOR_3_DAYS, self.config.initial_delay).await?;

        // Rebuilt from recorded checks on every replay.
        let mut consecutive_failures = 0u32;
        let mut iteration = 0u64;

        loop {
            let check: StateCheck = ctx
                .step(iteration_name(CHECK_USER_STATE, iteration), move || async move {
                    Ok::<_, Infallible>(evaluator.check(email).await)
                })
                .await?;

            if check.lookup_failed {
                consecutive_failures += 1;
                if consecutive_failures > self.config.max_consecutive_lookup_failures {
                    warn!(
                        instance_id = %ctx.instance_id(),
                        consecutive_failures,
                        "giving up on user state lookups"
                    );
                    return Err(WorkflowInterrupt::fail(
                        format!("user state lookup failed {consecutive_failures} times in a row"),
                        STATE_LOOKUP_FAILED,
                    ));
                }
            } else {
                consecutive_failures = 0;
            }

            let send_step = match check.state {
                UserState::NonActive => SEND_EMAIL_NON_ACTIVE,
                UserState::Active => SEND_EMAIL_ACTIVE,
            };
            let notification = Notification::for_state(check.state);

            ctx.step(iteration_name(send_step, iteration), move || {
                dispatcher.notify(email, notification, full_name)
            })
            .await?;

            ctx.sleep(
                iteration_name(WAIT_FOR_1_MONTH, iteration),
                self.config.check_interval,
            )
            .await?;

            iteration += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = OnboardingConfig::default();
        assert_eq!(config.initial_delay, Duration::from_secs(3 * 86_400));
        assert_eq!(config.check_interval, Duration::from_secs(30 * 86_400));
        assert_eq!(config.max_consecutive_lookup_failures, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_rejects_zero_and_oversized_intervals() {
        let err = OnboardingConfig::default()
            .with_check_interval(Duration::ZERO)
            .validate()
            .unwrap_err();
        assert_eq!(err.field, "check_interval");

        let err = OnboardingConfig::default()
            .with_initial_delay(Duration::from_secs(u64::MAX))
            .validate()
            .unwrap_err();
        assert_eq!(err.field, "initial_delay");

        assert!(OnboardingConfig::default()
            .with_check_interval(OnboardingConfig::MAX_INTERVAL)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_loop_step_names() {
        assert_eq!(
            iteration_name(step_names::CHECK_USER_STATE, 0),
            "check-user-state#0"
        );
        assert_eq!(
            iteration_name(step_names::WAIT_FOR_1_MONTH, 2),
            "wait-for-1-month#2"
        );
    }
}
