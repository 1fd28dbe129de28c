//! User activity classification
//!
//! Decides whether a user counts as active from their last recorded
//! activity. The thresholds mirror the check cadence of the onboarding
//! workflow: activity in the last 3 days is active, 3 to 30 days is
//! non-active, and anything older falls back to active.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use lifecycle_durable::Clock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Classified user state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UserState {
    Active,
    NonActive,
}

/// Activity record from the user directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserActivity {
    pub email: String,
    /// `None` when the user exists but never recorded activity
    pub last_activity_at: Option<DateTime<Utc>>,
}

/// The user directory could not answer
#[derive(Debug, Clone, thiserror::Error)]
pub enum StateLookupError {
    #[error("user directory unavailable: {0}")]
    Unavailable(String),
}

/// Read-only source of user activity
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Look up a user by email; `Ok(None)` when no such user exists
    async fn lookup(&self, email: &str) -> Result<Option<UserActivity>, StateLookupError>;
}

/// Active/non-active thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivityWindow {
    /// Activity at most this old is active
    pub active_within: Duration,
    /// Activity older than `active_within` and at most this old is non-active
    pub dormant_after: Duration,
}

impl Default for ActivityWindow {
    fn default() -> Self {
        Self {
            active_within: Duration::days(3),
            dormant_after: Duration::days(30),
        }
    }
}

impl ActivityWindow {
    /// Classify a last-activity instant relative to `now`
    ///
    /// Users idle for longer than `dormant_after` are classified Active
    /// again, and so are users with no recorded activity at all.
    pub fn classify(&self, last_activity_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> UserState {
        let Some(last) = last_activity_at else {
            return UserState::Active;
        };

        let idle = now - last;
        if idle > self.active_within && idle <= self.dormant_after {
            UserState::NonActive
        } else {
            UserState::Active
        }
    }
}

/// Result of a state check, recorded as a step result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateCheck {
    pub state: UserState,
    /// The directory failed and `state` is the NonActive fallback
    pub lookup_failed: bool,
}

/// Condition evaluator over a [`UserDirectory`]
pub struct ActivityEvaluator {
    directory: Arc<dyn UserDirectory>,
    clock: Arc<dyn Clock>,
    window: ActivityWindow,
}

impl ActivityEvaluator {
    pub fn new(directory: Arc<dyn UserDirectory>, clock: Arc<dyn Clock>) -> Self {
        Self {
            directory,
            clock,
            window: ActivityWindow::default(),
        }
    }

    pub fn with_window(mut self, window: ActivityWindow) -> Self {
        self.window = window;
        self
    }

    pub fn window(&self) -> &ActivityWindow {
        &self.window
    }

    /// Classify a user; unknown users are NonActive
    pub async fn get_user_state(&self, email: &str) -> Result<UserState, StateLookupError> {
        let state = match self.directory.lookup(email).await? {
            None => UserState::NonActive,
            Some(activity) => self.window.classify(activity.last_activity_at, self.clock.now()),
        };
        debug!(email, ?state, "classified user");
        Ok(state)
    }

    /// Classify a user, falling back to NonActive when the directory fails
    pub async fn check(&self, email: &str) -> StateCheck {
        match self.get_user_state(email).await {
            Ok(state) => StateCheck {
                state,
                lookup_failed: false,
            },
            Err(e) => {
                warn!(email, error = %e, "user state lookup failed, assuming non-active");
                StateCheck {
                    state: UserState::NonActive,
                    lookup_failed: true,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::InMemoryUserDirectory;
    use lifecycle_durable::ManualClock;

    fn window() -> ActivityWindow {
        ActivityWindow::default()
    }

    #[test]
    fn test_classify_boundaries() {
        let now = Utc::now();
        let w = window();

        assert_eq!(w.classify(Some(now), now), UserState::Active);
        assert_eq!(w.classify(Some(now - Duration::days(3)), now), UserState::Active);
        assert_eq!(
            w.classify(Some(now - Duration::days(3) - Duration::seconds(1)), now),
            UserState::NonActive
        );
        assert_eq!(w.classify(Some(now - Duration::days(30)), now), UserState::NonActive);
        assert_eq!(
            w.classify(Some(now - Duration::days(30) - Duration::seconds(1)), now),
            UserState::Active
        );
    }

    #[test]
    fn test_classify_without_activity_is_active() {
        assert_eq!(window().classify(None, Utc::now()), UserState::Active);
    }

    #[test]
    fn test_future_activity_is_active() {
        let now = Utc::now();
        assert_eq!(window().classify(Some(now + Duration::hours(1)), now), UserState::Active);
    }

    #[test]
    fn test_user_state_serializes_kebab_case() {
        assert_eq!(
            serde_json::to_value(UserState::NonActive).unwrap(),
            serde_json::json!("non-active")
        );
    }

    #[tokio::test]
    async fn test_missing_user_is_non_active() {
        let directory = Arc::new(InMemoryUserDirectory::new());
        let evaluator = ActivityEvaluator::new(directory, Arc::new(ManualClock::new(Utc::now())));

        let state = evaluator.get_user_state("ghost@example.com").await.unwrap();
        assert_eq!(state, UserState::NonActive);
    }

    #[tokio::test]
    async fn test_get_user_state_uses_clock() {
        let now = Utc::now();
        let clock = Arc::new(ManualClock::new(now));
        let directory = Arc::new(InMemoryUserDirectory::new());
        directory.insert("ann@example.com", Some(now));
        let evaluator = ActivityEvaluator::new(directory, clock.clone());

        assert_eq!(
            evaluator.get_user_state("ann@example.com").await.unwrap(),
            UserState::Active
        );

        clock.advance(Duration::days(10));
        assert_eq!(
            evaluator.get_user_state("ann@example.com").await.unwrap(),
            UserState::NonActive
        );
    }

    #[tokio::test]
    async fn test_check_falls_back_when_directory_fails() {
        let directory = Arc::new(InMemoryUserDirectory::new());
        directory.insert("ann@example.com", Some(Utc::now()));
        directory.set_unavailable(true);
        let evaluator = ActivityEvaluator::new(directory, Arc::new(ManualClock::new(Utc::now())));

        assert!(evaluator.get_user_state("ann@example.com").await.is_err());
        let check = evaluator.check("ann@example.com").await;
        assert_eq!(check.state, UserState::NonActive);
        assert!(check.lookup_failed);
    }
}
