//! Notification dispatch
//!
//! [`NotificationDispatcher`] renders templates and hands messages to a
//! [`MailTransport`]. Dispatch errors carry whether a retry can help; the
//! enclosing workflow step retries transient failures under its policy.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lifecycle_durable::{Clock, StepError};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::activity::UserState;

/// Step error types produced by dispatch failures
pub mod error_types {
    pub const TRANSIENT_DISPATCH: &str = "TRANSIENT_DISPATCH";
    pub const DISPATCH_REJECTED: &str = "DISPATCH_REJECTED";
}

/// Dispatch failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// Network failure, timeout, or provider overload; may succeed later
    #[error("transient dispatch failure: {0}")]
    Transient(String),

    /// The provider refused the message; retrying will not help
    #[error("dispatch rejected: {0}")]
    Rejected(String),
}

impl From<DispatchError> for StepError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::Transient(msg) => {
                StepError::retryable(msg).with_type(error_types::TRANSIENT_DISPATCH)
            }
            DispatchError::Rejected(msg) => {
                StepError::non_retryable(msg).with_type(error_types::DISPATCH_REJECTED)
            }
        }
    }
}

/// An outgoing email
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Proof of a handed-off message, recorded as the step result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryReceipt {
    pub message_id: String,
    pub sent_at: DateTime<Utc>,
}

/// Mail provider seam
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Deliver a message and return the provider's message id
    async fn deliver(&self, message: &EmailMessage) -> Result<String, DispatchError>;
}

/// Onboarding email templates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    /// Sent once at signup
    Welcome,
    /// Sent to non-active users
    StillThere,
    /// Sent to active users
    WelcomeBack,
}

impl Notification {
    /// Template for a classified state
    pub fn for_state(state: UserState) -> Self {
        match state {
            UserState::NonActive => Self::StillThere,
            UserState::Active => Self::WelcomeBack,
        }
    }

    pub fn subject(&self) -> &'static str {
        match self {
            Self::Welcome => "Welcome to the platform",
            Self::StillThere => "Are you still there?",
            Self::WelcomeBack => "Welcome back!",
        }
    }

    pub fn body(&self, full_name: &str) -> String {
        match self {
            Self::Welcome => format!("Welcome {full_name}!"),
            Self::StillThere => format!("Hey {full_name}, we miss you!"),
            Self::WelcomeBack => format!("Welcome back {full_name}!"),
        }
    }
}

/// Sends notifications through a [`MailTransport`]
pub struct NotificationDispatcher {
    transport: Arc<dyn MailTransport>,
    clock: Arc<dyn Clock>,
}

impl NotificationDispatcher {
    pub fn new(transport: Arc<dyn MailTransport>, clock: Arc<dyn Clock>) -> Self {
        Self { transport, clock }
    }

    /// Send a single email
    pub async fn send(
        &self,
        recipient: &str,
        subject: &str,
        body: &str,
    ) -> Result<DeliveryReceipt, DispatchError> {
        if recipient.trim().is_empty() {
            return Err(DispatchError::Rejected("recipient is empty".to_string()));
        }

        let message = EmailMessage {
            to: recipient.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        };
        let message_id = self.transport.deliver(&message).await?;

        info!(to = recipient, subject, %message_id, "notification sent");
        Ok(DeliveryReceipt {
            message_id,
            sent_at: self.clock.now(),
        })
    }

    /// Render a template and send it
    pub async fn notify(
        &self,
        recipient: &str,
        notification: Notification,
        full_name: &str,
    ) -> Result<DeliveryReceipt, DispatchError> {
        let body = notification.body(full_name);
        self.send(recipient, notification.subject(), &body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lifecycle_durable::ManualClock;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Outbox {
        sent: Mutex<Vec<EmailMessage>>,
    }

    #[async_trait]
    impl MailTransport for Outbox {
        async fn deliver(&self, message: &EmailMessage) -> Result<String, DispatchError> {
            let mut sent = self.sent.lock();
            sent.push(message.clone());
            Ok(format!("msg-{}", sent.len()))
        }
    }

    #[test]
    fn test_templates() {
        assert_eq!(Notification::Welcome.subject(), "Welcome to the platform");
        assert_eq!(Notification::Welcome.body("Ann"), "Welcome Ann!");
        assert_eq!(Notification::StillThere.body("Ann"), "Hey Ann, we miss you!");
        assert_eq!(Notification::WelcomeBack.body("Ann"), "Welcome back Ann!");
    }

    #[test]
    fn test_for_state() {
        assert_eq!(
            Notification::for_state(UserState::NonActive),
            Notification::StillThere
        );
        assert_eq!(
            Notification::for_state(UserState::Active),
            Notification::WelcomeBack
        );
    }

    #[test]
    fn test_dispatch_error_retryability() {
        let transient: StepError = DispatchError::Transient("timeout".into()).into();
        assert!(transient.retryable);
        assert_eq!(
            transient.error_type.as_deref(),
            Some(error_types::TRANSIENT_DISPATCH)
        );

        let rejected: StepError = DispatchError::Rejected("bad address".into()).into();
        assert!(!rejected.retryable);
    }

    #[tokio::test]
    async fn test_notify_renders_and_sends() {
        let outbox = Arc::new(Outbox::default());
        let now = Utc::now();
        let dispatcher = NotificationDispatcher::new(outbox.clone(), Arc::new(ManualClock::new(now)));

        let receipt = dispatcher
            .notify("ann@example.com", Notification::Welcome, "Ann")
            .await
            .unwrap();

        assert_eq!(receipt.message_id, "msg-1");
        assert_eq!(receipt.sent_at, now);
        let sent = outbox.sent.lock();
        assert_eq!(sent[0].subject, "Welcome to the platform");
        assert_eq!(sent[0].body, "Welcome Ann!");
    }

    #[tokio::test]
    async fn test_empty_recipient_is_rejected() {
        let outbox = Arc::new(Outbox::default());
        let dispatcher = NotificationDispatcher::new(outbox.clone(), Arc::new(ManualClock::new(Utc::now())));

        let err = dispatcher.send(" ", "subject", "body").await.unwrap_err();
        assert!(matches!(err, DispatchError::Rejected(_)));
        assert!(outbox.sent.lock().is_empty());
    }
}
