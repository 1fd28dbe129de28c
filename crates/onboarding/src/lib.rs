//! Onboarding lifecycle notifications
//!
//! A signup starts an [`OnboardingWorkflow`] instance on the durable
//! engine. It sends a welcome email, waits three days, then checks the
//! user's activity once a month and sends a matching email, forever.
//!
//! Collaborators are injected:
//! - [`UserDirectory`] answers "when was this user last active?"
//! - [`MailTransport`] delivers rendered emails

pub mod activity;
pub mod directory;
pub mod notify;
pub mod payload;
pub mod transport;
pub mod workflow;

pub use activity::{
    ActivityEvaluator, ActivityWindow, StateCheck, StateLookupError, UserActivity, UserDirectory,
    UserState,
};
pub use directory::{InMemoryUserDirectory, PgUserDirectory};
pub use notify::{
    DeliveryReceipt, DispatchError, EmailMessage, MailTransport, Notification,
    NotificationDispatcher,
};
pub use payload::OnboardingPayload;
pub use transport::{HttpMailConfig, HttpMailTransport, LogMailTransport};
pub use workflow::{step_names, OnboardingConfig, OnboardingWorkflow, STATE_LOOKUP_FAILED};
