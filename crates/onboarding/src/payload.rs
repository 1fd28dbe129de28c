//! Signup payload

use lifecycle_durable::ValidationError;
use serde::{Deserialize, Serialize};

const MAX_EMAIL_LEN: usize = 254;
const MAX_NAME_LEN: usize = 200;

/// Payload of the signup event that starts an onboarding workflow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnboardingPayload {
    pub email: String,
    pub full_name: String,
}

impl OnboardingPayload {
    pub fn new(email: impl Into<String>, full_name: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            full_name: full_name.into(),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_email(&self.email)?;

        let name = self.full_name.trim();
        if name.is_empty() {
            return Err(ValidationError::new("fullName", "must not be empty"));
        }
        if name.chars().count() > MAX_NAME_LEN {
            return Err(ValidationError::new(
                "fullName",
                format!("must be at most {MAX_NAME_LEN} characters"),
            ));
        }
        Ok(())
    }
}

fn validate_email(email: &str) -> Result<(), ValidationError> {
    if email.trim().is_empty() {
        return Err(ValidationError::new("email", "must not be empty"));
    }
    if email.len() > MAX_EMAIL_LEN {
        return Err(ValidationError::new(
            "email",
            format!("must be at most {MAX_EMAIL_LEN} characters"),
        ));
    }
    if email.chars().any(char::is_whitespace) {
        return Err(ValidationError::new("email", "must not contain whitespace"));
    }

    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() && !domain.contains('@') => {
            Ok(())
        }
        _ => Err(ValidationError::new("email", "is not a valid address")),
    }
}
