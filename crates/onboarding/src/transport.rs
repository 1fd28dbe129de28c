//! Mail transports

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::notify::{DispatchError, EmailMessage, MailTransport};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Settings for [`HttpMailTransport`]
#[derive(Debug, Clone)]
pub struct HttpMailConfig {
    /// Endpoint accepting a JSON POST per message
    pub endpoint: String,
    /// Sent as a bearer token when present
    pub api_token: Option<String>,
    /// Sender address
    pub from: String,
    /// Upper bound for one request
    pub timeout: Duration,
}

impl HttpMailConfig {
    pub fn new(endpoint: impl Into<String>, from: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_token: None,
            from: from.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_api_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Serialize)]
struct SendRequest<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    text: &'a str,
}

#[derive(Deserialize)]
struct SendResponse {
    #[serde(alias = "messageId", alias = "message_id")]
    id: Option<String>,
}

/// Mail transport posting JSON to an HTTP mail API
pub struct HttpMailTransport {
    client: Client,
    config: HttpMailConfig,
}

impl HttpMailTransport {
    pub fn new(config: HttpMailConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .context("Failed to build mail HTTP client")?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl MailTransport for HttpMailTransport {
    async fn deliver(&self, message: &EmailMessage) -> Result<String, DispatchError> {
        let request = SendRequest {
            from: &self.config.from,
            to: &message.to,
            subject: &message.subject,
            text: &message.body,
        };

        let mut builder = self.client.post(&self.config.endpoint).json(&request);
        if let Some(token) = &self.config.api_token {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await.map_err(classify_request_error)?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &error_text));
        }

        // Providers that return no id still accepted the message.
        let id = response
            .json::<SendResponse>()
            .await
            .ok()
            .and_then(|body| body.id)
            .unwrap_or_else(|| Uuid::now_v7().to_string());

        debug!(to = %message.to, message_id = %id, "mail API accepted message");
        Ok(id)
    }
}

fn classify_request_error(err: reqwest::Error) -> DispatchError {
    if err.is_builder() {
        DispatchError::Rejected(format!("invalid mail request: {err}"))
    } else {
        DispatchError::Transient(format!("mail request failed: {err}"))
    }
}

/// Map a non-success status: overload and server errors are transient,
/// other client errors are permanent
fn classify_status(status: StatusCode, body: &str) -> DispatchError {
    let message = format!("mail API returned {status}: {body}");
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::REQUEST_TIMEOUT {
        DispatchError::Transient(message)
    } else if status.is_client_error() {
        DispatchError::Rejected(message)
    } else {
        DispatchError::Transient(message)
    }
}

/// Transport that only logs, for local runs without a mail provider
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMailTransport;

#[async_trait]
impl MailTransport for LogMailTransport {
    async fn deliver(&self, message: &EmailMessage) -> Result<String, DispatchError> {
        let id = Uuid::now_v7().to_string();
        info!(
            to = %message.to,
            subject = %message.subject,
            body = %message.body,
            message_id = %id,
            "email (log transport)"
        );
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_status() {
        assert!(matches!(
            classify_status(StatusCode::INTERNAL_SERVER_ERROR, ""),
            DispatchError::Transient(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE, ""),
            DispatchError::Transient(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, ""),
            DispatchError::Transient(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_REQUEST, "bad address"),
            DispatchError::Rejected(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, ""),
            DispatchError::Rejected(_)
        ));
    }

    #[test]
    fn test_http_config_builder() {
        let config = HttpMailConfig::new("https://mail.example.com/send", "noreply@example.com")
            .with_api_token("secret")
            .with_timeout(Duration::from_secs(3));
        assert_eq!(config.api_token.as_deref(), Some("secret"));
        assert_eq!(config.timeout, Duration::from_secs(3));
        assert!(HttpMailTransport::new(config).is_ok());
    }

    #[test]
    fn test_send_response_accepts_id_aliases() {
        let a: SendResponse = serde_json::from_str(r#"{"id":"a"}"#).unwrap();
        let b: SendResponse = serde_json::from_str(r#"{"messageId":"b"}"#).unwrap();
        let c: SendResponse = serde_json::from_str(r#"{}"#).unwrap();
        assert_eq!(a.id.as_deref(), Some("a"));
        assert_eq!(b.id.as_deref(), Some("b"));
        assert_eq!(c.id, None);
    }

    #[tokio::test]
    async fn test_log_transport_returns_id() {
        let message = EmailMessage {
            to: "ann@example.com".into(),
            subject: "Welcome to the platform".into(),
            body: "Welcome Ann!".into(),
        };
        let id = LogMailTransport.deliver(&message).await.unwrap();
        assert!(!id.is_empty());
    }
}
