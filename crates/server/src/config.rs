// Server configuration from environment variables
//
// Every variable is optional. A missing DATABASE_URL selects the in-memory
// store and a missing mail endpoint selects the logging transport, so the
// server runs locally with no setup.

use std::time::Duration;

use lifecycle_durable::SchedulerConfig;
use lifecycle_onboarding::{HttpMailConfig, OnboardingConfig};

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:9000";

/// Invalid environment variable
#[derive(Debug, thiserror::Error)]
#[error("invalid {var}={value:?}: {reason}")]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
    pub reason: String,
}

/// Mail provider settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailSettings {
    pub api_url: String,
    pub api_token: Option<String>,
    pub from: String,
}

impl MailSettings {
    pub fn to_http_config(&self) -> HttpMailConfig {
        let config = HttpMailConfig::new(&self.api_url, &self.from);
        match &self.api_token {
            Some(token) => config.with_api_token(token),
            None => config,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// PostgreSQL URL; `None` keeps everything in memory
    pub database_url: Option<String>,
    pub bind_addr: String,
    /// `None` logs emails instead of sending them
    pub mail: Option<MailSettings>,
    pub scheduler: SchedulerConfig,
    pub onboarding: OnboardingConfig,
}

impl ServerConfig {
    /// Load from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let mail = match (var("MAIL_API_URL"), var("MAIL_FROM")) {
            (Some(api_url), Some(from)) => Some(MailSettings {
                api_url,
                api_token: var("MAIL_API_TOKEN"),
                from,
            }),
            _ => None,
        };

        let mut scheduler = SchedulerConfig::default();
        if let Some(ms) = parse_u64(&var, "SCHEDULER_MIN_INTERVAL_MS")? {
            if ms == 0 {
                return Err(ConfigError {
                    var: "SCHEDULER_MIN_INTERVAL_MS",
                    value: ms.to_string(),
                    reason: "must be greater than zero".to_string(),
                });
            }
            scheduler = scheduler.with_min_interval(Duration::from_millis(ms));
        }
        if let Some(ms) = parse_u64(&var, "SCHEDULER_MAX_INTERVAL_MS")? {
            scheduler = scheduler.with_max_interval(Duration::from_millis(ms));
        }
        if scheduler.min_interval > scheduler.max_interval {
            return Err(ConfigError {
                var: "SCHEDULER_MIN_INTERVAL_MS",
                value: scheduler.min_interval.as_millis().to_string(),
                reason: "must not exceed SCHEDULER_MAX_INTERVAL_MS".to_string(),
            });
        }

        let mut onboarding = OnboardingConfig::default();
        if let Some(secs) = parse_u64(&var, "ONBOARDING_INITIAL_DELAY_SECS")? {
            onboarding = onboarding.with_initial_delay(Duration::from_secs(secs));
        }
        if let Some(secs) = parse_u64(&var, "ONBOARDING_CHECK_INTERVAL_SECS")? {
            onboarding = onboarding.with_check_interval(Duration::from_secs(secs));
        }
        if let Err(e) = onboarding.validate() {
            let (var, interval) = match e.field.as_str() {
                "initial_delay" => ("ONBOARDING_INITIAL_DELAY_SECS", onboarding.initial_delay),
                _ => ("ONBOARDING_CHECK_INTERVAL_SECS", onboarding.check_interval),
            };
            return Err(ConfigError {
                var,
                value: interval.as_secs().to_string(),
                reason: e.message,
            });
        }

        Ok(Self {
            database_url: var("DATABASE_URL"),
            bind_addr: var("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            mail,
            scheduler,
            onboarding,
        })
    }
}

fn parse_u64<F>(var: &F, key: &'static str) -> Result<Option<u64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = var(key) else {
        return Ok(None);
    };
    raw.trim().parse().map(Some).map_err(|e: std::num::ParseIntError| ConfigError {
        var: key,
        value: raw,
        reason: e.to_string(),
    })
}
