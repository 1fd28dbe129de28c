//! User directory implementations

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use parking_lot::RwLock;
use sqlx::{PgPool, Row};
use tracing::error;

use crate::activity::{StateLookupError, UserActivity, UserDirectory};

/// In-memory user directory for tests and local runs
#[derive(Default)]
pub struct InMemoryUserDirectory {
    users: RwLock<HashMap<String, Option<DateTime<Utc>>>>,
    unavailable: AtomicBool,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a user
    pub fn insert(&self, email: impl Into<String>, last_activity_at: Option<DateTime<Utc>>) {
        self.users.write().insert(email.into(), last_activity_at);
    }

    /// Record activity for an existing user; returns false for unknown users
    pub fn record_activity(&self, email: &str, at: DateTime<Utc>) -> bool {
        match self.users.write().get_mut(email) {
            Some(last) => {
                *last = Some(at);
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, email: &str) {
        self.users.write().remove(email);
    }

    /// Make every lookup fail until reset
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn lookup(&self, email: &str) -> Result<Option<UserActivity>, StateLookupError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StateLookupError::Unavailable(
                "directory marked unavailable".to_string(),
            ));
        }

        Ok(self.users.read().get(email).map(|last| UserActivity {
            email: email.to_string(),
            last_activity_at: *last,
        }))
    }
}

/// User directory backed by the application's `users` table
///
/// Reads `users.last_activity_date` (a `DATE`), interpreted as midnight UTC.
#[derive(Clone)]
pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn lookup(&self, email: &str) -> Result<Option<UserActivity>, StateLookupError> {
        let row = sqlx::query(
            r#"
            SELECT email, last_activity_date
            FROM users
            WHERE email = $1
            LIMIT 1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to look up user activity: {}", e);
            StateLookupError::Unavailable(e.to_string())
        })?;

        Ok(row.map(|row| {
            let date: Option<NaiveDate> = row.get("last_activity_date");
            UserActivity {
                email: row.get("email"),
                last_activity_at: date.and_then(start_of_day_utc),
            }
        }))
    }
}

fn start_of_day_utc(date: NaiveDate) -> Option<DateTime<Utc>> {
    date.and_hms_opt(0, 0, 0)
        .map(|naive| Utc.from_utc_datetime(&naive))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_lookup() {
        let directory = InMemoryUserDirectory::new();
        let now = Utc::now();
        directory.insert("ann@example.com", Some(now));
        directory.insert("bob@example.com", None);

        let ann = directory.lookup("ann@example.com").await.unwrap().unwrap();
        assert_eq!(ann.last_activity_at, Some(now));

        let bob = directory.lookup("bob@example.com").await.unwrap().unwrap();
        assert_eq!(bob.last_activity_at, None);

        assert!(directory.lookup("ghost@example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_record_activity() {
        let directory = InMemoryUserDirectory::new();
        let now = Utc::now();
        directory.insert("ann@example.com", None);

        assert!(directory.record_activity("ann@example.com", now));
        assert!(!directory.record_activity("ghost@example.com", now));

        let ann = directory.lookup("ann@example.com").await.unwrap().unwrap();
        assert_eq!(ann.last_activity_at, Some(now));
    }

    #[tokio::test]
    async fn test_unavailable_directory() {
        let directory = InMemoryUserDirectory::new();
        directory.set_unavailable(true);
        assert!(directory.lookup("ann@example.com").await.is_err());

        directory.set_unavailable(false);
        assert!(directory.lookup("ann@example.com").await.is_ok());
    }

    #[test]
    fn test_start_of_day_utc() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 14).unwrap();
        let instant = start_of_day_utc(date).unwrap();
        assert_eq!(instant.to_rfc3339(), "2025-03-14T00:00:00+00:00");
    }
}
