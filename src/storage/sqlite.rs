//! SQLite-backed event log using the `throttle_events` table.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::{debug, info, trace};

use super::EventStore;
use crate::error::Result;
use crate::throttle::{Correlation, EventFilter, ThrottleEvent};

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS throttle_events (
    id TEXT PRIMARY KEY NOT NULL,
    event_type TEXT NOT NULL,
    ip TEXT NULL,
    request_data TEXT NOT NULL DEFAULT '{}',
    created_at INTEGER NOT NULL
)
"#;

const CREATE_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS throttle_events_type_created_at
    ON throttle_events (event_type, created_at)
"#;

const INSERT_EVENT: &str = r#"
INSERT INTO throttle_events (id, event_type, ip, request_data, created_at)
VALUES (?, ?, ?, ?, ?)
"#;

const COUNT_BY_IP: &str = r#"
SELECT COUNT(*) FROM throttle_events
WHERE event_type = ? AND created_at > ? AND ip = ?
"#;

const COUNT_BY_FIELD: &str = r#"
SELECT COUNT(*) FROM throttle_events
WHERE event_type = ? AND created_at > ?
  AND EXISTS (SELECT 1 FROM json_each(request_data) WHERE key = ? AND value = ?)
"#;

const LATEST_BY_IP: &str = r#"
SELECT MAX(created_at) FROM throttle_events
WHERE event_type = ? AND created_at > ? AND ip = ?
"#;

const LATEST_BY_FIELD: &str = r#"
SELECT MAX(created_at) FROM throttle_events
WHERE event_type = ? AND created_at > ?
  AND EXISTS (SELECT 1 FROM json_each(request_data) WHERE key = ? AND value = ?)
"#;

/// Event log persisted in SQLite.
///
/// Timestamps are stored as epoch milliseconds so window comparisons are
/// plain integer comparisons; sub-millisecond precision is dropped, matching
/// [`EventFilter::accepts`]. Request data is stored as a JSON object and
/// fields are matched by key, so any field name is usable.
#[derive(Debug, Clone)]
pub struct SqliteEventStore {
    pool: SqlitePool,
}

impl SqliteEventStore {
    /// Creates a store over an existing connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) the database at `url` and ensure the
    /// schema exists.
    ///
    /// In-memory databases are pinned to a single long-lived connection,
    /// since every new connection would otherwise see an empty database.
    pub async fn connect(url: &str) -> Result<Self> {
        info!(url = %url, "Opening SQLite event store");

        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = if url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(options)
                .await?
        };

        let store = Self::new(pool);
        store.migrate().await?;
        Ok(store)
    }

    /// Create the event table and its window index if they are missing.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(CREATE_TABLE).execute(&self.pool).await?;
        sqlx::query(CREATE_INDEX).execute(&self.pool).await?;
        debug!("throttle_events schema ready");
        Ok(())
    }

    /// The underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn from_millis(ms: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
}

#[async_trait]
impl EventStore for SqliteEventStore {
    async fn insert(&self, event: ThrottleEvent) -> Result<()> {
        let request_data = serde_json::to_string(&event.request_data)?;

        trace!(event_type = %event.event_type, id = %event.id, "Inserting throttle event");

        sqlx::query(INSERT_EVENT)
            .bind(event.id.to_string())
            .bind(&event.event_type)
            .bind(event.ip.map(|ip| ip.to_string()))
            .bind(request_data)
            .bind(event.created_at.timestamp_millis())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn count_where(&self, filter: &EventFilter) -> Result<u64> {
        let since = filter.since.timestamp_millis();

        let count: i64 = match &filter.correlation {
            Correlation::Ip(ip) => {
                sqlx::query_scalar(COUNT_BY_IP)
                    .bind(&filter.event_type)
                    .bind(since)
                    .bind(ip.to_string())
                    .fetch_one(&self.pool)
                    .await?
            }
            Correlation::Field { name, value } => {
                sqlx::query_scalar(COUNT_BY_FIELD)
                    .bind(&filter.event_type)
                    .bind(since)
                    .bind(name)
                    .bind(value)
                    .fetch_one(&self.pool)
                    .await?
            }
        };

        Ok(count.max(0) as u64)
    }

    async fn latest_where(&self, filter: &EventFilter) -> Result<Option<DateTime<Utc>>> {
        let since = filter.since.timestamp_millis();

        let latest: Option<i64> = match &filter.correlation {
            Correlation::Ip(ip) => {
                sqlx::query_scalar(LATEST_BY_IP)
                    .bind(&filter.event_type)
                    .bind(since)
                    .bind(ip.to_string())
                    .fetch_one(&self.pool)
                    .await?
            }
            Correlation::Field { name, value } => {
                sqlx::query_scalar(LATEST_BY_FIELD)
                    .bind(&filter.event_type)
                    .bind(since)
                    .bind(name)
                    .bind(value)
                    .fetch_one(&self.pool)
                    .await?
            }
        };

        Ok(latest.and_then(from_millis))
    }
}
