//! Event log storage.

mod memory;
mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::throttle::{EventFilter, ThrottleEvent};

pub use memory::MemoryEventStore;
pub use sqlite::SqliteEventStore;

/// Trait for event log implementations.
///
/// The log is append-only: events are inserted once and only ever read
/// back through time-windowed, equality-filtered queries. Errors from the
/// underlying store are returned as-is.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Persist a new event.
    async fn insert(&self, event: ThrottleEvent) -> Result<()>;

    /// Count the events accepted by `filter`.
    async fn count_where(&self, filter: &EventFilter) -> Result<u64>;

    /// Timestamp of the most recent event accepted by `filter`.
    async fn latest_where(&self, filter: &EventFilter) -> Result<Option<DateTime<Utc>>>;
}
