//! In-process event log.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::trace;

use super::EventStore;
use crate::error::Result;
use crate::throttle::{EventFilter, ThrottleEvent};

/// Event log kept in memory, bucketed by event type.
///
/// Suitable for a single process; events are lost on restart. Buckets
/// are never pruned and every count scans its whole bucket, so memory and
/// lookup cost grow with the total number of events logged.
#[derive(Debug, Default)]
pub struct MemoryEventStore {
    events: DashMap<String, Vec<ThrottleEvent>>,
}

impl MemoryEventStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of events held across all types.
    pub fn len(&self) -> usize {
        self.events.iter().map(|bucket| bucket.len()).sum()
    }

    /// Whether the store holds no events.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the events recorded for one type, oldest first.
    pub fn events_of(&self, event_type: &str) -> Vec<ThrottleEvent> {
        self.events
            .get(event_type)
            .map(|bucket| bucket.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn insert(&self, event: ThrottleEvent) -> Result<()> {
        trace!(event_type = %event.event_type, id = %event.id, "Storing throttle event");
        self.events
            .entry(event.event_type.clone())
            .or_default()
            .push(event);
        Ok(())
    }

    async fn count_where(&self, filter: &EventFilter) -> Result<u64> {
        let count = self
            .events
            .get(&filter.event_type)
            .map(|bucket| bucket.iter().filter(|e| filter.accepts(e)).count())
            .unwrap_or(0);
        Ok(count as u64)
    }

    async fn latest_where(&self, filter: &EventFilter) -> Result<Option<DateTime<Utc>>> {
        let latest = self.events.get(&filter.event_type).and_then(|bucket| {
            bucket
                .iter()
                .filter(|e| filter.accepts(e))
                .map(|e| e.created_at)
                .max()
        });
        Ok(latest)
    }
}
