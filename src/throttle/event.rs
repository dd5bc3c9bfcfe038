//! Throttle events and the filters used to count them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use uuid::Uuid;

/// Free-form correlation fields attached to a request, e.g. `user_identifier`.
pub type RequestData = BTreeMap<String, String>;

/// A single throttle-worthy action, as persisted in the event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrottleEvent {
    /// Unique event id
    pub id: Uuid,
    /// Name of the rule this event belongs to
    #[serde(rename = "type")]
    pub event_type: String,
    /// Source address of the request, when known
    pub ip: Option<IpAddr>,
    /// Extra correlation fields supplied by the caller
    #[serde(default)]
    pub request_data: RequestData,
    /// When the event was recorded
    pub created_at: DateTime<Utc>,
}

impl ThrottleEvent {
    /// Create a new event stamped with `created_at`.
    pub fn new(
        event_type: impl Into<String>,
        ip: Option<IpAddr>,
        request_data: RequestData,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type: event_type.into(),
            ip,
            request_data,
            created_at,
        }
    }

    /// Whether this event carries the given correlation value.
    pub fn matches(&self, correlation: &Correlation) -> bool {
        match correlation {
            Correlation::Ip(ip) => self.ip.as_ref() == Some(ip),
            Correlation::Field { name, value } => {
                self.request_data.get(name).map(String::as_str) == Some(value.as_str())
            }
        }
    }
}

/// The value events are grouped by when counting.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Correlation {
    /// Equality on the stored `ip` column
    Ip(IpAddr),
    /// Equality on `request_data[name]`
    Field { name: String, value: String },
}

impl fmt::Display for Correlation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Correlation::Ip(ip) => write!(f, "ip={}", ip),
            Correlation::Field { name, value } => write!(f, "{}={}", name, value),
        }
    }
}

/// Selects the events of one type, sharing one correlation value,
/// recorded strictly after `since`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFilter {
    /// Rule name
    pub event_type: String,
    /// Correlation value to match
    pub correlation: Correlation,
    /// Exclusive lower bound of the window
    pub since: DateTime<Utc>,
}

impl EventFilter {
    /// Create a new filter.
    pub fn new(event_type: impl Into<String>, correlation: Correlation, since: DateTime<Utc>) -> Self {
        Self {
            event_type: event_type.into(),
            correlation,
            since,
        }
    }

    /// Whether `event` falls inside this filter.
    ///
    /// Times are compared at millisecond precision, the resolution event
    /// stores persist.
    pub fn accepts(&self, event: &ThrottleEvent) -> bool {
        event.event_type == self.event_type
            && event.created_at.timestamp_millis() > self.since.timestamp_millis()
            && event.matches(&self.correlation)
    }
}
