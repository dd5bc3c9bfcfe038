//! Throttle rules and delay schedules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// How events are correlated when counting occurrences for a rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CorrelationMethod {
    /// Correlate on the source IP address of the request
    Ip,
    /// Correlate on a named field of the request data
    Field(String),
}

impl CorrelationMethod {
    /// Name of the request data field this method reads, if any.
    pub fn field(&self) -> Option<&str> {
        match self {
            CorrelationMethod::Ip => None,
            CorrelationMethod::Field(name) => Some(name),
        }
    }

    /// The method as it appears in configuration.
    pub fn as_str(&self) -> &str {
        match self {
            CorrelationMethod::Ip => "ip",
            CorrelationMethod::Field(name) => name,
        }
    }
}

impl From<String> for CorrelationMethod {
    fn from(method: String) -> Self {
        if method == "ip" {
            CorrelationMethod::Ip
        } else {
            CorrelationMethod::Field(method)
        }
    }
}

impl From<&str> for CorrelationMethod {
    fn from(method: &str) -> Self {
        CorrelationMethod::from(method.to_string())
    }
}

impl From<CorrelationMethod> for String {
    fn from(method: CorrelationMethod) -> Self {
        match method {
            CorrelationMethod::Ip => "ip".to_string(),
            CorrelationMethod::Field(name) => name,
        }
    }
}

impl fmt::Display for CorrelationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A throttle policy: what to key on, how far back to look, and how long
/// to delay once a number of occurrences has been reached.
///
/// The delay schedule is kept sorted by threshold, highest first, so the
/// strictest applicable penalty is always the one returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ThrottleRuleConfig", into = "ThrottleRuleConfig")]
pub struct ThrottleRule {
    method: CorrelationMethod,
    interval_secs: u64,
    delays: Vec<(u64, u64)>,
}

/// Wire/configuration shape of a [`ThrottleRule`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrottleRuleConfig {
    /// `"ip"` or the name of a request data field
    pub method: String,
    /// Lookback window in seconds
    pub interval: u64,
    /// Occurrence threshold -> delay in seconds
    #[serde(default)]
    pub delays: BTreeMap<u64, u64>,
}

impl From<ThrottleRuleConfig> for ThrottleRule {
    fn from(config: ThrottleRuleConfig) -> Self {
        ThrottleRule::new(config.method, config.interval, config.delays)
    }
}

impl From<ThrottleRule> for ThrottleRuleConfig {
    fn from(rule: ThrottleRule) -> Self {
        Self {
            method: rule.method.into(),
            interval: rule.interval_secs,
            delays: rule.delays.into_iter().collect(),
        }
    }
}

impl ThrottleRule {
    /// Create a rule from a correlation method, a window length in seconds
    /// and a threshold -> delay schedule given in any order.
    pub fn new<M, D>(method: M, interval_secs: u64, delays: D) -> Self
    where
        M: Into<CorrelationMethod>,
        D: IntoIterator<Item = (u64, u64)>,
    {
        let mut delays: Vec<(u64, u64)> = delays.into_iter().collect();
        delays.sort_by(|a, b| b.0.cmp(&a.0));
        delays.dedup_by_key(|(threshold, _)| *threshold);

        Self {
            method: method.into(),
            interval_secs,
            delays,
        }
    }

    /// The correlation method for this rule.
    pub fn method(&self) -> &CorrelationMethod {
        &self.method
    }

    /// Lookback window in seconds.
    pub fn interval_secs(&self) -> u64 {
        self.interval_secs
    }

    /// Lookback window as a duration.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// The delay schedule, sorted by threshold descending.
    pub fn delays(&self) -> &[(u64, u64)] {
        &self.delays
    }

    /// Delay in seconds owed after `occurrences` events inside the window.
    ///
    /// `now` is not consulted; the caller has already narrowed the events
    /// down to the window.
    pub fn get_delay(&self, _now: DateTime<Utc>, occurrences: u64) -> u64 {
        self.delays
            .iter()
            .find(|(threshold, _)| *threshold <= occurrences)
            .map(|(_, delay)| *delay)
            .unwrap_or(0)
    }

    /// Seconds still to wait given the time of the most recent event.
    ///
    /// This is the applicable delay minus whatever has already elapsed
    /// since `last_event_at`, floored at zero.
    pub fn remaining_delay(
        &self,
        last_event_at: DateTime<Utc>,
        now: DateTime<Utc>,
        occurrences: u64,
    ) -> u64 {
        let delay = self.get_delay(now, occurrences);
        if delay == 0 {
            return 0;
        }

        let elapsed = now.signed_duration_since(last_event_at).num_seconds().max(0) as u64;
        delay.saturating_sub(elapsed)
    }
}
