//! The throttler: a registry of named rules over a shared event log.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use tracing::{debug, trace, warn};

use super::clock::{Clock, SystemClock};
use super::context::{NoRequestContext, RequestContext};
use super::event::{Correlation, EventFilter, RequestData, ThrottleEvent};
use super::rule::{CorrelationMethod, ThrottleRule};
use super::rules::ThrottleRulesConfig;
use crate::error::{Result, ThrottleError};
use crate::storage::EventStore;

/// Request data key consulted for the source address when the request
/// context does not supply one.
const IP_FIELD: &str = "ip";

/// Outcome of checking a rule against the event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThrottleStatus {
    /// Rule that was checked
    pub rule: String,
    /// Matching events inside the rule's window
    pub occurrences: u64,
    /// Delay owed for that many occurrences, in seconds
    pub delay: u64,
    /// Seconds left of that delay, measured from the most recent event
    pub retry_after: u64,
}

impl ThrottleStatus {
    fn clear(rule: &str) -> Self {
        Self {
            rule: rule.to_string(),
            occurrences: 0,
            delay: 0,
            retry_after: 0,
        }
    }
}

/// Logs throttleable events and computes how long a caller must wait
/// before repeating them.
///
/// Cloning is cheap: the rule registry, store, context and clock are all
/// shared. Use [`Throttler::with_request_context`] to get a view bound to
/// the request being handled.
#[derive(Clone)]
pub struct Throttler {
    /// Rule name -> rule; `None` marks a registered but inert rule
    rules: Arc<BTreeMap<String, Option<ThrottleRule>>>,
    store: Arc<dyn EventStore>,
    context: Arc<dyn RequestContext>,
    clock: Arc<dyn Clock>,
}

impl Throttler {
    /// Create a throttler with no rules over the given event store.
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self {
            rules: Arc::new(BTreeMap::new()),
            store,
            context: Arc::new(NoRequestContext),
            clock: Arc::new(SystemClock),
        }
    }

    /// Create a throttler with every rule from `config` registered.
    pub fn with_rules(store: Arc<dyn EventStore>, config: &ThrottleRulesConfig) -> Self {
        let mut throttler = Self::new(store);
        for (name, rule) in &config.throttles {
            throttler.add_throttle_rule(name.clone(), rule.clone());
        }
        throttler
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// A throttler sharing this one's rules and store, bound to `context`.
    pub fn with_request_context(&self, context: Arc<dyn RequestContext>) -> Self {
        Self {
            rules: Arc::clone(&self.rules),
            store: Arc::clone(&self.store),
            context,
            clock: Arc::clone(&self.clock),
        }
    }

    /// Register `rule` under `name`, replacing any previous registration.
    ///
    /// Passing `None` registers the name as inert: events are not logged
    /// and the delay is always zero.
    pub fn add_throttle_rule(
        &mut self,
        name: impl Into<String>,
        rule: Option<ThrottleRule>,
    ) -> &mut Self {
        let name = name.into();
        debug!(rule = %name, active = rule.is_some(), "Registering throttle rule");
        Arc::make_mut(&mut self.rules).insert(name, rule);
        self
    }

    /// All registered rules.
    pub fn throttle_rules(&self) -> &BTreeMap<String, Option<ThrottleRule>> {
        &self.rules
    }

    /// Look up a rule by name.
    ///
    /// Returns `Ok(None)` for an inert rule and `RuleNotFound` for a name
    /// that was never registered.
    pub fn get_rule(&self, name: &str) -> Result<Option<&ThrottleRule>> {
        match self.rules.get(name) {
            Some(rule) => Ok(rule.as_ref()),
            None => {
                warn!(rule = %name, "Unknown throttle rule requested");
                Err(ThrottleError::RuleNotFound(name.to_string()))
            }
        }
    }

    /// Record that a throttleable action happened.
    ///
    /// The source address is stored with every event whatever the rule's
    /// correlation method.
    pub async fn log_event(&self, name: &str, data: &RequestData) -> Result<&Self> {
        let Some(_rule) = self.get_rule(name)? else {
            trace!(rule = %name, "Rule is inert, not logging event");
            return Ok(self);
        };

        let event = ThrottleEvent::new(name, self.client_ip(data), data.clone(), self.clock.now());

        debug!(
            rule = %name,
            id = %event.id,
            ip = ?event.ip,
            "Logging throttle event"
        );

        self.store.insert(event).await?;
        Ok(self)
    }

    /// Seconds the current caller must wait before repeating `name`.
    ///
    /// This only reads the event log; call [`Throttler::log_event`]
    /// separately once the action has actually been attempted.
    pub async fn get_delay(&self, name: &str, data: &RequestData) -> Result<u64> {
        let Some(rule) = self.get_rule(name)? else {
            return Ok(0);
        };

        let now = self.clock.now();
        let Some(filter) = self.window_filter(name, rule, data, now) else {
            trace!(rule = %name, "No correlation value, no delay");
            return Ok(0);
        };

        let occurrences = self.store.count_where(&filter).await?;
        let delay = rule.get_delay(now, occurrences);

        trace!(
            rule = %name,
            correlation = %filter.correlation,
            occurrences = occurrences,
            delay = delay,
            "Computed throttle delay"
        );

        Ok(delay)
    }

    /// Like [`Throttler::get_delay`], but also reports the occurrence count
    /// and how much of the delay is still outstanding.
    pub async fn check(&self, name: &str, data: &RequestData) -> Result<ThrottleStatus> {
        let Some(rule) = self.get_rule(name)? else {
            return Ok(ThrottleStatus::clear(name));
        };

        let now = self.clock.now();
        let Some(filter) = self.window_filter(name, rule, data, now) else {
            return Ok(ThrottleStatus::clear(name));
        };

        let occurrences = self.store.count_where(&filter).await?;
        let delay = rule.get_delay(now, occurrences);
        let retry_after = if delay == 0 {
            0
        } else {
            match self.store.latest_where(&filter).await? {
                Some(last_event_at) => rule.remaining_delay(last_event_at, now, occurrences),
                None => 0,
            }
        };

        if delay > 0 {
            debug!(
                rule = %name,
                correlation = %filter.correlation,
                occurrences = occurrences,
                delay = delay,
                retry_after = retry_after,
                "Throttle delay in effect"
            );
        }

        Ok(ThrottleStatus {
            rule: name.to_string(),
            occurrences,
            delay,
            retry_after,
        })
    }

    /// Source address from the request context, falling back to an `ip`
    /// entry in the request data.
    fn client_ip(&self, data: &RequestData) -> Option<IpAddr> {
        if let Some(ip) = self.context.client_ip() {
            return Some(ip);
        }

        let raw = data.get(IP_FIELD)?;
        match raw.parse() {
            Ok(ip) => Some(ip),
            Err(_) => {
                warn!(ip = %raw, "Ignoring unparseable ip in request data");
                None
            }
        }
    }

    /// The value events are grouped by for `rule`, if the request has one.
    fn correlation(&self, rule: &ThrottleRule, data: &RequestData) -> Option<Correlation> {
        match rule.method() {
            CorrelationMethod::Ip => self.client_ip(data).map(Correlation::Ip),
            CorrelationMethod::Field(field) => data.get(field).map(|value| Correlation::Field {
                name: field.clone(),
                value: value.clone(),
            }),
        }
    }

    fn window_filter(
        &self,
        name: &str,
        rule: &ThrottleRule,
        data: &RequestData,
        now: DateTime<Utc>,
    ) -> Option<EventFilter> {
        let correlation = self.correlation(rule, data)?;
        Some(EventFilter::new(
            name,
            correlation,
            window_start(now, rule.interval_secs()),
        ))
    }
}

/// Exclusive lower bound of a window of `interval_secs` ending at `now`.
fn window_start(now: DateTime<Utc>, interval_secs: u64) -> DateTime<Utc> {
    let interval = i64::try_from(interval_secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .unwrap_or(TimeDelta::MAX);
    now.checked_sub_signed(interval)
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

impl std::fmt::Debug for Throttler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Throttler")
            .field("rules", &self.rules)
            .field("client_ip", &self.context.client_ip())
            .finish_non_exhaustive()
    }
}
