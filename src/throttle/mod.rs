//! Throttle rules, events and the throttler that ties them together.

mod clock;
mod context;
mod event;
mod rule;
mod rules;
mod throttler;

pub use clock::{Clock, ManualClock, SystemClock};
pub use context::{ClientAddr, NoRequestContext, RequestContext};
pub use event::{Correlation, EventFilter, RequestData, ThrottleEvent};
pub use rule::{CorrelationMethod, ThrottleRule, ThrottleRuleConfig};
pub use rules::ThrottleRulesConfig;
pub use throttler::{ThrottleStatus, Throttler};
