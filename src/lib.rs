//! Throttled - Rule-Based Request Throttling
//!
//! This crate implements a throttling policy engine: named rules describe
//! how to correlate repeated actions (by source IP or by a request field),
//! how far back to look, and how long to make the caller wait once a
//! number of attempts has been reached. Attempts are kept in an
//! append-only event log behind the [`storage::EventStore`] trait.

pub mod config;
pub mod error;
pub mod http;
pub mod storage;
pub mod throttle;
