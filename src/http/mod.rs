//! HTTP surface for the throttle service.

mod handlers;
mod server;

pub use handlers::{ApiError, AppState, DelayResponse, ThrottleRequest};
pub use server::HttpServer;
