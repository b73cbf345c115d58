//! Resilience patterns for production deployment
//!
//! - Exponential backoff with jitter for WebSocket reconnects and venue
//!   rate-limit cooldowns
//! - Token-bucket rate limiting for REST-bound venues
//! - A cooperative kill switch for graceful shutdown on signals

pub mod backoff;
pub mod kill_switch;
pub mod rate_limiter;

pub use backoff::{BackoffConfig, ExponentialBackoff};
pub use kill_switch::{KillSwitch, KillSwitchState};
pub use rate_limiter::{RateLimiter, RateLimiterConfig};
