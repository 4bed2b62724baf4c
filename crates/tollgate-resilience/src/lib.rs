//! Resilience primitives used by the proxy and rate-limiting plugins.
//!
//! - [`CircuitBreaker`] and [`BreakerRegistry`]: per-command-key breakers
//!   shared by every concurrent call against that key.
//! - [`run_command`]: a single outbound call guarded by a breaker and a
//!   timeout.
//! - [`RateLimiter`]: the token-bucket contract, with an in-process
//!   [`TokenBucketLimiter`].

pub mod circuit_breaker;
pub mod command;
pub mod rate_limiter;
pub mod registry;

pub use circuit_breaker::{CallPermit, CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use command::{run_command, CommandError};
pub use rate_limiter::{Decision, LimiterError, RateLimiter, TokenBucketLimiter};
pub use registry::BreakerRegistry;
