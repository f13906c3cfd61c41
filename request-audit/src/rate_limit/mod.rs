//! Multi-window rate limiting over a shared counter store
//!
//! Each configured window is a fixed window keyed by its first hit:
//! `rate_limit:{identity}:{window_duration}` lives for `window_duration`
//! seconds after it is created. A caller can therefore send up to
//! `2 * max_requests` across a window boundary.

pub mod limiter;
pub mod store;

pub use crate::config::RateLimitWindow;
pub use limiter::{counter_key, RateLimitResult, RateLimiter, WindowEvaluation};
pub use store::{CounterStore, CounterValue, MemoryCounterStore};

#[cfg(feature = "cache")]
pub use store::RedisCounterStore;
