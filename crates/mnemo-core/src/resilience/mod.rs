//! Failure containment around the decision pipeline: per-user
//! serialization, a sliding-window circuit breaker and the fallback ladder
//! that keeps every caller supplied with a valid result.

pub mod breaker;
pub mod fallback;
pub mod locks;

pub use breaker::{CircuitBreaker, CircuitState};
pub use fallback::FallbackLadder;
pub use locks::{InProcessLocks, LockProvider};
