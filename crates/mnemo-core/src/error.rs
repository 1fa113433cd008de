use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure classes the pipeline distinguishes. None of these reach the API
/// caller as an Err; the resilience wrapper converts them into degraded
/// `ProcessResult`s and telemetry.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed or out-of-range raw input. The event is discarded and no
    /// per-user state is touched.
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    /// Covariance factorization degraded beyond recovery of the incremental
    /// path. The bandit resets itself; surfaced only for telemetry.
    #[error("numeric instability in bandit model")]
    NumericInstability,

    /// Pipeline exceeded its time budget and was cancelled.
    #[error("pipeline timed out after {0}ms")]
    Timeout(u64),

    /// Breaker is open; no pipeline attempt was made.
    #[error("circuit open")]
    CircuitOpen,

    /// Repository read/write failure.
    #[error("persistence failure: {0}")]
    Persistence(String),
}

/// Why the fallback path produced the result instead of the live pipeline.
/// Keys the fallback strategy selection and the telemetry counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    CircuitOpen,
    Timeout,
    Exception,
    DegradedState,
}

impl FallbackReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FallbackReason::CircuitOpen => "circuit_open",
            FallbackReason::Timeout => "timeout",
            FallbackReason::Exception => "exception",
            FallbackReason::DegradedState => "degraded_state",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "circuit_open" => Some(FallbackReason::CircuitOpen),
            "timeout" => Some(FallbackReason::Timeout),
            "exception" => Some(FallbackReason::Exception),
            "degraded_state" => Some(FallbackReason::DegradedState),
            _ => None,
        }
    }

    pub fn all() -> &'static [FallbackReason] {
        &[
            FallbackReason::CircuitOpen,
            FallbackReason::Timeout,
            FallbackReason::Exception,
            FallbackReason::DegradedState,
        ]
    }
}

impl std::fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&EngineError> for FallbackReason {
    fn from(err: &EngineError) -> Self {
        match err {
            EngineError::Timeout(_) => FallbackReason::Timeout,
            EngineError::CircuitOpen => FallbackReason::CircuitOpen,
            EngineError::Persistence(_) => FallbackReason::DegradedState,
            EngineError::InvalidEvent(_) | EngineError::NumericInstability => {
                FallbackReason::Exception
            }
        }
    }
}
