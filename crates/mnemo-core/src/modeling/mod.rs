//! Latent-state estimators. Each one is a pure update law over normalized
//! behavior signals: deterministic, clamped on write, rebuildable from a
//! persisted [`crate::types::UserState`].

pub mod attention;
pub mod cognitive;
pub mod fatigue;
pub mod habit;
pub mod motivation;
pub mod trend;

pub use attention::AttentionMonitor;
pub use cognitive::CognitiveProfiler;
pub use fatigue::{FatigueEstimator, FatigueInputs};
pub use habit::HabitRecognizer;
pub use motivation::{MotivationSignal, MotivationTracker};
pub use trend::{TrendAnalyzer, TrendReading};
