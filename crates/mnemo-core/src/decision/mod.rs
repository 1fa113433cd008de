//! Strategy selection: cold-start phasing, candidate generation and the
//! pluggable learners that score candidates.

pub mod candidates;
pub mod coldstart;
pub mod heuristic;
pub mod learner;

pub use candidates::generate_candidates;
pub use coldstart::{ColdStartDecision, ColdStartManager};
pub use heuristic::HeuristicLearner;
pub use learner::{action_key, context_key, Learner, LearnerSnapshot, Selection, SelectionContext};
