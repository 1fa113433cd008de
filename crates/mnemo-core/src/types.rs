//! Core data model: events, estimator state, strategies and decision output.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EngineError, FallbackReason};

/// Hard ceiling on a plausible answer time. Longer means the user walked away.
pub const MAX_RESPONSE_TIME_MS: i64 = 120_000;

/// Version of the feature layout produced by the current builder.
/// Version 1 was the 12-dim layout without time-of-day and cross terms.
pub const FEATURE_SCHEMA_VERSION: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DifficultyLevel {
    Easy,
    #[default]
    Mid,
    Hard,
}

impl DifficultyLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Easy => "easy",
            Self::Mid => "mid",
            Self::Hard => "hard",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "easy" => Self::Easy,
            "hard" => Self::Hard,
            _ => Self::Mid,
        }
    }

    pub fn harder(&self) -> Self {
        match self {
            Self::Easy => Self::Mid,
            _ => Self::Hard,
        }
    }

    pub fn easier(&self) -> Self {
        match self {
            Self::Hard => Self::Mid,
            _ => Self::Easy,
        }
    }

    /// Encoding used in the feature vector and candidate action features.
    pub fn feature_weight(&self) -> f64 {
        match self {
            Self::Easy => 0.3,
            Self::Mid => 0.6,
            Self::Hard => 0.9,
        }
    }

    /// Caps `self` at `ceiling`, keeping the easier of the two.
    pub fn min(self, ceiling: Self) -> Self {
        if self.feature_weight() <= ceiling.feature_weight() {
            self
        } else {
            ceiling
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Up,
    #[default]
    Flat,
    Stuck,
    Down,
}

impl TrendDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Flat => "flat",
            Self::Stuck => "stuck",
            Self::Down => "down",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "up" => Self::Up,
            "stuck" => Self::Stuck,
            "down" => Self::Down,
            _ => Self::Flat,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UserType {
    Fast,
    #[default]
    Stable,
    Cautious,
}

impl UserType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::Stable => "stable",
            Self::Cautious => "cautious",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ColdStartPhase {
    #[default]
    Classify,
    Explore,
    Normal,
}

impl ColdStartPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Classify => "classify",
            Self::Explore => "explore",
            Self::Normal => "normal",
        }
    }
}

/// Slow-moving cognitive traits, each in [0, 1].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CognitiveProfile {
    pub mem: f64,
    pub speed: f64,
    pub stability: f64,
}

impl Default for CognitiveProfile {
    fn default() -> Self {
        Self {
            mem: 0.5,
            speed: 0.5,
            stability: 0.5,
        }
    }
}

impl CognitiveProfile {
    pub fn mean(&self) -> f64 {
        (self.mem + self.speed + self.stability) / 3.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RhythmProfile {
    pub session_median_minutes: f64,
    pub batch_median: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct HabitSampleCounts {
    pub hour_events: i32,
    pub sessions: i32,
    pub batches: i32,
}

/// Learned study-time and rhythm preferences.
///
/// `hour_weights` is a 24-bucket probability distribution over hour-of-day;
/// `preferred_hours` stays empty until enough samples have accumulated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HabitProfile {
    pub hour_weights: Vec<f64>,
    pub rhythm: RhythmProfile,
    pub preferred_hours: Vec<u8>,
    pub samples: HabitSampleCounts,
}

impl Default for HabitProfile {
    fn default() -> Self {
        Self {
            hour_weights: vec![0.0; 24],
            rhythm: RhythmProfile::default(),
            preferred_hours: vec![],
            samples: HabitSampleCounts::default(),
        }
    }
}

/// Latent user state maintained by the estimators.
///
/// `attention`, `fatigue` and `confidence` live in [0, 1]; `motivation` in
/// [-1, 1]. `updated_at_ms` is the wall-clock time of the last accepted event
/// and drives fatigue decay across sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserState {
    pub attention: f64,
    pub fatigue: f64,
    pub cognitive: CognitiveProfile,
    pub motivation: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub habit: Option<HabitProfile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trend: Option<TrendDirection>,
    pub confidence: f64,
    pub updated_at_ms: i64,
}

impl Default for UserState {
    fn default() -> Self {
        Self {
            attention: 0.7,
            fatigue: 0.0,
            cognitive: CognitiveProfile::default(),
            motivation: 0.5,
            habit: None,
            trend: None,
            confidence: 0.5,
            updated_at_ms: chrono::Utc::now().timestamp_millis(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColdStartState {
    pub phase: ColdStartPhase,
    pub user_type: Option<UserType>,
    /// Accumulated evidence for fast / stable / cautious, in that order.
    #[serde(default)]
    pub classification_scores: [f64; 3],
    pub settled_strategy: Option<StrategyParams>,
}

impl Default for ColdStartState {
    fn default() -> Self {
        Self {
            phase: ColdStartPhase::Classify,
            user_type: None,
            classification_scores: [0.0; 3],
            settled_strategy: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyParams {
    pub interval_scale: f64,
    pub new_ratio: f64,
    pub difficulty: DifficultyLevel,
    pub batch_size: i32,
    pub hint_level: i32,
}

impl Default for StrategyParams {
    fn default() -> Self {
        Self {
            interval_scale: 1.0,
            new_ratio: 0.2,
            difficulty: DifficultyLevel::Mid,
            batch_size: 8,
            hint_level: 1,
        }
    }
}

impl StrategyParams {
    pub fn for_user_type(user_type: UserType) -> Self {
        match user_type {
            UserType::Fast => Self {
                interval_scale: 0.8,
                new_ratio: 0.3,
                difficulty: DifficultyLevel::Hard,
                batch_size: 12,
                hint_level: 0,
            },
            UserType::Stable => Self::default(),
            UserType::Cautious => Self {
                interval_scale: 1.2,
                new_ratio: 0.1,
                difficulty: DifficultyLevel::Easy,
                batch_size: 5,
                hint_level: 2,
            },
        }
    }

    /// Continuous bounds every emitted strategy respects.
    pub fn clamped(mut self) -> Self {
        self.interval_scale = self.interval_scale.clamp(0.5, 1.5);
        self.new_ratio = self.new_ratio.clamp(0.1, 0.4);
        self.batch_size = self.batch_size.clamp(5, 16);
        self.hint_level = self.hint_level.clamp(0, 2);
        self
    }
}

/// The raw action an arm of the learner maps to, before smoothing and
/// guardrails produce the final [`StrategyParams`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    pub interval_scale: f64,
    pub new_ratio: f64,
    pub difficulty: DifficultyLevel,
    pub batch_size: i32,
    pub hint_level: i32,
}

impl From<StrategyParams> for Action {
    fn from(params: StrategyParams) -> Self {
        Self {
            interval_scale: params.interval_scale,
            new_ratio: params.new_ratio,
            difficulty: params.difficulty,
            batch_size: params.batch_size,
            hint_level: params.hint_level,
        }
    }
}

impl From<Action> for StrategyParams {
    fn from(action: Action) -> Self {
        Self {
            interval_scale: action.interval_scale,
            new_ratio: action.new_ratio,
            difficulty: action.difficulty,
            batch_size: action.batch_size,
            hint_level: action.hint_level,
        }
    }
}

/// Labeled, versioned context vector. Built once per event and treated as
/// immutable afterwards; the version gates bandit dimension migration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureVector {
    pub values: Vec<f64>,
    pub labels: Vec<String>,
    pub schema_version: u32,
    pub built_at_ms: i64,
}

impl FeatureVector {
    pub fn new(values: Vec<f64>, labels: Vec<String>, now_ms: i64) -> Self {
        Self {
            values,
            labels,
            schema_version: FEATURE_SCHEMA_VERSION,
            built_at_ms: now_ms,
        }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }
}

fn new_event_id() -> String {
    Uuid::new_v4().to_string()
}

/// One observed answer interaction, as reported by the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEvent {
    pub user_id: String,
    #[serde(default = "new_event_id")]
    pub event_id: String,
    pub word_id: Option<String>,
    pub is_correct: bool,
    pub response_time_ms: i64,
    pub dwell_time_ms: Option<i64>,
    pub timestamp_ms: i64,
    #[serde(default)]
    pub pause_count: i32,
    #[serde(default)]
    pub switch_count: i32,
    #[serde(default)]
    pub retry_count: i32,
    pub focus_loss_duration_ms: Option<i64>,
    pub interaction_density: Option<f64>,
    #[serde(default)]
    pub is_quit: bool,
    pub session_duration_ms: Option<i64>,
}

impl Default for RawEvent {
    fn default() -> Self {
        Self {
            user_id: String::new(),
            event_id: new_event_id(),
            word_id: None,
            is_correct: true,
            response_time_ms: 3000,
            dwell_time_ms: None,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            pause_count: 0,
            switch_count: 0,
            retry_count: 0,
            focus_loss_duration_ms: None,
            interaction_density: None,
            is_quit: false,
            session_duration_ms: None,
        }
    }
}

impl RawEvent {
    /// Rejects events no estimator should ever see. A rejected event leaves
    /// all per-user state and windows untouched.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.user_id.is_empty() {
            return Err(EngineError::InvalidEvent("empty userId".into()));
        }
        if self.response_time_ms <= 0 {
            return Err(EngineError::InvalidEvent(format!(
                "responseTimeMs must be positive, got {}",
                self.response_time_ms
            )));
        }
        if self.response_time_ms > MAX_RESPONSE_TIME_MS {
            return Err(EngineError::InvalidEvent(format!(
                "responseTimeMs {} exceeds ceiling {}",
                self.response_time_ms, MAX_RESPONSE_TIME_MS
            )));
        }
        if let Some(d) = self.interaction_density {
            if !d.is_finite() {
                return Err(EngineError::InvalidEvent(
                    "interactionDensity is not finite".into(),
                ));
            }
        }
        if self.timestamp_ms <= 0 {
            return Err(EngineError::InvalidEvent(format!(
                "timestampMs must be positive, got {}",
                self.timestamp_ms
            )));
        }
        Ok(())
    }
}

/// Sub-scores feeding the scalar reward, each in [0, 1] before weighting.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RewardBreakdown {
    pub accuracy: f64,
    pub speed: f64,
    pub stability: f64,
    pub retention: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reward {
    pub value: f64,
    pub breakdown: RewardBreakdown,
    pub at_ms: i64,
}

impl Reward {
    pub fn new(value: f64, breakdown: RewardBreakdown, now_ms: i64) -> Self {
        Self {
            value: value.clamp(-1.0, 1.0),
            breakdown,
            at_ms: now_ms,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionFactor {
    pub name: String,
    pub value: f64,
    pub impact: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DecisionExplanation {
    pub factors: Vec<DecisionFactor>,
    pub changes: Vec<String>,
    pub summary: String,
}

/// Everything a caller gets back from one processed event. Always well formed,
/// including on degraded paths, where `degraded` and `fallback_reason` say why.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessResult {
    pub state: UserState,
    pub strategy: StrategyParams,
    pub action: Action,
    pub reward: Reward,
    pub explanation: DecisionExplanation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feature_vector: Option<FeatureVector>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<ColdStartPhase>,
    pub should_break: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    pub degraded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<FallbackReason>,
    pub latency_ms: u64,
}

/// Per-user persisted snapshot: the estimator state plus everything the next
/// invocation needs to continue where the last one stopped. Bandit snapshots
/// are stored separately through the model repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub user_id: String,
    pub state: UserState,
    pub strategy: StrategyParams,
    pub cold_start: ColdStartState,
    pub interaction_count: u64,
    pub last_updated_ms: i64,
}

impl UserRecord {
    pub fn new(user_id: impl Into<String>, now_ms: i64) -> Self {
        Self {
            user_id: user_id.into(),
            state: UserState {
                updated_at_ms: now_ms,
                ..UserState::default()
            },
            strategy: StrategyParams::default(),
            cold_start: ColdStartState::default(),
            interaction_count: 0,
            last_updated_ms: now_ms,
        }
    }
}
