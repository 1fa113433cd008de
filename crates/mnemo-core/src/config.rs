//! Engine configuration: one struct per concern, `Default` carrying the
//! documented values, and `EngineConfig::from_env` for deployment overrides.

use serde::{Deserialize, Serialize};

use crate::types::ColdStartPhase;

/// Which learner backs strategy selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LearnerKind {
    #[default]
    Linucb,
    Thompson,
    Heuristic,
}

impl LearnerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Linucb => "linucb",
            Self::Thompson => "thompson",
            Self::Heuristic => "heuristic",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "thompson" => Self::Thompson,
            "heuristic" => Self::Heuristic,
            _ => Self::Linucb,
        }
    }
}

/// Mean and spread used to squash a raw behavior signal into [0, 1].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalBaseline {
    pub mean: f64,
    pub std_dev: f64,
}

impl SignalBaseline {
    pub fn new(mean: f64, std_dev: f64) -> Self {
        Self { mean, std_dev }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureConfig {
    /// Sliding window of recent events kept per user.
    pub window_capacity: usize,
    pub response_time: SignalBaseline,
    pub pause: SignalBaseline,
    pub switches: SignalBaseline,
    pub focus_loss: SignalBaseline,
    pub dwell: SignalBaseline,
    pub density: SignalBaseline,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            window_capacity: 10,
            response_time: SignalBaseline::new(3000.0, 1500.0),
            pause: SignalBaseline::new(2.0, 2.0),
            switches: SignalBaseline::new(1.0, 1.0),
            focus_loss: SignalBaseline::new(5000.0, 3000.0),
            dwell: SignalBaseline::new(8000.0, 4000.0),
            density: SignalBaseline::new(0.5, 0.2),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttentionWeights {
    pub rt_mean: f64,
    pub rt_cv: f64,
    pub pause: f64,
    pub switch: f64,
    pub drift: f64,
    pub interaction: f64,
    pub focus_loss: f64,
}

impl Default for AttentionWeights {
    fn default() -> Self {
        Self {
            rt_mean: 0.25,
            rt_cv: 0.15,
            pause: 0.15,
            switch: 0.10,
            drift: 0.15,
            interaction: 0.10,
            focus_loss: 0.10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttentionConfig {
    pub weights: AttentionWeights,
    /// Steepness of the sigmoid mapping the weighted load to [0, 1].
    pub sigmoid_gain: f64,
    /// EMA inertia before volatility adaptation.
    pub base_beta: f64,
    pub beta_min: f64,
    pub beta_max: f64,
}

impl Default for AttentionConfig {
    fn default() -> Self {
        Self {
            weights: AttentionWeights::default(),
            sigmoid_gain: 4.0,
            base_beta: 0.7,
            beta_min: 0.15,
            beta_max: 0.8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FatigueConfig {
    /// Weight of the error-rate delta in accumulation.
    pub beta: f64,
    /// Weight of the response-time delta in accumulation.
    pub gamma: f64,
    /// Weight of repeated retries in accumulation.
    pub delta: f64,
    /// Exponential decay rate per break minute.
    pub decay_k: f64,
    /// Break length (minutes) that resets fatigue outright.
    pub long_break_minutes: f64,
    pub floor: f64,
    pub reset_value: f64,
}

impl Default for FatigueConfig {
    fn default() -> Self {
        Self {
            beta: 0.3,
            gamma: 0.3,
            delta: 0.2,
            decay_k: 0.05,
            long_break_minutes: 30.0,
            floor: 0.05,
            reset_value: 0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MotivationConfig {
    /// Retention of the previous value.
    pub rho: f64,
    /// Boost per correct answer.
    pub kappa: f64,
    /// Drop per wrong answer.
    pub lambda: f64,
    /// Drop on session quit.
    pub mu: f64,
    /// Below this, the consecutive-low counter ticks.
    pub low_threshold: f64,
    /// Consecutive lows before the long-term-low flag raises.
    pub consecutive_low_limit: u32,
}

impl Default for MotivationConfig {
    fn default() -> Self {
        Self {
            rho: 0.9,
            kappa: 0.1,
            lambda: 0.15,
            mu: 0.2,
            low_threshold: -0.3,
            consecutive_low_limit: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CognitiveConfig {
    /// Sample count at which the short-window blend weight reaches ~0.63.
    pub k0: f64,
    /// Rate of the slow EMA backing the blend.
    pub ema_alpha: f64,
    pub speed_baseline_ms: f64,
    pub window: usize,
}

impl Default for CognitiveConfig {
    fn default() -> Self {
        Self {
            k0: 8.0,
            ema_alpha: 0.1,
            speed_baseline_ms: 3000.0,
            window: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendConfig {
    pub window_days: i64,
    pub min_samples: usize,
    pub min_span_days: f64,
    /// Daily accuracy slope above which the trend counts as improving.
    pub up_threshold: f64,
    pub down_threshold: f64,
    /// Variance gate separating flat from stuck at near-zero slope.
    pub stuck_variance: f64,
    pub ema_alpha: f64,
    /// Confidence multiplier applied when only the EMA approximation ran.
    pub ema_confidence_penalty: f64,
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            window_days: 30,
            min_samples: 10,
            min_span_days: 15.0,
            up_threshold: 0.005,
            down_threshold: -0.005,
            stuck_variance: 0.01,
            ema_alpha: 0.3,
            ema_confidence_penalty: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HabitConfig {
    pub ema_alpha: f64,
    /// Rolling window backing the session/batch medians.
    pub window: usize,
    /// Below this many samples no preferred hours are published.
    pub min_samples: i32,
    pub max_preferred_hours: usize,
}

impl Default for HabitConfig {
    fn default() -> Self {
        Self {
            ema_alpha: 0.1,
            window: 50,
            min_samples: 10,
            max_preferred_hours: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColdStartConfig {
    /// Interactions below this stay in the classify phase.
    pub classify_limit: u64,
    /// Interactions at or above this run the normal phase.
    pub normal_limit: u64,
    pub classify_alpha: f64,
    pub explore_alpha: f64,
    /// Ceiling on the explore alpha when recent accuracy swings.
    pub explore_alpha_unstable_cap: f64,
    pub normal_alpha: f64,
    /// Accuracy swing (max-min over the window) treated as unstable.
    pub accuracy_instability: f64,
}

impl Default for ColdStartConfig {
    fn default() -> Self {
        Self {
            classify_limit: 15,
            normal_limit: 50,
            classify_alpha: 0.1,
            explore_alpha: 0.6,
            explore_alpha_unstable_cap: 0.35,
            normal_alpha: 0.2,
            accuracy_instability: 0.4,
        }
    }
}

impl ColdStartConfig {
    pub fn phase_for(&self, interaction_count: u64) -> ColdStartPhase {
        if interaction_count < self.classify_limit {
            ColdStartPhase::Classify
        } else if interaction_count < self.normal_limit {
            ColdStartPhase::Explore
        } else {
            ColdStartPhase::Normal
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BanditConfig {
    pub dimension: usize,
    pub lambda: f64,
    /// Forced full refactorization cadence, in updates.
    pub refactor_every: u64,
    /// Diagonal condition estimate beyond which the factor is rebuilt.
    pub condition_limit: f64,
}

impl Default for BanditConfig {
    fn default() -> Self {
        Self {
            dimension: mnemo_algo::FEATURE_DIMENSION,
            lambda: 1.0,
            refactor_every: 100,
            condition_limit: 1e8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardConfig {
    pub accuracy_weight: f64,
    pub speed_weight: f64,
    pub stability_weight: f64,
    pub retention_weight: f64,
    pub speed_baseline_ms: f64,
    /// A quit caps the reward at this value regardless of the blend.
    pub quit_floor: f64,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            accuracy_weight: 0.4,
            speed_weight: 0.2,
            stability_weight: 0.2,
            retention_weight: 0.2,
            speed_baseline_ms: 3000.0,
            quit_floor: -0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Inertia on the current strategy when blending toward the target.
    pub smoothing_tau: f64,
    pub fatigue_soft: f64,
    pub fatigue_hard: f64,
    pub motivation_soft: f64,
    pub motivation_hard: f64,
    pub attention_soft: f64,
    pub attention_hard: f64,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            smoothing_tau: 0.5,
            fatigue_soft: 0.6,
            fatigue_hard: 0.8,
            motivation_soft: -0.3,
            motivation_hard: -0.5,
            attention_soft: 0.4,
            attention_hard: 0.3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Number of recent outcomes in the sliding window.
    pub window: usize,
    /// Outcomes required before the failure ratio is evaluated.
    pub min_samples: usize,
    pub failure_ratio: f64,
    pub cooldown_ms: u64,
    pub half_open_probes: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            window: 20,
            min_samples: 10,
            failure_ratio: 0.5,
            cooldown_ms: 30_000,
            half_open_probes: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResilienceConfig {
    pub timeout_ms: u64,
    pub breaker: BreakerConfig,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 100,
            breaker: BreakerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    pub sweep_interval_secs: u64,
    /// Rows claimed per sweep.
    pub batch_size: usize,
    /// PROCESSING rows older than this are treated as abandoned.
    pub visibility_timeout_ms: i64,
    pub max_attempts: u32,
    pub base_backoff_ms: i64,
    /// Delay between an event and its delayed reward becoming due.
    pub default_delay_ms: i64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 60,
            batch_size: 50,
            visibility_timeout_ms: 300_000,
            max_attempts: 3,
            base_backoff_ms: 60_000,
            default_delay_ms: 600_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub max_users: usize,
    pub stale_after_secs: u64,
    pub cleanup_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_users: 10_000,
            stale_after_secs: 3600,
            cleanup_interval_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureFlags {
    pub habit_enabled: bool,
    pub trend_enabled: bool,
    pub delayed_reward_enabled: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            habit_enabled: true,
            trend_enabled: true,
            delayed_reward_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    pub learner: LearnerKind,
    pub feature: FeatureConfig,
    pub attention: AttentionConfig,
    pub fatigue: FatigueConfig,
    pub motivation: MotivationConfig,
    pub cognitive: CognitiveConfig,
    pub trend: TrendConfig,
    pub habit: HabitConfig,
    pub cold_start: ColdStartConfig,
    pub bandit: BanditConfig,
    pub reward: RewardConfig,
    pub strategy: StrategyConfig,
    pub resilience: ResilienceConfig,
    pub reconciler: ReconcilerConfig,
    pub cache: CacheConfig,
    pub flags: FeatureFlags,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("MNEMO_LEARNER") {
            config.learner = LearnerKind::parse(&val);
        }
        if let Ok(val) = std::env::var("MNEMO_TIMEOUT_MS") {
            config.resilience.timeout_ms = val.parse().unwrap_or(config.resilience.timeout_ms);
        }
        if let Ok(val) = std::env::var("MNEMO_BREAKER_FAILURE_RATIO") {
            config.resilience.breaker.failure_ratio =
                val.parse().unwrap_or(config.resilience.breaker.failure_ratio);
        }
        if let Ok(val) = std::env::var("MNEMO_SWEEP_INTERVAL_SECS") {
            config.reconciler.sweep_interval_secs =
                val.parse().unwrap_or(config.reconciler.sweep_interval_secs);
        }
        if let Ok(val) = std::env::var("MNEMO_REWARD_DELAY_MS") {
            config.reconciler.default_delay_ms =
                val.parse().unwrap_or(config.reconciler.default_delay_ms);
        }
        if let Ok(val) = std::env::var("MNEMO_HABIT_ENABLED") {
            config.flags.habit_enabled = val.parse().unwrap_or(true);
        }
        if let Ok(val) = std::env::var("MNEMO_TREND_ENABLED") {
            config.flags.trend_enabled = val.parse().unwrap_or(true);
        }
        if let Ok(val) = std::env::var("MNEMO_DELAYED_REWARD_ENABLED") {
            config.flags.delayed_reward_enabled = val.parse().unwrap_or(true);
        }

        config
    }
}
