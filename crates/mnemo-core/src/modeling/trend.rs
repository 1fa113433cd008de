use std::collections::VecDeque;

use crate::config::TrendConfig;
use crate::types::TrendDirection;

const MS_PER_DAY: f64 = 86_400_000.0;

/// Classified long-horizon performance trend with its estimated daily
/// accuracy slope and a confidence for it.
#[derive(Debug, Clone, Copy)]
pub struct TrendReading {
    pub direction: TrendDirection,
    pub slope: f64,
    pub confidence: f64,
}

impl Default for TrendReading {
    fn default() -> Self {
        Self {
            direction: TrendDirection::Flat,
            slope: 0.0,
            confidence: 0.0,
        }
    }
}

/// Long-horizon accuracy trend over a rolling 30-day window.
///
/// With enough samples spanning enough days the slope comes from an ordinary
/// least-squares fit over (day, accuracy) pairs; before that a fast-vs-slow
/// EMA approximation stands in, carrying a confidence penalty. Near-zero
/// slopes split into flat or stuck on the variance gate.
pub struct TrendAnalyzer {
    config: TrendConfig,
    samples: VecDeque<(f64, f64)>,
    ema_fast: Option<f64>,
    ema_slow: Option<f64>,
    current: TrendReading,
}

impl TrendAnalyzer {
    pub fn new(config: TrendConfig) -> Self {
        Self {
            config,
            samples: VecDeque::new(),
            ema_fast: None,
            ema_slow: None,
            current: TrendReading::default(),
        }
    }

    pub fn update(&mut self, timestamp_ms: i64, accuracy: f64) -> TrendReading {
        let day = timestamp_ms as f64 / MS_PER_DAY;
        let accuracy = accuracy.clamp(0.0, 1.0);
        self.samples.push_back((day, accuracy));
        while let Some(&(oldest, _)) = self.samples.front() {
            if day - oldest > self.config.window_days as f64 {
                self.samples.pop_front();
            } else {
                break;
            }
        }

        let fast_alpha = self.config.ema_alpha;
        let slow_alpha = self.config.ema_alpha / 3.0;
        self.ema_fast = Some(match self.ema_fast {
            Some(v) => fast_alpha * accuracy + (1.0 - fast_alpha) * v,
            None => accuracy,
        });
        self.ema_slow = Some(match self.ema_slow {
            Some(v) => slow_alpha * accuracy + (1.0 - slow_alpha) * v,
            None => accuracy,
        });

        let span_days = match (self.samples.front(), self.samples.back()) {
            (Some(&(first, _)), Some(&(last, _))) => last - first,
            _ => 0.0,
        };

        let fill = (self.samples.len() as f64 / self.config.min_samples as f64).min(1.0);
        let (slope, confidence) = if self.samples.len() >= self.config.min_samples
            && span_days >= self.config.min_span_days
        {
            (self.ols_slope(), 1.0)
        } else {
            let fast = self.ema_fast.unwrap_or(accuracy);
            let slow = self.ema_slow.unwrap_or(accuracy);
            let approx = (fast - slow) / span_days.max(1.0);
            (approx, fill * self.config.ema_confidence_penalty)
        };

        let direction = if self.samples.len() < 5 {
            TrendDirection::Flat
        } else if slope > self.config.up_threshold {
            TrendDirection::Up
        } else if slope < self.config.down_threshold {
            TrendDirection::Down
        } else if self.variance() < self.config.stuck_variance {
            TrendDirection::Stuck
        } else {
            TrendDirection::Flat
        };

        self.current = TrendReading {
            direction,
            slope,
            confidence,
        };
        self.current
    }

    pub fn current(&self) -> TrendReading {
        self.current
    }

    pub fn reset(&mut self) {
        self.samples.clear();
        self.ema_fast = None;
        self.ema_slow = None;
        self.current = TrendReading::default();
    }

    fn ols_slope(&self) -> f64 {
        let n = self.samples.len() as f64;
        if n < 2.0 {
            return 0.0;
        }
        let mean_x = self.samples.iter().map(|(x, _)| x).sum::<f64>() / n;
        let mean_y = self.samples.iter().map(|(_, y)| y).sum::<f64>() / n;
        let mut num = 0.0;
        let mut den = 0.0;
        for &(x, y) in &self.samples {
            num += (x - mean_x) * (y - mean_y);
            den += (x - mean_x).powi(2);
        }
        if den.abs() < 1e-10 {
            0.0
        } else {
            num / den
        }
    }

    fn variance(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let mean = self.samples.iter().map(|(_, y)| y).sum::<f64>() / self.samples.len() as f64;
        self.samples
            .iter()
            .map(|(_, y)| (y - mean).powi(2))
            .sum::<f64>()
            / self.samples.len() as f64
    }
}

impl Default for TrendAnalyzer {
    fn default() -> Self {
        Self::new(TrendConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day_ms(day: i64) -> i64 {
        day * 86_400_000
    }

    #[test]
    fn steady_improvement_reads_up() {
        let mut analyzer = TrendAnalyzer::default();
        let mut reading = TrendReading::default();
        // 0.5 -> 0.9 over 20 days: slope 0.02/day.
        for day in 0..20 {
            reading = analyzer.update(day_ms(day), 0.5 + 0.02 * day as f64);
        }
        assert_eq!(reading.direction, TrendDirection::Up);
        assert!(reading.slope > 0.015);
        assert_eq!(reading.confidence, 1.0);
    }

    #[test]
    fn steady_decline_reads_down() {
        let mut analyzer = TrendAnalyzer::default();
        let mut reading = TrendReading::default();
        for day in 0..20 {
            reading = analyzer.update(day_ms(day), 0.9 - 0.02 * day as f64);
        }
        assert_eq!(reading.direction, TrendDirection::Down);
        assert!(reading.slope < -0.015);
    }

    #[test]
    fn tight_plateau_reads_stuck() {
        let mut analyzer = TrendAnalyzer::default();
        let mut reading = TrendReading::default();
        for day in 0..20 {
            reading = analyzer.update(day_ms(day), 0.6);
        }
        assert_eq!(reading.direction, TrendDirection::Stuck);
        assert!(reading.slope.abs() < 1e-9);
    }

    #[test]
    fn noisy_level_performance_reads_flat() {
        let mut analyzer = TrendAnalyzer::default();
        let mut reading = TrendReading::default();
        for day in 0..20 {
            let acc = if day % 2 == 0 { 0.45 } else { 0.9 };
            reading = analyzer.update(day_ms(day), acc);
        }
        assert_eq!(reading.direction, TrendDirection::Flat);
    }

    #[test]
    fn sparse_history_uses_penalized_approximation() {
        let mut analyzer = TrendAnalyzer::default();
        let mut reading = TrendReading::default();
        // Only 8 samples: below the OLS floor.
        for day in 0..8 {
            reading = analyzer.update(day_ms(day * 3), 0.5 + 0.03 * day as f64);
        }
        assert!(reading.confidence <= 0.5);
        assert!(reading.confidence > 0.0);
    }

    #[test]
    fn short_span_uses_penalized_approximation() {
        let mut analyzer = TrendAnalyzer::default();
        let mut reading = TrendReading::default();
        // Plenty of samples but all within five days.
        for i in 0..12 {
            reading = analyzer.update(day_ms(0) + i * 36_000_000, 0.7);
        }
        assert!(reading.confidence <= 0.5);
    }

    #[test]
    fn window_drops_samples_older_than_thirty_days() {
        let mut analyzer = TrendAnalyzer::default();
        // Poor results long ago, strong results now; only the recent window
        // should drive the slope.
        for day in 0..10 {
            analyzer.update(day_ms(day), 0.2);
        }
        let mut reading = TrendReading::default();
        for day in 60..80 {
            reading = analyzer.update(day_ms(day), 0.8);
        }
        assert_ne!(reading.direction, TrendDirection::Up);
        assert!(reading.slope.abs() < 0.005 + 1e-9);
    }

    #[test]
    fn too_few_samples_stay_flat() {
        let mut analyzer = TrendAnalyzer::default();
        let reading = analyzer.update(day_ms(0), 0.1);
        assert_eq!(reading.direction, TrendDirection::Flat);
    }
}
