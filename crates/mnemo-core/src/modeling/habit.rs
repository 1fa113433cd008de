use std::collections::VecDeque;

use chrono::Timelike;

use crate::config::HabitConfig;
use crate::types::{HabitProfile, HabitSampleCounts, RhythmProfile};

/// Learns when and how a user studies: a renormalized EMA histogram over
/// hour-of-day plus rolling medians for session length and batch size.
/// Preferred hours stay unpublished until the sample floor is met.
pub struct HabitRecognizer {
    config: HabitConfig,
    hour_weights: Vec<f64>,
    session_minutes: VecDeque<f64>,
    batch_sizes: VecDeque<f64>,
    samples: HabitSampleCounts,
}

impl HabitRecognizer {
    pub fn new(config: HabitConfig) -> Self {
        Self {
            config,
            hour_weights: vec![0.0; 24],
            session_minutes: VecDeque::new(),
            batch_sizes: VecDeque::new(),
            samples: HabitSampleCounts::default(),
        }
    }

    /// Rebuilds the recognizer from a persisted profile. The median windows
    /// start empty; the stored medians act as defaults until they refill.
    pub fn from_profile(config: HabitConfig, profile: &HabitProfile) -> Self {
        let mut recognizer = Self::new(config);
        if profile.hour_weights.len() == 24 {
            recognizer.hour_weights = profile.hour_weights.clone();
        }
        recognizer.samples = profile.samples.clone();
        if profile.rhythm.session_median_minutes > 0.0 {
            recognizer
                .session_minutes
                .push_back(profile.rhythm.session_median_minutes);
        }
        if profile.rhythm.batch_median > 0.0 {
            recognizer.batch_sizes.push_back(profile.rhythm.batch_median);
        }
        recognizer
    }

    pub fn observe_event(&mut self, timestamp_ms: i64) {
        let Some(hour) = hour_of(timestamp_ms) else {
            return;
        };

        let alpha = self.config.ema_alpha;
        for w in &mut self.hour_weights {
            *w *= 1.0 - alpha;
        }
        self.hour_weights[hour] += alpha;

        let sum: f64 = self.hour_weights.iter().sum();
        if sum > 0.0 {
            for w in &mut self.hour_weights {
                *w /= sum;
            }
        }

        self.samples.hour_events = self.samples.hour_events.saturating_add(1);
    }

    pub fn observe_session(&mut self, duration_minutes: f64, batch_size: i32) {
        if duration_minutes > 0.0 && duration_minutes < 180.0 {
            push_bounded(&mut self.session_minutes, duration_minutes, self.config.window);
            self.samples.sessions = self.samples.sessions.saturating_add(1);
        }
        if batch_size > 0 {
            push_bounded(&mut self.batch_sizes, batch_size as f64, self.config.window);
            self.samples.batches = self.samples.batches.saturating_add(1);
        }
    }

    pub fn profile(&self) -> HabitProfile {
        HabitProfile {
            hour_weights: self.hour_weights.clone(),
            rhythm: RhythmProfile {
                session_median_minutes: median(&self.session_minutes, 15.0),
                batch_median: median(&self.batch_sizes, 8.0),
            },
            preferred_hours: self.preferred_hours(),
            samples: self.samples.clone(),
        }
    }

    fn preferred_hours(&self) -> Vec<u8> {
        if self.samples.hour_events < self.config.min_samples {
            return vec![];
        }
        let mut indexed: Vec<(usize, f64)> = self
            .hour_weights
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, w)| *w > 0.0)
            .collect();
        indexed.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        indexed
            .into_iter()
            .take(self.config.max_preferred_hours)
            .map(|(hour, _)| hour as u8)
            .collect()
    }
}

impl Default for HabitRecognizer {
    fn default() -> Self {
        Self::new(HabitConfig::default())
    }
}

fn hour_of(timestamp_ms: i64) -> Option<usize> {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map(|dt| dt.hour() as usize)
}

fn push_bounded(buf: &mut VecDeque<f64>, value: f64, cap: usize) {
    buf.push_back(value);
    while buf.len() > cap.max(1) {
        buf.pop_front();
    }
}

fn median(values: &VecDeque<f64>, default: f64) -> f64 {
    if values.is_empty() {
        return default;
    }
    let mut sorted: Vec<f64> = values.iter().copied().collect();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        sorted[mid]
    } else {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at_hour(hour: i64) -> i64 {
        // 1970-01-01 is a Thursday; only the hour matters here.
        hour * 3_600_000
    }

    #[test]
    fn histogram_stays_normalized() {
        let mut recognizer = HabitRecognizer::default();
        for i in 0..40 {
            recognizer.observe_event(at_hour(i % 24));
        }
        let sum: f64 = recognizer.profile().hour_weights.iter().sum();
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn preferred_hours_hidden_below_sample_floor() {
        let mut recognizer = HabitRecognizer::default();
        for _ in 0..9 {
            recognizer.observe_event(at_hour(20));
        }
        assert!(recognizer.profile().preferred_hours.is_empty());
    }

    #[test]
    fn concentrated_usage_surfaces_preferred_hours() {
        let mut recognizer = HabitRecognizer::default();
        for _ in 0..12 {
            recognizer.observe_event(at_hour(20));
        }
        for _ in 0..4 {
            recognizer.observe_event(at_hour(7));
        }
        let preferred = recognizer.profile().preferred_hours;
        assert!(!preferred.is_empty());
        assert_eq!(preferred[0], 20);
        assert!(preferred.contains(&7));
        assert!(preferred.len() <= 3);
    }

    #[test]
    fn medians_default_until_sessions_arrive() {
        let recognizer = HabitRecognizer::default();
        let rhythm = recognizer.profile().rhythm;
        assert_eq!(rhythm.session_median_minutes, 15.0);
        assert_eq!(rhythm.batch_median, 8.0);
    }

    #[test]
    fn medians_track_observed_sessions() {
        let mut recognizer = HabitRecognizer::default();
        for minutes in [10.0, 20.0, 30.0] {
            recognizer.observe_session(minutes, 12);
        }
        let rhythm = recognizer.profile().rhythm;
        assert_eq!(rhythm.session_median_minutes, 20.0);
        assert_eq!(rhythm.batch_median, 12.0);
    }

    #[test]
    fn implausible_sessions_are_ignored() {
        let mut recognizer = HabitRecognizer::default();
        recognizer.observe_session(0.0, 0);
        recognizer.observe_session(500.0, -3);
        let profile = recognizer.profile();
        assert_eq!(profile.samples.sessions, 0);
        assert_eq!(profile.samples.batches, 0);
    }

    #[test]
    fn median_windows_are_bounded() {
        let mut recognizer = HabitRecognizer::default();
        for i in 0..120 {
            recognizer.observe_session(10.0 + i as f64 * 0.1, 8);
        }
        // Window of 50 keeps only the most recent values.
        let rhythm = recognizer.profile().rhythm;
        assert!(rhythm.session_median_minutes > 10.0 + 7.0 * 0.1);
    }

    #[test]
    fn rebuild_from_profile_keeps_histogram() {
        let mut recognizer = HabitRecognizer::default();
        for _ in 0..15 {
            recognizer.observe_event(at_hour(21));
        }
        let stored = recognizer.profile();
        let rebuilt = HabitRecognizer::from_profile(HabitConfig::default(), &stored);
        let profile = rebuilt.profile();
        assert_eq!(profile.preferred_hours, stored.preferred_hours);
        assert!((profile.hour_weights[21] - stored.hour_weights[21]).abs() < 1e-12);
    }
}
