//! Beta-Bernoulli Thompson sampler over string-keyed actions, with an
//! optional context dimension blended against the global posterior. The
//! caller owns key construction; this module only tracks posteriors and
//! draws samples. RNG is ChaCha so runs are reproducible under a seed.

use std::collections::HashMap;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

const MAX_POSTERIOR_CACHE: usize = 1000;
const MAX_GAMMA_ITERATIONS: usize = 10_000;
const DEFAULT_CONTEXT_WEIGHT: f64 = 0.7;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BetaPosterior {
    alpha: f64,
    beta: f64,
    last_used: u64,
}

impl BetaPosterior {
    fn new(prior_alpha: f64, prior_beta: f64) -> Self {
        BetaPosterior {
            alpha: prior_alpha,
            beta: prior_beta,
            last_used: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SampledChoice {
    pub selected_index: usize,
    pub sample: f64,
    pub all_samples: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThompsonSampler {
    prior_alpha: f64,
    prior_beta: f64,
    #[serde(default)]
    global: HashMap<String, BetaPosterior>,
    #[serde(default)]
    contextual: HashMap<String, BetaPosterior>,
    #[serde(default = "default_context_weight")]
    context_weight: f64,
    access_counter: u64,
    #[serde(skip, default = "fresh_rng")]
    rng: ChaCha8Rng,
}

impl ThompsonSampler {
    pub fn new(prior_alpha: f64, prior_beta: f64) -> Self {
        ThompsonSampler {
            prior_alpha,
            prior_beta,
            global: HashMap::new(),
            contextual: HashMap::new(),
            context_weight: DEFAULT_CONTEXT_WEIGHT,
            access_counter: 0,
            rng: fresh_rng(),
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = ChaCha8Rng::seed_from_u64(seed);
        self
    }

    pub fn set_context_weight(&mut self, weight: f64) {
        self.context_weight = weight.clamp(0.0, 1.0);
    }

    /// One posterior draw per action key, blended between the global and the
    /// context-conditioned posterior. Highest sample wins, ties to the
    /// lowest index.
    pub fn select(&mut self, context_key: &str, action_keys: &[String]) -> Option<SampledChoice> {
        if action_keys.is_empty() {
            return None;
        }

        let mut samples = Vec::with_capacity(action_keys.len());
        for key in action_keys {
            let global = self.ensure_global(key);
            let ctx = self.ensure_contextual(context_key, key);

            let global_sample = self.sample_beta(global.alpha, global.beta);
            let ctx_sample = self.sample_beta(ctx.alpha, ctx.beta);
            samples.push(
                (1.0 - self.context_weight) * global_sample + self.context_weight * ctx_sample,
            );
        }

        let mut best = 0;
        for (idx, &s) in samples.iter().enumerate() {
            if s > samples[best] {
                best = idx;
            }
        }

        Some(SampledChoice {
            selected_index: best,
            sample: samples[best],
            all_samples: samples,
        })
    }

    /// Posterior bump for one observation.
    pub fn update(&mut self, context_key: &str, action_key: &str, success: bool) {
        let counter = self.next_counter();
        let (prior_alpha, prior_beta) = (self.prior_alpha, self.prior_beta);

        let global = self
            .global
            .entry(action_key.to_string())
            .or_insert_with(|| BetaPosterior::new(prior_alpha, prior_beta));
        if success {
            global.alpha += 1.0;
        } else {
            global.beta += 1.0;
        }
        global.last_used = counter;

        let full_key = format!("{}|{}", context_key, action_key);
        let ctx = self
            .contextual
            .entry(full_key)
            .or_insert_with(|| BetaPosterior::new(prior_alpha, prior_beta));
        if success {
            ctx.alpha += 1.0;
        } else {
            ctx.beta += 1.0;
        }
        ctx.last_used = counter;

        evict_if_needed(&mut self.global);
        evict_if_needed(&mut self.contextual);
    }

    pub fn posterior_mean(&self, action_key: &str) -> f64 {
        match self.global.get(action_key) {
            Some(p) => p.alpha / (p.alpha + p.beta),
            None => self.prior_alpha / (self.prior_alpha + self.prior_beta),
        }
    }

    fn next_counter(&mut self) -> u64 {
        self.access_counter += 1;
        self.access_counter
    }

    fn ensure_global(&mut self, action_key: &str) -> BetaPosterior {
        let counter = self.next_counter();
        let (prior_alpha, prior_beta) = (self.prior_alpha, self.prior_beta);
        self.global
            .entry(action_key.to_string())
            .and_modify(|p| p.last_used = counter)
            .or_insert_with(|| {
                let mut p = BetaPosterior::new(prior_alpha, prior_beta);
                p.last_used = counter;
                p
            })
            .clone()
    }

    fn ensure_contextual(&mut self, context_key: &str, action_key: &str) -> BetaPosterior {
        let full_key = format!("{}|{}", context_key, action_key);
        let counter = self.next_counter();
        let (prior_alpha, prior_beta) = (self.prior_alpha, self.prior_beta);
        self.contextual
            .entry(full_key)
            .and_modify(|p| p.last_used = counter)
            .or_insert_with(|| {
                let mut p = BetaPosterior::new(prior_alpha, prior_beta);
                p.last_used = counter;
                p
            })
            .clone()
    }

    fn sample_beta(&mut self, alpha: f64, beta: f64) -> f64 {
        if alpha <= 0.0 || beta <= 0.0 {
            return 0.5;
        }

        let g1 = self.sample_gamma(alpha, 1.0);
        let g2 = self.sample_gamma(beta, 1.0);

        if g1 + g2 == 0.0 {
            return 0.5;
        }
        g1 / (g1 + g2)
    }

    // Marsaglia-Tsang squeeze method; the shape<1 case boosts and corrects
    // with a uniform power.
    fn sample_gamma(&mut self, shape: f64, scale: f64) -> f64 {
        if shape < 1.0 {
            let u: f64 = self.rng.gen();
            return self.sample_gamma(shape + 1.0, scale) * u.powf(1.0 / shape);
        }

        let d = shape - 1.0 / 3.0;
        let c = 1.0 / (9.0 * d).sqrt();

        for _ in 0..MAX_GAMMA_ITERATIONS {
            let z = self.sample_normal();
            let v = (1.0 + c * z).powi(3);
            if v <= 0.0 {
                continue;
            }

            let u: f64 = self.rng.gen();
            let z_sq = z * z;

            if u < 1.0 - 0.0331 * z_sq * z_sq {
                return d * v * scale;
            }
            if u.ln() < 0.5 * z_sq + d * (1.0 - v + v.ln()) {
                return d * v * scale;
            }
        }

        d * scale
    }

    // Box-Muller.
    fn sample_normal(&mut self) -> f64 {
        let u1: f64 = self.rng.gen::<f64>().max(1e-10);
        let u2: f64 = self.rng.gen();
        (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
    }
}

impl Default for ThompsonSampler {
    fn default() -> Self {
        ThompsonSampler::new(1.0, 1.0)
    }
}

fn evict_if_needed(map: &mut HashMap<String, BetaPosterior>) {
    if map.len() <= MAX_POSTERIOR_CACHE {
        return;
    }

    let mut entries: Vec<_> = map.iter().map(|(k, v)| (k.clone(), v.last_used)).collect();
    entries.sort_by_key(|(_, lu)| *lu);

    let to_remove = map.len() - MAX_POSTERIOR_CACHE / 2;
    for (key, _) in entries.into_iter().take(to_remove) {
        map.remove(&key);
    }
}

fn default_context_weight() -> f64 {
    DEFAULT_CONTEXT_WEIGHT
}

fn fresh_rng() -> ChaCha8Rng {
    ChaCha8Rng::from_entropy()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn empty_action_list_is_none() {
        let mut sampler = ThompsonSampler::default().with_seed(7);
        assert!(sampler.select("ctx", &[]).is_none());
    }

    #[test]
    fn samples_stay_in_unit_interval() {
        let mut sampler = ThompsonSampler::default().with_seed(7);
        let actions = keys(&["a", "b", "c"]);
        for _ in 0..50 {
            let choice = sampler.select("ctx", &actions).unwrap();
            assert!(choice.all_samples.iter().all(|&s| (0.0..=1.0).contains(&s)));
        }
    }

    #[test]
    fn rewarded_action_dominates_eventually() {
        let mut sampler = ThompsonSampler::default().with_seed(42);
        let actions = keys(&["good", "bad"]);

        for _ in 0..200 {
            sampler.update("ctx", "good", true);
            sampler.update("ctx", "bad", false);
        }

        let mut wins = 0;
        for _ in 0..100 {
            let choice = sampler.select("ctx", &actions).unwrap();
            if choice.selected_index == 0 {
                wins += 1;
            }
        }
        assert!(wins > 85, "expected dominance, got {}/100", wins);
    }

    #[test]
    fn posterior_mean_moves_with_updates() {
        let mut sampler = ThompsonSampler::default().with_seed(1);
        let before = sampler.posterior_mean("x");
        for _ in 0..10 {
            sampler.update("ctx", "x", true);
        }
        assert!(sampler.posterior_mean("x") > before);
    }

    #[test]
    fn serde_roundtrip_keeps_posteriors() {
        let mut sampler = ThompsonSampler::default().with_seed(5);
        for _ in 0..7 {
            sampler.update("ctx", "a", true);
            sampler.update("ctx", "b", false);
        }

        let json = serde_json::to_string(&sampler).unwrap();
        let restored: ThompsonSampler = serde_json::from_str(&json).unwrap();

        assert!((restored.posterior_mean("a") - sampler.posterior_mean("a")).abs() < 1e-12);
        assert!((restored.posterior_mean("b") - sampler.posterior_mean("b")).abs() < 1e-12);
    }

    #[test]
    fn eviction_keeps_map_bounded() {
        let mut sampler = ThompsonSampler::default().with_seed(9);
        for i in 0..(MAX_POSTERIOR_CACHE + 100) {
            sampler.update("ctx", &format!("a{}", i), true);
        }
        assert!(sampler.global.len() <= MAX_POSTERIOR_CACHE);
    }
}
