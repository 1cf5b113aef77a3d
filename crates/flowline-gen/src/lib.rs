//! Number-generator families.
//!
//! The kernel consumes durations through the `NumberGenerator` capability
//! and never knows the distribution behind a draw. This crate provides the
//! families a model references: the classic continuous distributions,
//! discrete helpers, replayable sequences and the per-variant tables used
//! for processing and setup times.
//!
//! Draws that produce durations are clamped at zero; a negative sample
//! from an unbounded family (normal) would otherwise schedule into the
//! past.

use flowline_core::gen::NumberGenerator;
use flowline_core::id::VariantKey;
use flowline_core::SimRng;
use rand::Rng;
use rand_distr::{Distribution, Exp, Gamma, LogNormal, Normal, Triangular, Weibull};

pub use flowline_core::gen::{constant, Constant, Generator};

// ---------------------------------------------------------------------------
// Continuous families
// ---------------------------------------------------------------------------

/// Uniform over `[min, max)`.
#[derive(Debug, Clone, Copy)]
pub struct UniformGen {
    pub min: f64,
    pub max: f64,
}

impl UniformGen {
    pub fn new(min: f64, max: f64) -> Self {
        assert!(max >= min, "uniform bounds are reversed");
        Self { min, max }
    }
}

impl NumberGenerator for UniformGen {
    fn next(&mut self, rng: &mut SimRng) -> f64 {
        if self.max == self.min {
            return self.min;
        }
        rng.gen_range(self.min..self.max)
    }

    fn mean(&self) -> f64 {
        (self.min + self.max) / 2.0
    }

    fn is_deterministic(&self) -> bool {
        self.min == self.max
    }
}

/// Exponential with the given mean.
#[derive(Debug, Clone, Copy)]
pub struct Exponential {
    pub mean: f64,
}

impl Exponential {
    pub fn new(mean: f64) -> Self {
        assert!(mean > 0.0, "exponential mean must be positive");
        Self { mean }
    }
}

impl NumberGenerator for Exponential {
    fn next(&mut self, rng: &mut SimRng) -> f64 {
        Exp::new(1.0 / self.mean).expect("valid rate").sample(rng)
    }

    fn mean(&self) -> f64 {
        self.mean
    }

    fn is_deterministic(&self) -> bool {
        false
    }
}

/// Normal with mean and standard deviation; draws clamp at zero.
#[derive(Debug, Clone, Copy)]
pub struct NormalGen {
    pub mean: f64,
    pub std_dev: f64,
}

impl NormalGen {
    pub fn new(mean: f64, std_dev: f64) -> Self {
        assert!(std_dev >= 0.0, "standard deviation must not be negative");
        Self { mean, std_dev }
    }
}

impl NumberGenerator for NormalGen {
    fn next(&mut self, rng: &mut SimRng) -> f64 {
        Normal::new(self.mean, self.std_dev)
            .expect("valid normal parameters")
            .sample(rng)
            .max(0.0)
    }

    fn mean(&self) -> f64 {
        self.mean
    }

    fn is_deterministic(&self) -> bool {
        self.std_dev == 0.0
    }
}

/// Lognormal parameterized by the underlying normal's mu and sigma.
#[derive(Debug, Clone, Copy)]
pub struct LogNormalGen {
    pub mu: f64,
    pub sigma: f64,
}

impl LogNormalGen {
    pub fn new(mu: f64, sigma: f64) -> Self {
        assert!(sigma >= 0.0, "sigma must not be negative");
        Self { mu, sigma }
    }
}

impl NumberGenerator for LogNormalGen {
    fn next(&mut self, rng: &mut SimRng) -> f64 {
        LogNormal::new(self.mu, self.sigma)
            .expect("valid lognormal parameters")
            .sample(rng)
    }

    fn mean(&self) -> f64 {
        (self.mu + self.sigma * self.sigma / 2.0).exp()
    }

    fn is_deterministic(&self) -> bool {
        self.sigma == 0.0
    }
}

/// Triangular over `[min, max]` with the given mode.
#[derive(Debug, Clone, Copy)]
pub struct Triangle {
    pub min: f64,
    pub max: f64,
    pub mode: f64,
}

impl Triangle {
    pub fn new(min: f64, mode: f64, max: f64) -> Self {
        assert!(
            min <= mode && mode <= max,
            "triangle needs min <= mode <= max"
        );
        Self { min, max, mode }
    }
}

impl NumberGenerator for Triangle {
    fn next(&mut self, rng: &mut SimRng) -> f64 {
        if self.min == self.max {
            return self.min;
        }
        Triangular::new(self.min, self.max, self.mode)
            .expect("valid triangle parameters")
            .sample(rng)
    }

    fn mean(&self) -> f64 {
        (self.min + self.mode + self.max) / 3.0
    }

    fn is_deterministic(&self) -> bool {
        self.min == self.max
    }
}

/// Gamma with shape and scale.
#[derive(Debug, Clone, Copy)]
pub struct GammaGen {
    pub shape: f64,
    pub scale: f64,
}

impl GammaGen {
    pub fn new(shape: f64, scale: f64) -> Self {
        assert!(shape > 0.0 && scale > 0.0, "gamma parameters must be positive");
        Self { shape, scale }
    }
}

impl NumberGenerator for GammaGen {
    fn next(&mut self, rng: &mut SimRng) -> f64 {
        Gamma::new(self.shape, self.scale)
            .expect("valid gamma parameters")
            .sample(rng)
    }

    fn mean(&self) -> f64 {
        self.shape * self.scale
    }

    fn is_deterministic(&self) -> bool {
        false
    }
}

/// Erlang: a gamma with integer shape.
#[derive(Debug, Clone, Copy)]
pub struct Erlang {
    pub k: u32,
    pub rate: f64,
}

impl Erlang {
    pub fn new(k: u32, rate: f64) -> Self {
        assert!(k > 0 && rate > 0.0, "erlang parameters must be positive");
        Self { k, rate }
    }
}

impl NumberGenerator for Erlang {
    fn next(&mut self, rng: &mut SimRng) -> f64 {
        Gamma::new(self.k as f64, 1.0 / self.rate)
            .expect("valid erlang parameters")
            .sample(rng)
    }

    fn mean(&self) -> f64 {
        self.k as f64 / self.rate
    }

    fn is_deterministic(&self) -> bool {
        false
    }
}

/// Weibull with scale and shape.
#[derive(Debug, Clone, Copy)]
pub struct WeibullGen {
    pub scale: f64,
    pub shape: f64,
}

impl WeibullGen {
    pub fn new(scale: f64, shape: f64) -> Self {
        assert!(scale > 0.0 && shape > 0.0, "weibull parameters must be positive");
        Self { scale, shape }
    }
}

impl NumberGenerator for WeibullGen {
    fn next(&mut self, rng: &mut SimRng) -> f64 {
        Weibull::new(self.scale, self.shape)
            .expect("valid weibull parameters")
            .sample(rng)
    }

    fn mean(&self) -> f64 {
        // scale * Gamma(1 + 1/shape), via the Lanczos ln-gamma.
        self.scale * gamma_fn(1.0 + 1.0 / self.shape)
    }

    fn is_deterministic(&self) -> bool {
        false
    }
}

/// Gamma function via the Lanczos approximation; good to ~1e-10 over the
/// range used by distribution means.
fn gamma_fn(x: f64) -> f64 {
    const G: f64 = 7.0;
    const COEFFS: [f64; 9] = [
        0.999_999_999_999_809_93,
        676.520_368_121_885_1,
        -1_259.139_216_722_402_8,
        771.323_428_777_653_13,
        -176.615_029_162_140_6,
        12.507_343_278_686_905,
        -0.138_571_095_265_720_12,
        9.984_369_578_019_572e-6,
        1.505_632_735_149_311_6e-7,
    ];
    if x < 0.5 {
        std::f64::consts::PI / ((std::f64::consts::PI * x).sin() * gamma_fn(1.0 - x))
    } else {
        let x = x - 1.0;
        let mut a = COEFFS[0];
        let t = x + G + 0.5;
        for (i, &c) in COEFFS.iter().enumerate().skip(1) {
            a += c / (x + i as f64);
        }
        (2.0 * std::f64::consts::PI).sqrt() * t.powf(x + 0.5) * (-t).exp() * a
    }
}

// ---------------------------------------------------------------------------
// Discrete and replayable families
// ---------------------------------------------------------------------------

/// Uniform over the integers `min..=max`.
#[derive(Debug, Clone, Copy)]
pub struct DiscreteUniform {
    pub min: i64,
    pub max: i64,
}

impl DiscreteUniform {
    pub fn new(min: i64, max: i64) -> Self {
        assert!(max >= min, "discrete uniform bounds are reversed");
        Self { min, max }
    }
}

impl NumberGenerator for DiscreteUniform {
    fn next(&mut self, rng: &mut SimRng) -> f64 {
        rng.gen_range(self.min..=self.max) as f64
    }

    fn mean(&self) -> f64 {
        (self.min + self.max) as f64 / 2.0
    }

    fn is_deterministic(&self) -> bool {
        self.min == self.max
    }
}

/// Replays a fixed sequence of values, wrapping around.
#[derive(Debug, Clone)]
pub struct Sequence {
    values: Vec<f64>,
    cursor: usize,
}

impl Sequence {
    pub fn new(values: Vec<f64>) -> Self {
        assert!(!values.is_empty(), "a sequence needs at least one value");
        Self { values, cursor: 0 }
    }
}

impl NumberGenerator for Sequence {
    fn next(&mut self, _rng: &mut SimRng) -> f64 {
        let value = self.values[self.cursor % self.values.len()];
        self.cursor += 1;
        value
    }

    fn mean(&self) -> f64 {
        self.values.iter().sum::<f64>() / self.values.len() as f64
    }

    fn is_deterministic(&self) -> bool {
        // Deterministic given the replication, though not constant.
        true
    }

    fn init(&mut self) {
        self.cursor = 0;
    }
}

/// Samples from a weighted list of values (an empirical distribution).
#[derive(Debug, Clone)]
pub struct WeightedList {
    entries: Vec<(f64, f64)>,
    total: f64,
}

impl WeightedList {
    pub fn new(entries: Vec<(f64, f64)>) -> Self {
        assert!(!entries.is_empty(), "a weighted list needs entries");
        let total: f64 = entries.iter().map(|(_, w)| w.max(0.0)).sum();
        assert!(total > 0.0, "a weighted list needs positive weight");
        Self { entries, total }
    }
}

impl NumberGenerator for WeightedList {
    fn next(&mut self, rng: &mut SimRng) -> f64 {
        let mut roll = rng.gen_range(0.0..self.total);
        for &(value, weight) in &self.entries {
            let w = weight.max(0.0);
            if roll < w {
                return value;
            }
            roll -= w;
        }
        self.entries.last().map(|(v, _)| *v).unwrap_or(0.0)
    }

    fn mean(&self) -> f64 {
        self.entries
            .iter()
            .map(|&(v, w)| v * w.max(0.0))
            .sum::<f64>()
            / self.total
    }

    fn is_deterministic(&self) -> bool {
        self.entries.len() == 1
    }
}

// ---------------------------------------------------------------------------
// Tables
// ---------------------------------------------------------------------------

/// Per-variant values with a fallback.
#[derive(Debug, Clone)]
pub struct VariantTable {
    entries: Vec<(VariantKey, f64)>,
    pub default: f64,
}

impl VariantTable {
    pub fn new(default: f64) -> Self {
        Self {
            entries: Vec::new(),
            default,
        }
    }

    pub fn set(&mut self, variant: VariantKey, value: f64) {
        match self.entries.iter_mut().find(|(v, _)| *v == variant) {
            Some((_, old)) => *old = value,
            None => self.entries.push((variant, value)),
        }
    }

    fn lookup(&self, variant: Option<VariantKey>) -> f64 {
        variant
            .and_then(|v| self.entries.iter().find(|(key, _)| *key == v))
            .map(|(_, value)| *value)
            .unwrap_or(self.default)
    }
}

impl NumberGenerator for VariantTable {
    fn next(&mut self, _rng: &mut SimRng) -> f64 {
        self.default
    }

    fn next_for_variant(&mut self, _rng: &mut SimRng, variant: Option<VariantKey>) -> f64 {
        self.lookup(variant)
    }

    fn mean(&self) -> f64 {
        self.default
    }

    fn mean_for_variant(&self, variant: Option<VariantKey>) -> f64 {
        self.lookup(variant)
    }

    fn is_deterministic(&self) -> bool {
        true
    }
}

/// Setup durations per (to, from) variant change; `None` entries match any
/// variant on that side. An empty table is a configuration error the model
/// builder refuses.
#[derive(Debug, Clone)]
pub struct SetupTable {
    entries: Vec<(Option<VariantKey>, Option<VariantKey>, f64)>,
    pub default: f64,
}

impl SetupTable {
    pub fn new(default: f64) -> Self {
        Self {
            entries: Vec::new(),
            default,
        }
    }

    pub fn set(&mut self, to: Option<VariantKey>, from: Option<VariantKey>, value: f64) {
        self.entries.push((to, from, value));
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn lookup(&self, to: Option<VariantKey>, from: Option<VariantKey>) -> f64 {
        // Most specific first: exact pair, then wildcard-from, then
        // wildcard-to, then the default.
        for &(t, f, value) in &self.entries {
            if t == to && f == from {
                return value;
            }
        }
        for &(t, f, value) in &self.entries {
            if t == to && f.is_none() {
                return value;
            }
        }
        for &(t, f, value) in &self.entries {
            if t.is_none() && f == from {
                return value;
            }
        }
        self.default
    }
}

impl NumberGenerator for SetupTable {
    fn next(&mut self, _rng: &mut SimRng) -> f64 {
        self.default
    }

    fn next_setup(
        &mut self,
        _rng: &mut SimRng,
        to: Option<VariantKey>,
        from: Option<VariantKey>,
    ) -> f64 {
        self.lookup(to, from)
    }

    fn mean(&self) -> f64 {
        self.default
    }

    fn mean_setup(&self, to: Option<VariantKey>, from: Option<VariantKey>) -> f64 {
        self.lookup(to, from)
    }

    fn is_deterministic(&self) -> bool {
        true
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use slotmap::SlotMap;

    fn rng() -> SimRng {
        SimRng::seed_from_u64(1234)
    }

    fn sample_mean(gen: &mut impl NumberGenerator, n: usize) -> f64 {
        let mut rng = rng();
        (0..n).map(|_| gen.next(&mut rng)).sum::<f64>() / n as f64
    }

    #[test]
    fn uniform_stays_in_bounds() {
        let mut gen = UniformGen::new(2.0, 5.0);
        let mut rng = rng();
        for _ in 0..1000 {
            let v = gen.next(&mut rng);
            assert!((2.0..5.0).contains(&v));
        }
        assert_eq!(gen.mean(), 3.5);
    }

    #[test]
    fn exponential_sample_mean_matches() {
        let mut gen = Exponential::new(4.0);
        let observed = sample_mean(&mut gen, 20_000);
        assert!((observed - 4.0).abs() < 0.15, "observed {observed}");
    }

    #[test]
    fn normal_clamps_negative_draws() {
        let mut gen = NormalGen::new(0.5, 3.0);
        let mut rng = rng();
        for _ in 0..1000 {
            assert!(gen.next(&mut rng) >= 0.0);
        }
    }

    #[test]
    fn triangle_mean_is_analytic() {
        let gen = Triangle::new(1.0, 2.0, 6.0);
        assert!((gen.mean() - 3.0).abs() < 1e-12);
    }

    #[test]
    fn erlang_matches_gamma_mean() {
        let mut gen = Erlang::new(3, 0.5);
        assert_eq!(gen.mean(), 6.0);
        let observed = sample_mean(&mut gen, 20_000);
        assert!((observed - 6.0).abs() < 0.2, "observed {observed}");
    }

    #[test]
    fn weibull_mean_uses_gamma_function() {
        // Shape 1 reduces to an exponential with mean = scale.
        let gen = WeibullGen::new(5.0, 1.0);
        assert!((gen.mean() - 5.0).abs() < 1e-9);
    }

    #[test]
    fn sequence_replays_and_resets() {
        let mut gen = Sequence::new(vec![1.0, 2.0, 3.0]);
        let mut rng = rng();
        assert_eq!(gen.next(&mut rng), 1.0);
        assert_eq!(gen.next(&mut rng), 2.0);
        gen.init();
        assert_eq!(gen.next(&mut rng), 1.0);
        assert_eq!(gen.mean(), 2.0);
    }

    #[test]
    fn weighted_list_respects_weights() {
        let mut gen = WeightedList::new(vec![(1.0, 0.0), (9.0, 5.0)]);
        let mut rng = rng();
        for _ in 0..100 {
            assert_eq!(gen.next(&mut rng), 9.0);
        }
    }

    #[test]
    fn variant_table_falls_back_to_default() {
        let mut variants: SlotMap<VariantKey, ()> = SlotMap::with_key();
        let a = variants.insert(());
        let b = variants.insert(());
        let mut table = VariantTable::new(7.0);
        table.set(a, 3.0);
        let mut rng = rng();
        assert_eq!(table.next_for_variant(&mut rng, Some(a)), 3.0);
        assert_eq!(table.next_for_variant(&mut rng, Some(b)), 7.0);
        assert_eq!(table.mean_for_variant(None), 7.0);
    }

    #[test]
    fn setup_table_prefers_exact_pairs() {
        let mut variants: SlotMap<VariantKey, ()> = SlotMap::with_key();
        let a = variants.insert(());
        let b = variants.insert(());
        let mut table = SetupTable::new(1.0);
        table.set(Some(a), Some(b), 10.0);
        table.set(Some(a), None, 5.0);
        let mut rng = rng();
        assert_eq!(table.next_setup(&mut rng, Some(a), Some(b)), 10.0);
        assert_eq!(table.next_setup(&mut rng, Some(a), Some(a)), 5.0);
        assert_eq!(table.next_setup(&mut rng, Some(b), Some(a)), 1.0);
    }

    #[test]
    fn discrete_uniform_is_integral() {
        let mut gen = DiscreteUniform::new(2, 4);
        let mut rng = rng();
        for _ in 0..100 {
            let v = gen.next(&mut rng);
            assert!(v.fract() == 0.0 && (2.0..=4.0).contains(&v));
        }
    }
}
