use rand::Rng as _;

/// Decides whether or not a sampled metric should be sent.
pub trait Sampler: Send + Sync {
    /// Returns `true` if a metric with the given sample rate should be sent.
    fn should_send(&self, sample_rate: f64) -> bool;
}

/// Samples using a uniformly distributed random draw.
///
/// Each thread draws from its own lazily-seeded generator, so concurrent callers never contend on shared state.
#[derive(Clone, Copy, Debug, Default)]
pub struct RandomSampler;

impl Sampler for RandomSampler {
    fn should_send(&self, sample_rate: f64) -> bool {
        if sample_rate >= 1.0 {
            return true;
        }

        if sample_rate.is_nan() || sample_rate <= 0.0 {
            return false;
        }

        rand::rng().random::<f64>() < sample_rate
    }
}

/// Always returns the same decision, regardless of sample rate.
#[derive(Clone, Copy, Debug)]
pub struct FixedSampler(pub bool);

impl Sampler for FixedSampler {
    fn should_send(&self, _: f64) -> bool {
        self.0
    }
}
