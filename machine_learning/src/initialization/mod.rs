use rand::Rng;
use rand_distr::{Distribution, Normal, Uniform};
use serde::{Deserialize, Serialize};

use crate::Result;

/// How a layer's weights are drawn. Fan-based schemes take the layer's
/// `(inputs, outputs)` at sampling time.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Initializer {
    Const { value: f32 },
    Uniform { low: f32, high: f32 },
    Normal { mean: f32, std_dev: f32 },
    XavierUniform,
    LecunUniform,
    Kaiming,
    Xavier,
}

impl Default for Initializer {
    fn default() -> Self {
        Self::XavierUniform
    }
}

/// Fills `out` with samples of `distribution`.
fn sample<R: Rng, D: Distribution<f32>>(rng: &mut R, distribution: D, out: &mut [f32]) {
    for w in out.iter_mut() {
        *w = distribution.sample(rng);
    }
}

impl Initializer {
    /// Samples one layer's weights.
    ///
    /// # Arguments
    /// * `rng` - A random number generator.
    /// * `fan_in` - The number of input units in the weight tensor.
    /// * `fan_out` - The number of output units in the weight tensor.
    /// * `out` - The weights to overwrite.
    ///
    /// # Returns
    /// An error if the distribution's parameters are invalid.
    pub fn fill<R: Rng>(
        &self,
        rng: &mut R,
        fan_in: usize,
        fan_out: usize,
        out: &mut [f32],
    ) -> Result<()> {
        match *self {
            Self::Const { value } => out.fill(value),
            Self::Uniform { low, high } => sample(rng, Uniform::new(low, high)?, out),
            Self::Normal { mean, std_dev } => sample(rng, Normal::new(mean, std_dev)?, out),
            Self::XavierUniform => {
                let range = (6. / (fan_in + fan_out) as f32).sqrt();
                sample(rng, Uniform::new(-range, range)?, out)
            }
            Self::LecunUniform => {
                let range = (3. / fan_in as f32).sqrt();
                sample(rng, Uniform::new(-range, range)?, out)
            }
            Self::Kaiming => {
                let std_dev = (2. / fan_in as f32).sqrt();
                sample(rng, Normal::new(0., std_dev)?, out)
            }
            Self::Xavier => {
                let std_dev = (2. / (fan_in + fan_out) as f32).sqrt();
                sample(rng, Normal::new(0., std_dev)?, out)
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    #[test]
    fn xavier_uniform_stays_within_its_range() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut out = vec![0.; 1000];
        Initializer::XavierUniform
            .fill(&mut rng, 784, 16, &mut out)
            .unwrap();

        let range = (6. / 800f32).sqrt();
        assert!(out.iter().all(|w| w.abs() <= range));
        assert!(out.iter().any(|w| *w != 0.));
    }

    #[test]
    fn same_seed_same_weights() {
        let draw = |seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut out = vec![0.; 32];
            Initializer::Kaiming.fill(&mut rng, 8, 4, &mut out).unwrap();
            out
        };

        assert_eq!(draw(7), draw(7));
        assert_ne!(draw(7), draw(8));
    }

    #[test]
    fn invalid_ranges_are_errors() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut out = vec![0.; 4];

        let bad_uniform = Initializer::Uniform { low: 1., high: -1. };
        assert!(bad_uniform.fill(&mut rng, 1, 1, &mut out).is_err());

        let bad_normal = Initializer::Normal {
            mean: 0.,
            std_dev: f32::NAN,
        };
        assert!(bad_normal.fill(&mut rng, 1, 1, &mut out).is_err());
    }
}
