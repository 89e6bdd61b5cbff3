use crate::error::{NetworkError, Result};
use crate::tensors::Tensor;
use rand::Rng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

/// How the weights of a new layer are drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightsInitialization {
    /// `U(−√(6/(in+out)), √(6/(in+out)))`
    #[default]
    GlorotUniform,
    /// `N(0, √(2/(in+out)))`
    GlorotNormal,
    /// `U(−√(6/in), √(6/in))`
    HeUniform,
    /// `N(0, √(2/in))`
    HeNormal,
    /// `U(−√(3/in), √(3/in))`
    LeCunUniform,
}

/// How the biases of a new layer are drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BiasInitialization {
    /// All zeros.
    #[default]
    Zero,
    /// `N(0, 1)`
    Gaussian,
}

enum Sampler {
    Uniform(f32),
    Normal(Normal<f32>),
}

impl Sampler {
    fn normal(std_dev: f32) -> Result<Self> {
        Normal::new(0.0, std_dev)
            .map(Self::Normal)
            .map_err(|e| NetworkError::InvalidArgument(format!("invalid normal distribution: {e}")))
    }

    fn sample(&self, rng: &mut StdRng) -> f32 {
        match self {
            Self::Uniform(limit) => rng.random_range(-limit..=*limit),
            Self::Normal(normal) => normal.sample(rng),
        }
    }
}

impl WeightsInitialization {
    fn sampler(self, fan_in: usize, fan_out: usize) -> Result<Sampler> {
        if fan_in == 0 || fan_out == 0 {
            return Err(NetworkError::InvalidArgument(format!(
                "cannot initialize weights with fan-in {fan_in} and fan-out {fan_out}"
            )));
        }
        let (fan_in, fan_out) = (fan_in as f32, fan_out as f32);
        match self {
            Self::GlorotUniform => Ok(Sampler::Uniform((6.0 / (fan_in + fan_out)).sqrt())),
            Self::GlorotNormal => Sampler::normal((2.0 / (fan_in + fan_out)).sqrt()),
            Self::HeUniform => Ok(Sampler::Uniform((6.0 / fan_in).sqrt())),
            Self::HeNormal => Sampler::normal((2.0 / fan_in).sqrt()),
            Self::LeCunUniform => Ok(Sampler::Uniform((3.0 / fan_in).sqrt())),
        }
    }

    /// Draws an `entities × length` weights tensor.
    pub(crate) fn weights(
        self,
        entities: usize,
        length: usize,
        fan_in: usize,
        fan_out: usize,
        rng: &mut StdRng,
    ) -> Result<Tensor> {
        let sampler = self.sampler(fan_in, fan_out)?;
        let mut weights = Tensor::new(entities, length);
        weights
            .data_mut()
            .iter_mut()
            .for_each(|w| *w = sampler.sample(rng));
        Ok(weights)
    }
}

impl BiasInitialization {
    /// Draws a `1 × length` bias row.
    pub(crate) fn biases(self, length: usize, rng: &mut StdRng) -> Result<Tensor> {
        let mut biases = Tensor::new(1, length);
        if self == Self::Gaussian {
            let sampler = Sampler::normal(1.0)?;
            biases
                .data_mut()
                .iter_mut()
                .for_each(|b| *b = sampler.sample(rng));
        }
        Ok(biases)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn uniform_modes_stay_within_their_limit() {
        let mut rng = StdRng::seed_from_u64(7);
        let w = WeightsInitialization::GlorotUniform
            .weights(10, 20, 10, 20, &mut rng)
            .unwrap();
        let limit = (6.0f32 / 30.0).sqrt();
        assert!(w.data().iter().all(|v| v.abs() <= limit));
        assert!(w.data().iter().any(|&v| v != 0.0));
    }

    #[test]
    fn same_seed_same_weights() {
        let draw = |seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            WeightsInitialization::HeNormal
                .weights(4, 4, 4, 4, &mut rng)
                .unwrap()
        };
        assert_eq!(draw(3), draw(3));
        assert_ne!(draw(3), draw(4));
    }

    #[test]
    fn zero_biases_by_default() {
        let mut rng = StdRng::seed_from_u64(0);
        let b = BiasInitialization::default().biases(5, &mut rng).unwrap();
        assert!(b.data().iter().all(|&v| v == 0.0));
        let g = BiasInitialization::Gaussian.biases(5, &mut rng).unwrap();
        assert!(g.data().iter().any(|&v| v != 0.0));
    }

    #[test]
    fn empty_fans_are_rejected() {
        let mut rng = StdRng::seed_from_u64(0);
        assert!(WeightsInitialization::LeCunUniform
            .weights(0, 3, 0, 3, &mut rng)
            .is_err());
    }
}
