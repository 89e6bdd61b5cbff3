use super::activation::ActivationType;
use crate::error::{NetworkError, Result};
use crate::tensors::{Tensor, TensorView};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Smallest probability fed into a logarithm.
const LOG_EPSILON: f32 = 1e-12;

/// The cost function owned by an output layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum CostFunctionType {
    /// `½ Σ (a − y)²`
    Quadratic = 0,
    /// `−Σ [y ln a + (1 − y) ln(1 − a)]`
    CrossEntropy = 1,
    /// `−Σ y ln a`
    LogLikelihood = 2,
}

impl CostFunctionType {
    /// Whether `(activation, self)` reduces the terminal delta to `a − y`.
    ///
    /// Holds for a softmax output under the log-likelihood and cross-entropy
    /// costs, and for a sigmoid output under cross-entropy.
    pub const fn folds_with(self, activation: ActivationType) -> bool {
        matches!(
            (activation, self),
            (ActivationType::Softmax, Self::LogLikelihood)
                | (ActivationType::Softmax, Self::CrossEntropy)
                | (ActivationType::Sigmoid, Self::CrossEntropy)
        )
    }

    /// Cost of a single sample.
    fn sample_cost(self, yhat: &[f32], y: &[f32]) -> f32 {
        match self {
            Self::Quadratic => {
                0.5 * yhat
                    .iter()
                    .zip(y)
                    .map(|(&a, &t)| (a - t) * (a - t))
                    .sum::<f32>()
            }
            Self::CrossEntropy => -yhat
                .iter()
                .zip(y)
                .map(|(&a, &t)| {
                    let a = a.clamp(LOG_EPSILON, 1.0 - LOG_EPSILON);
                    t * a.ln() + (1.0 - t) * (1.0 - a).ln()
                })
                .sum::<f32>(),
            Self::LogLikelihood => -yhat
                .iter()
                .zip(y)
                .map(|(&a, &t)| t * a.max(LOG_EPSILON).ln())
                .sum::<f32>(),
        }
    }

    /// `∂C/∂a` of a single value.
    fn derivative(self, a: f32, y: f32) -> f32 {
        match self {
            Self::Quadratic => a - y,
            Self::CrossEntropy => {
                let a = a.clamp(LOG_EPSILON, 1.0 - LOG_EPSILON);
                (a - y) / (a * (1.0 - a))
            }
            Self::LogLikelihood => -y / a.max(LOG_EPSILON),
        }
    }

    /// Average cost of a batch of predictions.
    ///
    /// # Errors
    /// Returns [`NetworkError::ShapeMismatch`] if the shapes differ.
    pub fn cost(self, yhat: TensorView<'_>, y: TensorView<'_>) -> Result<f32> {
        check_same_shape("CostFunctionType::cost", yhat, y)?;
        if yhat.entities() == 0 {
            return Ok(0.0);
        }
        let length = yhat.length();
        let total: f32 = yhat
            .data()
            .par_chunks(length.max(1))
            .zip(y.data().par_chunks(length.max(1)))
            .map(|(a, t)| self.sample_cost(a, t))
            .sum();
        Ok(total / yhat.entities() as f32)
    }

    /// Computes the terminal delta `∂C/∂z` from the output activation `a`,
    /// the expected output `y` and the activity `z`.
    ///
    /// # Errors
    /// Returns [`NetworkError::ShapeMismatch`] if the shapes differ.
    pub fn output_delta(
        self,
        a: TensorView<'_>,
        y: TensorView<'_>,
        z: TensorView<'_>,
        activation: ActivationType,
    ) -> Result<Tensor> {
        check_same_shape("CostFunctionType::output_delta", a, y)?;
        check_same_shape("CostFunctionType::output_delta", a, z)?;
        let length = a.length().max(1);
        let mut delta = Tensor::new(a.entities(), a.length());
        if self.folds_with(activation) {
            delta
                .data_mut()
                .par_iter_mut()
                .zip(a.data().par_iter().zip(y.data().par_iter()))
                .for_each(|(d, (&a, &y))| *d = a - y);
            return Ok(delta);
        }
        if activation == ActivationType::Softmax {
            // δ_j = a_j (g_j − Σ_k g_k a_k) with g = ∂C/∂a
            delta
                .data_mut()
                .par_chunks_mut(length)
                .zip(a.data().par_chunks(length))
                .zip(y.data().par_chunks(length))
                .for_each(|((d, a), y)| {
                    for ((d, &a), &y) in d.iter_mut().zip(a).zip(y) {
                        *d = self.derivative(a, y);
                    }
                    let dot: f32 = d.iter().zip(a).map(|(&g, &a)| g * a).sum();
                    for (d, &a) in d.iter_mut().zip(a) {
                        *d = a * (*d - dot);
                    }
                });
            return Ok(delta);
        }
        delta
            .data_mut()
            .par_chunks_mut(length)
            .zip(a.data().par_chunks(length))
            .zip(y.data().par_chunks(length).zip(z.data().par_chunks(length)))
            .try_for_each(|((d, a), (y, z))| {
                for (((d, &a), &y), &z) in d.iter_mut().zip(a).zip(y).zip(z) {
                    *d = self.derivative(a, y) * activation.derivative(z)?;
                }
                Ok::<(), NetworkError>(())
            })?;
        Ok(delta)
    }
}

fn check_same_shape(operation: &'static str, a: TensorView<'_>, b: TensorView<'_>) -> Result<()> {
    if a.entities() != b.entities() || a.length() != b.length() {
        return Err(NetworkError::shape_mismatch(
            operation,
            a.shape_string(),
            b.shape_string(),
        ));
    }
    Ok(())
}

impl fmt::Display for CostFunctionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Quadratic => "quadratic",
            Self::CrossEntropy => "cross_entropy",
            Self::LogLikelihood => "log_likelihood",
        })
    }
}

impl TryFrom<u8> for CostFunctionType {
    type Error = NetworkError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Quadratic),
            1 => Ok(Self::CrossEntropy),
            2 => Ok(Self::LogLikelihood),
            _ => Err(NetworkError::deserialization(format!(
                "unknown cost function tag {value}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn view(data: &[f32], entities: usize, length: usize) -> TensorView<'_> {
        TensorView::reshape(data, entities, length).unwrap()
    }

    #[test]
    fn quadratic_cost_is_averaged_over_samples() {
        let a = [1.0, 2.0, 0.0, 0.0];
        let y = [0.0, 0.0, 0.0, 1.0];
        let cost = CostFunctionType::Quadratic
            .cost(view(&a, 2, 2), view(&y, 2, 2))
            .unwrap();
        // (0.5 * 5 + 0.5 * 1) / 2
        assert_relative_eq!(cost, 1.5);
    }

    #[test]
    fn folded_pairs_produce_a_minus_y() {
        let a = [0.2, 0.8];
        let y = [0.0, 1.0];
        let z = [5.0, -3.0];
        let delta = CostFunctionType::LogLikelihood
            .output_delta(view(&a, 1, 2), view(&y, 1, 2), view(&z, 1, 2), ActivationType::Softmax)
            .unwrap();
        assert_relative_eq!(delta.data()[0], 0.2, epsilon = 1e-6);
        assert_relative_eq!(delta.data()[1], -0.2, epsilon = 1e-6);
    }

    #[test]
    fn sigmoid_cross_entropy_matches_full_chain_rule() {
        let z = [0.3f32, -1.1];
        let a: Vec<f32> = z.iter().map(|&z| ActivationType::Sigmoid.activate(z)).collect();
        let y = [1.0, 0.0];
        let folded = CostFunctionType::CrossEntropy
            .output_delta(view(&a, 1, 2), view(&y, 1, 2), view(&z, 1, 2), ActivationType::Sigmoid)
            .unwrap();
        for i in 0..2 {
            let full = CostFunctionType::CrossEntropy.derivative(a[i], y[i])
                * ActivationType::Sigmoid.derivative(z[i]).unwrap();
            assert_relative_eq!(folded.data()[i], full, epsilon = 1e-5);
        }
    }

    #[test]
    fn quadratic_delta_uses_the_activation_derivative() {
        let z = [0.5f32];
        let a = [ActivationType::Tanh.activate(0.5)];
        let y = [1.0];
        let delta = CostFunctionType::Quadratic
            .output_delta(view(&a, 1, 1), view(&y, 1, 1), view(&z, 1, 1), ActivationType::Tanh)
            .unwrap();
        let expected = (a[0] - 1.0) * (1.0 - a[0] * a[0]);
        assert_relative_eq!(delta.data()[0], expected, epsilon = 1e-6);
    }

    #[test]
    fn mismatched_shapes_are_rejected() {
        let a = [0.0; 4];
        let y = [0.0; 2];
        assert!(CostFunctionType::Quadratic
            .cost(view(&a, 2, 2), view(&y, 1, 2))
            .is_err());
    }
}
