//! # Optimizers
//!
//! Weight-update rules, decoupled from gradient computation. During
//! backpropagation a network hands every weighted layer's [`Gradient`] to a
//! [`WeightsUpdater`], in parallel over the layers. Updaters therefore take
//! `&self`, and any per-weight state lives behind one `Mutex` per weighted
//! layer, which tasks for distinct layers never contend on.
//!
//! ## Rules
//!
//! - [`StochasticGradientDescent`]: `w -= η/n · ∂J/∂w + η·λ/n · w`
//! - [`Momentum`]: velocity accumulation on top of SGD
//! - [`Adadelta`]: running averages of squared gradients and updates
//! - [`Adam`]: bias-corrected first and second moments
//!
//! A [`TrainingAlgorithm`] describes the rule and its hyperparameters and
//! creates the session updater, allocating the accumulators once per
//! training session.

mod adadelta;
mod adam;
mod momentum;
mod sgd;

pub use self::adadelta::Adadelta;
pub use self::adam::Adam;
pub use self::momentum::Momentum;
pub use self::sgd::StochasticGradientDescent;

use crate::error::{NetworkError, Result};
use crate::layers::{Gradient, Layer};
use crate::network::Network;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};

/// Applies a gradient to a layer.
///
/// `index` is the ordinal of the layer among the weighted layers of the
/// network and `samples` the size of the batch the gradient was summed over.
pub trait WeightsUpdater: Sync {
    /// Updates the parameters of `layer` in place.
    fn update(&self, index: usize, gradient: &Gradient, samples: usize, layer: &mut Layer);
}

impl<F> WeightsUpdater for F
where
    F: Fn(usize, &Gradient, usize, &mut Layer) + Sync,
{
    fn update(&self, index: usize, gradient: &Gradient, samples: usize, layer: &mut Layer) {
        self(index, gradient, samples, layer);
    }
}

/// Per-parameter accumulators of every weighted layer.
#[derive(Debug)]
pub(crate) struct LayerStates<T> {
    states: Vec<Mutex<T>>,
}

impl<T> LayerStates<T> {
    /// One state per weighted layer of `network`, built from the weights and
    /// biases sizes.
    pub(crate) fn new(network: &dyn Network, init: impl Fn(usize, usize) -> T) -> Self {
        let states = network
            .layers()
            .into_iter()
            .filter_map(|layer| Some(init(layer.weights()?.size(), layer.biases()?.size())))
            .map(Mutex::new)
            .collect();
        Self { states }
    }

    /// Locks the state of weighted layer `index`, or returns `None` when the
    /// updater was built for a network with fewer weighted layers.
    ///
    /// A poisoned lock only means another update panicked; its buffers are
    /// still well formed.
    pub(crate) fn lock(&self, index: usize) -> Option<MutexGuard<'_, T>> {
        let Some(cell) = self.states.get(index) else {
            log::warn!(
                "no optimizer state for weighted layer #{index} ({} tracked), update dropped",
                self.states.len()
            );
            return None;
        };
        Some(cell.lock().unwrap_or_else(std::sync::PoisonError::into_inner))
    }

    pub(crate) fn len(&self) -> usize {
        self.states.len()
    }
}

/// A weight-update rule and its hyperparameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TrainingAlgorithm {
    /// Plain mini-batch gradient descent with L2 regularization.
    StochasticGradientDescent {
        /// `η`
        learning_rate: f32,
        /// `λ`
        #[serde(default)]
        l2: f32,
    },
    /// Gradient descent with a velocity term.
    Momentum {
        /// `η`
        learning_rate: f32,
        /// `μ`
        momentum: f32,
        /// `λ`
        #[serde(default)]
        l2: f32,
    },
    /// Adadelta, no learning rate.
    Adadelta {
        /// `ρ`, decay of the running averages.
        rho: f32,
        /// `ε`, added inside the square roots.
        epsilon: f32,
        /// `λ`
        #[serde(default)]
        l2: f32,
    },
    /// Adam.
    Adam {
        /// `η`
        learning_rate: f32,
        /// `β₁`
        beta1: f32,
        /// `β₂`
        beta2: f32,
        /// `ε`
        epsilon: f32,
    },
}

impl TrainingAlgorithm {
    /// SGD with learning rate `η` and L2 factor `λ`.
    #[must_use]
    pub const fn sgd(learning_rate: f32, l2: f32) -> Self {
        Self::StochasticGradientDescent { learning_rate, l2 }
    }

    /// Momentum SGD without regularization.
    #[must_use]
    pub const fn momentum(learning_rate: f32, momentum: f32) -> Self {
        Self::Momentum {
            learning_rate,
            momentum,
            l2: 0.0,
        }
    }

    /// Adadelta with `ρ = 0.95` and `ε = 1e-8`.
    #[must_use]
    pub const fn adadelta() -> Self {
        Self::Adadelta {
            rho: 0.95,
            epsilon: 1e-8,
            l2: 0.0,
        }
    }

    /// Adam with the usual `η = 0.001, β₁ = 0.9, β₂ = 0.999, ε = 1e-8`.
    #[must_use]
    pub const fn adam() -> Self {
        Self::Adam {
            learning_rate: 0.001,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
        }
    }

    /// Checks that every hyperparameter is in its domain.
    ///
    /// # Errors
    /// Returns [`NetworkError::InvalidArgument`] naming the first bad value.
    pub fn validate(&self) -> Result<()> {
        fn positive(name: &str, value: f32) -> Result<()> {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(NetworkError::InvalidArgument(format!("{name} must be positive, got {value}")))
            }
        }
        fn non_negative(name: &str, value: f32) -> Result<()> {
            if value.is_finite() && value >= 0.0 {
                Ok(())
            } else {
                Err(NetworkError::InvalidArgument(format!("{name} must not be negative, got {value}")))
            }
        }
        fn unit(name: &str, value: f32) -> Result<()> {
            if (0.0..1.0).contains(&value) {
                Ok(())
            } else {
                Err(NetworkError::InvalidArgument(format!("{name} must be in [0, 1), got {value}")))
            }
        }
        match *self {
            Self::StochasticGradientDescent { learning_rate, l2 } => {
                positive("learning rate", learning_rate)?;
                non_negative("l2", l2)
            }
            Self::Momentum {
                learning_rate,
                momentum,
                l2,
            } => {
                positive("learning rate", learning_rate)?;
                unit("momentum", momentum)?;
                non_negative("l2", l2)
            }
            Self::Adadelta { rho, epsilon, l2 } => {
                unit("rho", rho)?;
                positive("epsilon", epsilon)?;
                non_negative("l2", l2)
            }
            Self::Adam {
                learning_rate,
                beta1,
                beta2,
                epsilon,
            } => {
                positive("learning rate", learning_rate)?;
                unit("beta1", beta1)?;
                unit("beta2", beta2)?;
                positive("epsilon", epsilon)
            }
        }
    }

    /// Creates the updater of a training session over `network`.
    ///
    /// # Errors
    /// Returns [`NetworkError::InvalidArgument`] if the hyperparameters are invalid.
    pub fn create_updater(&self, network: &dyn Network) -> Result<Box<dyn WeightsUpdater>> {
        self.validate()?;
        Ok(match *self {
            Self::StochasticGradientDescent { learning_rate, l2 } => {
                Box::new(StochasticGradientDescent::new(learning_rate, l2))
            }
            Self::Momentum {
                learning_rate,
                momentum,
                l2,
            } => Box::new(Momentum::new(network, learning_rate, momentum, l2)),
            Self::Adadelta { rho, epsilon, l2 } => Box::new(Adadelta::new(network, rho, epsilon, l2)),
            Self::Adam {
                learning_rate,
                beta1,
                beta2,
                epsilon,
            } => Box::new(Adam::new(network, learning_rate, beta1, beta2, epsilon)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::CpuBackend;
    use crate::functions::{ActivationType, CostFunctionType};
    use crate::layers::OutputLayer;
    use crate::network::SequentialNetwork;
    use crate::tensors::{Tensor, TensorInfo};
    use std::sync::Arc;

    fn single_layer() -> Layer {
        Layer::Output(
            OutputLayer::from_parts(
                TensorInfo::linear(2),
                Tensor::from_vec(2, 1, vec![0.5, -0.5]).unwrap(),
                Tensor::from_vec(1, 1, vec![0.1]).unwrap(),
                ActivationType::Sigmoid,
                CostFunctionType::CrossEntropy,
            )
            .unwrap(),
        )
    }

    #[test]
    fn hyperparameters_are_validated() {
        assert!(TrainingAlgorithm::sgd(0.1, 0.0).validate().is_ok());
        assert!(TrainingAlgorithm::sgd(0.0, 0.0).validate().is_err());
        assert!(TrainingAlgorithm::sgd(0.1, -1.0).validate().is_err());
        assert!(TrainingAlgorithm::momentum(0.1, 1.0).validate().is_err());
        assert!(TrainingAlgorithm::adadelta().validate().is_ok());
        assert!(TrainingAlgorithm::adam().validate().is_ok());
        let bad = TrainingAlgorithm::Adadelta {
            rho: 1.5,
            epsilon: 1e-8,
            l2: 0.0,
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn algorithms_deserialize_from_tagged_json() {
        let sgd: TrainingAlgorithm =
            serde_json::from_str(r#"{"type": "stochastic_gradient_descent", "learning_rate": 0.5}"#).unwrap();
        assert_eq!(sgd, TrainingAlgorithm::sgd(0.5, 0.0));
        let adadelta: TrainingAlgorithm =
            serde_json::from_str(r#"{"type": "adadelta", "rho": 0.9, "epsilon": 1e-6}"#).unwrap();
        assert!(matches!(adadelta, TrainingAlgorithm::Adadelta { l2, .. } if l2 == 0.0));
    }

    #[test]
    fn updates_for_untracked_layers_are_dropped() {
        let network = SequentialNetwork::from_layers(vec![single_layer()], Arc::new(CpuBackend::new())).unwrap();
        let states = LayerStates::new(&network, |w, b| w + b);
        assert_eq!(states.len(), 1);
        assert_eq!(states.lock(0).map(|s| *s), Some(3));
        assert!(states.lock(1).is_none());

        let gradient = Gradient {
            weights: Tensor::from_vec(2, 1, vec![1.0, 1.0]).unwrap(),
            biases: Tensor::from_vec(1, 1, vec![1.0]).unwrap(),
        };
        let mut layer = single_layer();
        for algorithm in [TrainingAlgorithm::momentum(0.1, 0.9), TrainingAlgorithm::adadelta(), TrainingAlgorithm::adam()]
        {
            algorithm.create_updater(&network).unwrap().update(1, &gradient, 1, &mut layer);
            assert!(layer.approx_eq(&single_layer()));
        }
    }
}
