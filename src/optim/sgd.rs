use super::WeightsUpdater;
use crate::layers::{Gradient, Layer};

/// Mini-batch stochastic gradient descent with L2 weight decay.
///
/// $$ w := w - \frac{\eta}{n} \frac{\partial J}{\partial w} - \frac{\eta \lambda}{n} w $$
///
/// Biases are not regularized.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StochasticGradientDescent {
    learning_rate: f32,
    l2: f32,
}

impl StochasticGradientDescent {
    /// Creates the rule with learning rate `η` and L2 factor `λ`.
    #[must_use]
    pub const fn new(learning_rate: f32, l2: f32) -> Self {
        Self { learning_rate, l2 }
    }
}

impl WeightsUpdater for StochasticGradientDescent {
    fn update(&self, _index: usize, gradient: &Gradient, samples: usize, layer: &mut Layer) {
        let Some((weights, biases)) = layer.parameters_mut() else {
            return;
        };
        let n = samples.max(1) as f32;
        let alpha = self.learning_rate / n;
        let decay = self.learning_rate * self.l2 / n;
        for (w, &g) in weights.data_mut().iter_mut().zip(gradient.weights.data()) {
            *w -= alpha * g + decay * *w;
        }
        for (b, &g) in biases.data_mut().iter_mut().zip(gradient.biases.data()) {
            *b -= alpha * g;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::ActivationType;
    use crate::layers::FullyConnectedLayer;
    use crate::tensors::{Tensor, TensorInfo};
    use approx::assert_relative_eq;

    #[test]
    fn applies_the_regularized_step() {
        let mut layer = Layer::FullyConnected(
            FullyConnectedLayer::from_parts(
                TensorInfo::linear(1),
                Tensor::from_vec(1, 2, vec![1.0, -2.0]).unwrap(),
                Tensor::from_vec(1, 2, vec![0.5, 0.5]).unwrap(),
                ActivationType::Sigmoid,
            )
            .unwrap(),
        );
        let gradient = Gradient {
            weights: Tensor::from_vec(1, 2, vec![4.0, 2.0]).unwrap(),
            biases: Tensor::from_vec(1, 2, vec![2.0, -2.0]).unwrap(),
        };
        StochasticGradientDescent::new(0.5, 0.1).update(0, &gradient, 2, &mut layer);
        let w = layer.weights().unwrap().data();
        // 1 - 0.25 * 4 - 0.025 * 1
        assert_relative_eq!(w[0], -0.025, epsilon = 1e-6);
        // -2 - 0.25 * 2 + 0.025 * 2
        assert_relative_eq!(w[1], -2.45, epsilon = 1e-6);
        assert_eq!(layer.biases().unwrap().data(), &[0.0, 1.0]);
    }
}
