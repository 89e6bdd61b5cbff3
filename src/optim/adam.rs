use super::{LayerStates, WeightsUpdater};
use crate::layers::{Gradient, Layer};
use crate::network::Network;

#[derive(Debug)]
struct Moments {
    step: i32,
    weights: (Vec<f32>, Vec<f32>),
    biases: (Vec<f32>, Vec<f32>),
}

/// Adam with bias-corrected moment estimates.
///
/// The gradient is averaged over the batch before it enters the moments.
#[derive(Debug)]
pub struct Adam {
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    moments: LayerStates<Moments>,
}

impl Adam {
    /// Allocates zero moments for every weighted layer of `network`.
    pub fn new(network: &dyn Network, learning_rate: f32, beta1: f32, beta2: f32, epsilon: f32) -> Self {
        Self {
            learning_rate,
            beta1,
            beta2,
            epsilon,
            moments: LayerStates::new(network, |w, b| Moments {
                step: 0,
                weights: (vec![0.0; w], vec![0.0; w]),
                biases: (vec![0.0; b], vec![0.0; b]),
            }),
        }
    }

    fn step(&self, values: &mut [f32], gradients: &[f32], m: &mut [f32], v: &mut [f32], n: f32, t: i32) {
        let correction1 = 1.0 - self.beta1.powi(t);
        let correction2 = 1.0 - self.beta2.powi(t);
        for ((x, &dj), (m, v)) in values.iter_mut().zip(gradients).zip(m.iter_mut().zip(v.iter_mut())) {
            let g = dj / n;
            *m = self.beta1 * *m + (1.0 - self.beta1) * g;
            *v = self.beta2 * *v + (1.0 - self.beta2) * g * g;
            let m_hat = *m / correction1;
            let v_hat = *v / correction2;
            *x -= self.learning_rate * m_hat / (v_hat.sqrt() + self.epsilon);
        }
    }
}

impl WeightsUpdater for Adam {
    fn update(&self, index: usize, gradient: &Gradient, samples: usize, layer: &mut Layer) {
        let (Some((weights, biases)), Some(mut state)) = (layer.parameters_mut(), self.moments.lock(index)) else {
            return;
        };
        let n = samples.max(1) as f32;
        state.step = state.step.saturating_add(1);
        let t = state.step;
        let Moments {
            weights: (wm, wv),
            biases: (bm, bv),
            ..
        } = &mut *state;
        self.step(weights.data_mut(), gradient.weights.data(), wm, wv, n, t);
        self.step(biases.data_mut(), gradient.biases.data(), bm, bv, n, t);
    }
}
