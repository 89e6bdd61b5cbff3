use super::{LayerStates, WeightsUpdater};
use crate::layers::{Gradient, Layer};
use crate::network::Network;

#[derive(Debug)]
struct Velocity {
    weights: Vec<f32>,
    biases: Vec<f32>,
}

/// Gradient descent with momentum.
///
/// `v := μv − η/n · ∂J/∂w − η·λ/n · w`, then `w := w + v`.
#[derive(Debug)]
pub struct Momentum {
    learning_rate: f32,
    momentum: f32,
    l2: f32,
    velocities: LayerStates<Velocity>,
}

impl Momentum {
    /// Allocates a zero velocity for every weighted layer of `network`.
    pub fn new(network: &dyn Network, learning_rate: f32, momentum: f32, l2: f32) -> Self {
        Self {
            learning_rate,
            momentum,
            l2,
            velocities: LayerStates::new(network, |w, b| Velocity {
                weights: vec![0.0; w],
                biases: vec![0.0; b],
            }),
        }
    }
}

impl WeightsUpdater for Momentum {
    fn update(&self, index: usize, gradient: &Gradient, samples: usize, layer: &mut Layer) {
        let (Some((weights, biases)), Some(mut velocity)) = (layer.parameters_mut(), self.velocities.lock(index))
        else {
            return;
        };
        let n = samples.max(1) as f32;
        let alpha = self.learning_rate / n;
        let decay = self.learning_rate * self.l2 / n;
        let Velocity { weights: vw, biases: vb } = &mut *velocity;
        for ((w, v), &g) in weights.data_mut().iter_mut().zip(vw.iter_mut()).zip(gradient.weights.data()) {
            *v = self.momentum * *v - alpha * g - decay * *w;
            *w += *v;
        }
        for ((b, v), &g) in biases.data_mut().iter_mut().zip(vb.iter_mut()).zip(gradient.biases.data()) {
            *v = self.momentum * *v - alpha * g;
            *b += *v;
        }
    }
}
