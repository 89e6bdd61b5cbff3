use super::{LayerStates, WeightsUpdater};
use crate::layers::{Gradient, Layer};
use crate::network::Network;

/// Running averages of one parameter buffer.
#[derive(Debug)]
struct Accumulators {
    squared_gradients: Vec<f32>,
    squared_updates: Vec<f32>,
}

impl Accumulators {
    fn zeroed(size: usize) -> Self {
        Self {
            squared_gradients: vec![0.0; size],
            squared_updates: vec![0.0; size],
        }
    }

    fn step(&mut self, values: &mut [f32], gradients: &[f32], n: f32, rho: f32, epsilon: f32, l2: f32) {
        let iter = values
            .iter_mut()
            .zip(gradients)
            .zip(self.squared_gradients.iter_mut().zip(self.squared_updates.iter_mut()));
        for ((x, &dj), (eg, ex)) in iter {
            let g = dj / n + l2 * *x / n;
            *eg = rho * *eg + (1.0 - rho) * g * g;
            let delta = -((*ex + epsilon).sqrt() / (*eg + epsilon).sqrt()) * g;
            *ex = rho * *ex + (1.0 - rho) * delta * delta;
            *x += delta;
        }
    }
}

#[derive(Debug)]
struct LayerAccumulators {
    weights: Accumulators,
    biases: Accumulators,
}

/// Adadelta: per-weight step sizes from running averages of the squared
/// gradients `E[g²]` and of the squared updates `E[Δx²]`.
///
/// ```text
/// E[g²]  := ρ E[g²] + (1 − ρ) g²
/// Δx     := −(√(E[Δx²] + ε) / √(E[g²] + ε)) g
/// E[Δx²] := ρ E[Δx²] + (1 − ρ) Δx²
/// x      := x + Δx
/// ```
///
/// with `g = ∂J/∂w / n`, plus `λ w / n` on the weights when L2 is enabled.
#[derive(Debug)]
pub struct Adadelta {
    rho: f32,
    epsilon: f32,
    l2: f32,
    accumulators: LayerStates<LayerAccumulators>,
}

impl Adadelta {
    /// Allocates the accumulators for every weighted layer of `network`.
    pub fn new(network: &dyn Network, rho: f32, epsilon: f32, l2: f32) -> Self {
        let accumulators = LayerStates::new(network, |w, b| LayerAccumulators {
            weights: Accumulators::zeroed(w),
            biases: Accumulators::zeroed(b),
        });
        log::debug!("allocated Adadelta accumulators for {} layers", accumulators.len());
        Self {
            rho,
            epsilon,
            l2,
            accumulators,
        }
    }
}

impl WeightsUpdater for Adadelta {
    fn update(&self, index: usize, gradient: &Gradient, samples: usize, layer: &mut Layer) {
        let (Some((weights, biases)), Some(mut state)) = (layer.parameters_mut(), self.accumulators.lock(index))
        else {
            return;
        };
        let n = samples.max(1) as f32;
        state.weights.step(
            weights.data_mut(),
            gradient.weights.data(),
            n,
            self.rho,
            self.epsilon,
            self.l2,
        );
        state
            .biases
            .step(biases.data_mut(), gradient.biases.data(), n, self.rho, self.epsilon, 0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn first_step_follows_the_running_averages() {
        let mut acc = Accumulators::zeroed(1);
        let mut x = [1.0f32];
        acc.step(&mut x, &[2.0], 1.0, 0.9, 1e-6, 0.0);
        // E[g²] = 0.4, Δx = −(√1e-6 / √(0.4 + 1e-6)) · 2
        let expected = -((1e-6f32).sqrt() / (0.4f32 + 1e-6).sqrt()) * 2.0;
        assert_relative_eq!(x[0], 1.0 + expected, epsilon = 1e-7);
        assert_relative_eq!(acc.squared_gradients[0], 0.4, epsilon = 1e-6);
        assert_relative_eq!(acc.squared_updates[0], 0.1 * expected * expected, epsilon = 1e-9);
    }

    #[test]
    fn steps_grow_as_updates_accumulate() {
        let mut acc = Accumulators::zeroed(1);
        let mut x = [0.0f32];
        let mut previous = 0.0;
        let mut steps = Vec::new();
        for _ in 0..5 {
            acc.step(&mut x, &[1.0], 1.0, 0.95, 1e-6, 0.0);
            steps.push(previous - x[0]);
            previous = x[0];
        }
        assert!(steps[4] > steps[0]);
    }
}
