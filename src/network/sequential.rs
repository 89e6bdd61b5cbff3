use super::{Network, NetworkType, check_batch, check_dropout, dropout_mask, submit_gradients};
use crate::backend::Backend;
use crate::error::{NetworkError, Result};
use crate::layers::{Gradient, Layer, LayerKind, LayerSpec, OutputLayer};
use crate::optim::WeightsUpdater;
use crate::tensors::{SamplesBatch, Tensor, TensorInfo, TensorView};
use rand::rngs::StdRng;
use std::sync::Arc;

/// A linear stack of layers ending with an output layer.
#[derive(Debug, Clone)]
pub struct SequentialNetwork {
    layers: Vec<Layer>,
    backend: Arc<dyn Backend>,
}

impl SequentialNetwork {
    /// Builds every layer of `specs` in order, starting from `input`.
    ///
    /// # Errors
    /// Returns the layer construction error, or
    /// [`NetworkError::InvalidTopology`] if the last spec is not the only
    /// output layer.
    pub fn new(input: TensorInfo, specs: &[LayerSpec], rng: &mut StdRng, backend: Arc<dyn Backend>) -> Result<Self> {
        let mut layers = Vec::with_capacity(specs.len());
        let mut info = input;
        for spec in specs {
            let layer = spec.build(info, rng)?;
            info = layer.output_info();
            layers.push(layer);
        }
        Self::from_layers(layers, backend)
    }

    /// Wraps already built layers.
    ///
    /// # Errors
    /// Returns [`NetworkError::InvalidTopology`] when the layer sizes don't
    /// chain, or when the network doesn't end with its only output layer.
    pub fn from_layers(layers: Vec<Layer>, backend: Arc<dyn Backend>) -> Result<Self> {
        let Some(last) = layers.last() else {
            return Err(NetworkError::InvalidTopology("a network needs at least one layer".into()));
        };
        if last.kind() != LayerKind::Output {
            return Err(NetworkError::InvalidTopology("the last layer must be an output layer".into()));
        }
        if let Some(position) = layers[..layers.len() - 1]
            .iter()
            .position(|l| l.kind() == LayerKind::Output)
        {
            return Err(NetworkError::InvalidTopology(format!(
                "layer {position} is an output layer but is not the last one"
            )));
        }
        for (i, pair) in layers.windows(2).enumerate() {
            let (out, next) = (pair[0].output_info(), pair[1].input_info());
            if out.size() != next.size() {
                return Err(NetworkError::InvalidTopology(format!(
                    "layer {i} outputs {out} but layer {} expects {next}",
                    i + 1
                )));
            }
        }
        log::debug!(
            "built sequential network: {} layers, {} -> {}",
            layers.len(),
            layers[0].input_info(),
            last.output_info()
        );
        Ok(Self { layers, backend })
    }

    /// Layer `index`, if present.
    #[must_use]
    pub fn layer(&self, index: usize) -> Option<&Layer> {
        self.layers.get(index)
    }

    /// Number of layers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Always `false`: a network has at least its output layer.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Computes the terminal delta for `batch` without updating anything.
    ///
    /// This is the `∂C/∂z` of the output layer after a plain forward pass.
    ///
    /// # Errors
    /// Returns a shape error when the batch doesn't match the network.
    pub fn output_delta(&self, batch: &SamplesBatch) -> Result<Tensor> {
        check_batch(self, batch)?;
        let mut input: Option<Tensor> = None;
        let mut activity = None;
        for layer in &self.layers {
            let x = input.as_ref().map_or(batch.x.view(), Tensor::view);
            let (z, a) = layer.forward(self.backend.as_ref(), x)?;
            activity = Some(z);
            input = Some(a);
        }
        match (input, activity) {
            (Some(a), Some(z)) => self.output_layer().output_delta(a.view(), batch.y.view(), z.view()),
            _ => Err(NetworkError::InvalidTopology("empty network".into())),
        }
    }
}

impl Network for SequentialNetwork {
    fn network_type(&self) -> NetworkType {
        NetworkType::Sequential
    }

    fn input_info(&self) -> TensorInfo {
        self.layers.first().map_or(TensorInfo::linear(0), Layer::input_info)
    }

    fn output_info(&self) -> TensorInfo {
        self.layers.last().map_or(TensorInfo::linear(0), Layer::output_info)
    }

    fn layers(&self) -> Vec<&Layer> {
        self.layers.iter().collect()
    }

    fn output_layer(&self) -> &OutputLayer {
        // from_layers guarantees a terminal output layer
        match self.layers.last().and_then(Layer::as_output) {
            Some(output) => output,
            None => unreachable!("sequential networks always end with an output layer"),
        }
    }

    fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    fn forward(&self, x: TensorView<'_>) -> Result<Tensor> {
        let mut current: Option<Tensor> = None;
        for layer in &self.layers {
            let input = current.as_ref().map_or(x, Tensor::view);
            current = Some(layer.infer(self.backend.as_ref(), input)?);
        }
        current.ok_or_else(|| NetworkError::InvalidTopology("empty network".into()))
    }

    fn backpropagate(
        &mut self,
        batch: &SamplesBatch,
        dropout: f32,
        rng: &mut StdRng,
        updater: &dyn WeightsUpdater,
    ) -> Result<()> {
        check_dropout(dropout)?;
        check_batch(&*self, batch)?;
        if batch.is_empty() {
            return Ok(());
        }
        let backend = self.backend.as_ref();
        let count = self.layers.len();

        let mut activities = Vec::with_capacity(count);
        let mut activations: Vec<Tensor> = Vec::with_capacity(count);
        let mut masks = Vec::with_capacity(count);
        for (i, layer) in self.layers.iter().enumerate() {
            let input = if i == 0 { batch.x.view() } else { activations[i - 1].view() };
            let (z, mut a) = layer.forward(backend, input)?;
            let mask = if dropout > 0.0 && layer.kind() == LayerKind::FullyConnected {
                let mask = dropout_mask(rng, a.entities(), a.length(), dropout);
                backend.hadamard_product_in_place(&mut a, mask.view())?;
                Some(mask)
            } else {
                None
            };
            activities.push(z);
            activations.push(a);
            masks.push(mask);
        }

        let last = count - 1;
        let mut delta =
            self.output_layer()
                .output_delta(activations[last].view(), batch.y.view(), activities[last].view())?;
        let mut gradients: Vec<Option<Gradient>> = (0..count).map(|_| None).collect();
        for i in (0..count).rev() {
            let input = if i == 0 { batch.x.view() } else { activations[i - 1].view() };
            let back = self.layers[i].backpropagate(backend, input, delta.view(), i > 0)?;
            gradients[i] = back.gradient;
            if i == 0 {
                break;
            }
            let mut previous = back
                .input_gradient
                .ok_or_else(|| NetworkError::Computation(format!("layer {i} produced no input gradient")))?;
            if let Some(mask) = &masks[i - 1] {
                backend.hadamard_product_in_place(&mut previous, mask.view())?;
            }
            backend.activation_prime_in_place(&mut previous, activities[i - 1].view(), self.layers[i - 1].activation())?;
            delta = previous;
        }
        drop((activities, activations, masks));

        log::trace!("submitting gradients of {} layers", count);
        submit_gradients(
            self.backend.as_ref(),
            self.layers.iter_mut(),
            gradients,
            batch.len(),
            updater,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::CpuBackend;
    use crate::functions::{ActivationType, CostFunctionType};
    use rand::SeedableRng;

    fn backend() -> Arc<dyn Backend> {
        Arc::new(CpuBackend::new())
    }

    #[test]
    fn output_layer_must_be_last_and_unique() {
        let mut rng = StdRng::seed_from_u64(1);
        let missing = [LayerSpec::fully_connected(3, ActivationType::Sigmoid)];
        assert!(matches!(
            SequentialNetwork::new(TensorInfo::linear(2), &missing, &mut rng, backend()),
            Err(NetworkError::InvalidTopology(_))
        ));
        let doubled = [
            LayerSpec::output(3, ActivationType::Sigmoid, CostFunctionType::Quadratic),
            LayerSpec::output(3, ActivationType::Sigmoid, CostFunctionType::Quadratic),
        ];
        assert!(SequentialNetwork::new(TensorInfo::linear(2), &doubled, &mut rng, backend()).is_err());
    }

    #[test]
    fn mismatched_layers_are_rejected() {
        let mut rng = StdRng::seed_from_u64(1);
        let a = LayerSpec::fully_connected(3, ActivationType::Sigmoid)
            .build(TensorInfo::linear(2), &mut rng)
            .unwrap();
        let b = LayerSpec::softmax(2).build(TensorInfo::linear(4), &mut rng).unwrap();
        assert!(matches!(
            SequentialNetwork::from_layers(vec![a, b], backend()),
            Err(NetworkError::InvalidTopology(_))
        ));
    }

    #[test]
    fn forward_matches_the_layer_chain() {
        let mut rng = StdRng::seed_from_u64(5);
        let specs = [
            LayerSpec::fully_connected(4, ActivationType::Tanh),
            LayerSpec::output(2, ActivationType::Sigmoid, CostFunctionType::CrossEntropy),
        ];
        let network = SequentialNetwork::new(TensorInfo::linear(3), &specs, &mut rng, backend()).unwrap();
        let x = Tensor::from_vec(2, 3, vec![0.1, 0.2, 0.3, -0.4, 0.5, -0.6]).unwrap();
        let be = CpuBackend::new();
        let (_, a) = network.layer(0).unwrap().forward(&be, x.view()).unwrap();
        let (_, expected) = network.layer(1).unwrap().forward(&be, a.view()).unwrap();
        assert!(network.forward(x.view()).unwrap().approx_eq(&expected));
        assert_eq!(network.parameters_count(), 3 * 4 + 4 + 4 * 2 + 2);
    }

    #[test]
    fn training_reduces_the_cost() {
        let mut rng = StdRng::seed_from_u64(11);
        let specs = [
            LayerSpec::fully_connected(8, ActivationType::Tanh),
            LayerSpec::output(1, ActivationType::Sigmoid, CostFunctionType::CrossEntropy),
        ];
        let mut network = SequentialNetwork::new(TensorInfo::linear(2), &specs, &mut rng, backend()).unwrap();
        let x = Tensor::from_rows(&[[0.0_f32, 0.0], [0.0, 1.0], [1.0, 0.0], [1.0, 1.0]]).unwrap();
        let y = Tensor::from_rows(&[[0.0_f32], [1.0], [1.0], [0.0]]).unwrap();
        let before = network.evaluate(x.view(), y.view()).unwrap();
        let batch = SamplesBatch::new(x.clone(), y.clone()).unwrap();
        let sgd = crate::optim::StochasticGradientDescent::new(0.5, 0.0);
        for _ in 0..500 {
            network.backpropagate(&batch, 0.0, &mut rng, &sgd).unwrap();
        }
        let after = network.evaluate(x.view(), y.view()).unwrap();
        assert!(after.cost < before.cost);
    }

    #[test]
    fn failed_steps_do_not_touch_the_weights() {
        let mut rng = StdRng::seed_from_u64(2);
        let specs = [LayerSpec::output(1, ActivationType::Sigmoid, CostFunctionType::Quadratic)];
        let mut network = SequentialNetwork::new(TensorInfo::linear(2), &specs, &mut rng, backend()).unwrap();
        let snapshot = network.clone();
        let bad = SamplesBatch::new(Tensor::new(1, 3), Tensor::new(1, 1)).unwrap();
        let sgd = crate::optim::StochasticGradientDescent::new(0.5, 0.0);
        assert!(network.backpropagate(&bad, 0.0, &mut rng, &sgd).is_err());
        assert!(network.backpropagate(&bad, 1.5, &mut rng, &sgd).is_err());
        assert!(network.approx_eq(&snapshot));
    }
}
