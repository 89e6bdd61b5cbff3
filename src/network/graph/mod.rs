//! Computation graph networks.
//!
//! Both passes are driven by a worklist: a node fires once every tensor it
//! depends on is in the [`TensorMap`] (parents going forward, children going
//! backward). Inference drops each tensor as soon as its last consumer fired.

mod builder;
mod node;
mod tensor_map;

pub use self::builder::ComputationGraphBuilder;
pub use self::node::{Node, NodeId, NodeKind, NodeTag};
pub(crate) use self::tensor_map::TensorMap;

use super::{Network, NetworkType, check_batch, check_dropout, dropout_mask, submit_gradients};
use crate::backend::Backend;
use crate::error::{NetworkError, Result};
use crate::layers::{Layer, LayerKind, OutputLayer};
use crate::ops::cpu::SumMode;
use crate::optim::WeightsUpdater;
use crate::tensors::{SamplesBatch, Tensor, TensorInfo, TensorView};
use rand::rngs::StdRng;
use std::collections::VecDeque;
use std::sync::Arc;

/// A directed acyclic graph of layers, sums and depth concatenations.
///
/// Nodes are stored in topological order, the input node first. Exactly one
/// node, the terminal one, holds the output layer.
#[derive(Debug, Clone)]
pub struct ComputationGraphNetwork {
    nodes: Vec<Node>,
    output: NodeId,
    backend: Arc<dyn Backend>,
}

/// Tensors cached by a training forward pass.
struct ForwardCache {
    activations: TensorMap,
    activities: TensorMap,
    masks: TensorMap,
}

impl ComputationGraphNetwork {
    pub(super) fn from_nodes(nodes: Vec<Node>, output: NodeId, backend: Arc<dyn Backend>) -> Self {
        Self { nodes, output, backend }
    }

    /// Every node, in topological order.
    #[must_use]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// The terminal node.
    #[must_use]
    pub const fn output_node(&self) -> NodeId {
        self.output
    }

    fn view<'a>(&self, id: NodeId, x: TensorView<'a>, map: &'a TensorMap) -> Result<TensorView<'a>> {
        if id.0 == 0 { Ok(x) } else { map.get(id).map(Tensor::view) }
    }

    /// Computes the `(z, a)` of a non-input node. `z` is `None` for merges
    /// and, outside training, for every node.
    fn fire(
        &self,
        node: &Node,
        x: TensorView<'_>,
        activations: &TensorMap,
        training: bool,
    ) -> Result<(Option<Tensor>, Tensor)> {
        let backend = self.backend.as_ref();
        match node.kind() {
            NodeKind::Input => Err(NetworkError::Computation("the input node cannot be fired".into())),
            NodeKind::Processing(layer) => {
                let input = self.view(node.parents()[0], x, activations)?;
                if !training {
                    return Ok((None, layer.infer(backend, input)?));
                }
                let (z, a) = layer.forward(backend, input)?;
                Ok((Some(z), a))
            }
            NodeKind::Sum => {
                let (first, rest) = node
                    .parents()
                    .split_first()
                    .ok_or_else(|| NetworkError::InvalidTopology("sum node without parents".into()))?;
                let mut total = self.view(*first, x, activations)?.to_tensor();
                for &parent in rest {
                    backend.sum_in_place(&mut total, self.view(parent, x, activations)?, SumMode::Elementwise)?;
                }
                Ok((None, total))
            }
            NodeKind::DepthConcatenation => {
                let inputs = node
                    .parents()
                    .iter()
                    .map(|&p| Ok((self.view(p, x, activations)?, self.nodes[p.0].info())))
                    .collect::<Result<Vec<_>>>()?;
                let (stacked, _) = backend.concatenate_depth(&inputs)?;
                Ok((None, stacked))
            }
        }
    }

    /// Forward worklist. When `training` is set every `z` and `a` is kept
    /// and `dropout` masks the fully-connected activations.
    fn propagate(
        &self,
        x: TensorView<'_>,
        training: Option<(f32, &mut StdRng)>,
    ) -> Result<ForwardCache> {
        let count = self.nodes.len();
        let mut cache = ForwardCache {
            activations: TensorMap::new(count),
            activities: TensorMap::new(count),
            masks: TensorMap::new(count),
        };
        let (dropout, mut rng) = match training {
            Some((dropout, rng)) => (dropout, Some(rng)),
            None => (0.0, None),
        };
        let keep_everything = rng.is_some();
        let mut missing_parents: Vec<usize> = self.nodes.iter().map(|n| n.parents().len()).collect();
        let mut pending_readers: Vec<usize> = self.nodes.iter().map(|n| n.children().len()).collect();
        let mut ready = VecDeque::from([NodeId(0)]);
        let mut peak = 0;

        while let Some(id) = ready.pop_front() {
            let node = &self.nodes[id.0];
            if id.0 != 0 {
                let (z, mut a) = self.fire(node, x, &cache.activations, keep_everything)?;
                if let Some(rng) = rng.as_deref_mut() {
                    let masked = dropout > 0.0
                        && id != self.output
                        && matches!(node.layer(), Some(l) if l.kind() == LayerKind::FullyConnected);
                    if masked {
                        let mask = dropout_mask(rng, a.entities(), a.length(), dropout);
                        self.backend.hadamard_product_in_place(&mut a, mask.view())?;
                        cache.masks.insert(id, mask)?;
                    }
                    if let Some(z) = z {
                        cache.activities.insert(id, z)?;
                    }
                }
                cache.activations.insert(id, a)?;
                peak = peak.max(cache.activations.live_count());
                if !keep_everything {
                    for parent in node.parents() {
                        pending_readers[parent.0] -= 1;
                        if pending_readers[parent.0] == 0 {
                            cache.activations.remove(*parent);
                        }
                    }
                }
            }
            for child in node.children() {
                missing_parents[child.0] -= 1;
                if missing_parents[child.0] == 0 {
                    ready.push_back(*child);
                }
            }
        }
        log::trace!("graph forward pass done, at most {peak} live tensors");
        Ok(cache)
    }

    /// Previous delta of a processing node: `∂J/∂a ⊙ mask ⊙ f'(z)`.
    fn processing_delta(&self, id: NodeId, layer: &Layer, upstream: Tensor, cache: &ForwardCache) -> Result<Tensor> {
        let mut delta = upstream;
        if cache.masks.contains(id) {
            self.backend.hadamard_product_in_place(&mut delta, cache.masks.get(id)?.view())?;
        }
        self.backend
            .activation_prime_in_place(&mut delta, cache.activities.get(id)?.view(), layer.activation())?;
        Ok(delta)
    }
}

impl Network for ComputationGraphNetwork {
    fn network_type(&self) -> NetworkType {
        NetworkType::ComputationGraph
    }

    fn input_info(&self) -> TensorInfo {
        self.nodes[0].info()
    }

    fn output_info(&self) -> TensorInfo {
        self.nodes[self.output.0].info()
    }

    fn layers(&self) -> Vec<&Layer> {
        self.nodes.iter().filter_map(Node::layer).collect()
    }

    fn output_layer(&self) -> &OutputLayer {
        // the builder only accepts an output layer as terminal node
        match self.nodes[self.output.0].layer().and_then(Layer::as_output) {
            Some(output) => output,
            None => unreachable!("the terminal node always holds an output layer"),
        }
    }

    fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    fn as_graph(&self) -> Option<&ComputationGraphNetwork> {
        Some(self)
    }

    fn approx_eq(&self, other: &dyn Network) -> bool {
        let Some(other) = other.as_graph() else {
            return false;
        };
        self.output == other.output
            && self.nodes.len() == other.nodes.len()
            && self.nodes.iter().zip(&other.nodes).all(|(a, b)| {
                a.tag() == b.tag()
                    && a.parents() == b.parents()
                    && a.info() == b.info()
                    && match (a.layer(), b.layer()) {
                        (Some(x), Some(y)) => x.approx_eq(y),
                        (None, None) => true,
                        _ => false,
                    }
            })
    }

    fn forward(&self, x: TensorView<'_>) -> Result<Tensor> {
        if x.length() != self.input_info().size() {
            return Err(NetworkError::shape_mismatch(
                "ComputationGraphNetwork::forward",
                format!("rows of {} values", self.input_info().size()),
                format!("rows of {} values", x.length()),
            ));
        }
        let mut cache = self.propagate(x, None)?;
        cache.activations.take(self.output)
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
        let x = batch.x.view();
        let cache = self.propagate(x, Some((dropout, rng)))?;

        let count = self.nodes.len();
        let mut deltas = TensorMap::new(count);
        let mut missing_children: Vec<usize> = self.nodes.iter().map(|n| n.children().len()).collect();
        let mut gradients = (0..count).map(|_| None).collect::<Vec<_>>();
        let terminal = self.output_layer().output_delta(
            cache.activations.get(self.output)?.view(),
            batch.y.view(),
            cache.activities.get(self.output)?.view(),
        )?;
        deltas.insert(self.output, terminal)?;
        let mut ready = VecDeque::from([self.output]);

        while let Some(id) = ready.pop_front() {
            let node = &self.nodes[id.0];
            let upstream = deltas.take(id)?;
            let mut contributions = Vec::with_capacity(node.parents().len());
            match node.kind() {
                NodeKind::Input => continue,
                NodeKind::Processing(layer) => {
                    let delta = if id == self.output {
                        upstream
                    } else {
                        self.processing_delta(id, layer, upstream, &cache)?
                    };
                    let parent = node.parents()[0];
                    let input = self.view(parent, x, &cache.activations)?;
                    let back = layer.backpropagate(backend, input, delta.view(), parent.0 != 0)?;
                    gradients[id.0] = back.gradient;
                    if let Some(input_gradient) = back.input_gradient {
                        contributions.push((parent, input_gradient));
                    }
                }
                NodeKind::Sum => {
                    contributions.extend(node.parents().iter().map(|&p| (p, upstream.clone())));
                }
                NodeKind::DepthConcatenation => {
                    let depths: Vec<usize> = node.parents().iter().map(|p| self.nodes[p.0].info().channels).collect();
                    let parts = backend.split_depth(upstream.view(), node.info(), &depths)?;
                    contributions.extend(node.parents().iter().copied().zip(parts));
                }
            }
            for (parent, gradient) in contributions {
                if parent.0 == 0 {
                    continue;
                }
                deltas.accumulate(backend, parent, gradient)?;
                missing_children[parent.0] -= 1;
                if missing_children[parent.0] == 0 {
                    ready.push_back(parent);
                }
            }
        }
        drop(cache);

        let (layers, gradients): (Vec<_>, Vec<_>) = self
            .nodes
            .iter_mut()
            .zip(gradients)
            .filter_map(|(node, gradient)| node.layer_mut().map(|layer| (layer, gradient)))
            .unzip();
        log::trace!("submitting gradients of {} graph layers", layers.len());
        submit_gradients(self.backend.as_ref(), layers.into_iter(), gradients, batch.len(), updater)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::CpuBackend;
    use crate::functions::{ActivationType, CostFunctionType};
    use crate::layers::LayerSpec;

    fn backend() -> Arc<dyn Backend> {
        Arc::new(CpuBackend::new())
    }

    fn diamond() -> ComputationGraphNetwork {
        let mut builder = ComputationGraphBuilder::new(TensorInfo::linear(3), 8);
        let input = builder.input();
        let a = builder.layer(input, &LayerSpec::fully_connected(4, ActivationType::Tanh)).unwrap();
        let b = builder.layer(a, &LayerSpec::fully_connected(4, ActivationType::Sigmoid)).unwrap();
        let c = builder.layer(a, &LayerSpec::fully_connected(4, ActivationType::ReLU)).unwrap();
        let sum = builder.sum(&[b, c, a]).unwrap();
        let out = builder
            .layer(sum, &LayerSpec::output(2, ActivationType::Sigmoid, CostFunctionType::CrossEntropy))
            .unwrap();
        builder.build(out, backend()).unwrap()
    }

    #[test]
    fn forward_follows_the_topology() {
        let network = diamond();
        let be = CpuBackend::new();
        let x = Tensor::from_vec(2, 3, vec![0.5, -0.1, 0.3, 0.0, 0.9, -0.7]).unwrap();
        let layers = network.layers();
        let (_, a) = layers[0].forward(&be, x.view()).unwrap();
        let (_, b) = layers[1].forward(&be, a.view()).unwrap();
        let (_, c) = layers[2].forward(&be, a.view()).unwrap();
        let mut s = be.sum(b.view(), c.view(), SumMode::Elementwise).unwrap();
        be.sum_in_place(&mut s, a.view(), SumMode::Elementwise).unwrap();
        let (_, expected) = layers[3].forward(&be, s.view()).unwrap();
        assert!(network.forward(x.view()).unwrap().approx_eq(&expected));
        assert_eq!(network.network_type(), NetworkType::ComputationGraph);
    }

    #[test]
    fn every_weighted_node_receives_a_gradient() {
        let mut network = diamond();
        let batch = SamplesBatch::new(
            Tensor::from_vec(1, 3, vec![0.2, 0.4, -0.6]).unwrap(),
            Tensor::from_vec(1, 2, vec![1.0, 0.0]).unwrap(),
        )
        .unwrap();
        let seen = std::sync::Mutex::new(Vec::new());
        let record = |index: usize, gradient: &crate::layers::Gradient, samples: usize, layer: &mut Layer| {
            assert_eq!(samples, 1);
            assert_eq!(Some(&gradient.weights).map(Tensor::size), layer.weights().map(Tensor::size));
            seen.lock().unwrap().push(index);
        };
        let mut rng = rand::SeedableRng::seed_from_u64(0);
        network.backpropagate(&batch, 0.0, &mut rng, &record).unwrap();
        let mut seen = seen.into_inner().unwrap();
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2, 3]);
    }

    #[test]
    fn inference_releases_consumed_tensors() {
        let network = diamond();
        let x = Tensor::new(1, 3);
        let cache = network.propagate(x.view(), None).unwrap();
        assert_eq!(cache.activations.live_count(), 1);
        assert!(cache.activations.contains(network.output_node()));
    }
}
