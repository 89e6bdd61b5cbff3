use super::{ComputationGraphNetwork, Node, NodeId, NodeKind};
use crate::backend::Backend;
use crate::error::{NetworkError, Result};
use crate::layers::{Layer, LayerKind, LayerSpec};
use crate::tensors::TensorInfo;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::sync::Arc;

/// Incremental constructor of a [`ComputationGraphNetwork`].
///
/// Nodes can only reference nodes that already exist, so the insertion order
/// is a topological order.
///
/// ```rust
/// use neural_cpu::backend::default_backend;
/// use neural_cpu::functions::ActivationType;
/// use neural_cpu::layers::LayerSpec;
/// use neural_cpu::network::{ComputationGraphBuilder, Network};
/// use neural_cpu::tensors::TensorInfo;
///
/// let mut builder = ComputationGraphBuilder::new(TensorInfo::linear(4), 42);
/// let input = builder.input();
/// let left = builder.layer(input, &LayerSpec::fully_connected(3, ActivationType::ReLU))?;
/// let right = builder.layer(input, &LayerSpec::fully_connected(3, ActivationType::Tanh))?;
/// let merged = builder.sum(&[left, right])?;
/// let output = builder.layer(merged, &LayerSpec::softmax(2))?;
/// let network = builder.build(output, default_backend())?;
/// assert_eq!(network.output_info(), TensorInfo::linear(2));
/// # Ok::<(), neural_cpu::NetworkError>(())
/// ```
#[derive(Debug)]
pub struct ComputationGraphBuilder {
    nodes: Vec<Node>,
    rng: StdRng,
}

impl ComputationGraphBuilder {
    /// Starts a graph whose input samples have shape `input`; `seed` drives
    /// the initialization of layers added through [`Self::layer`].
    #[must_use]
    pub fn new(input: TensorInfo, seed: u64) -> Self {
        let root = Node {
            kind: NodeKind::Input,
            parents: Vec::new(),
            children: Vec::new(),
            info: input,
        };
        Self {
            nodes: vec![root],
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// The input node.
    #[must_use]
    pub const fn input(&self) -> NodeId {
        NodeId(0)
    }

    /// Shape produced by `node`.
    ///
    /// # Errors
    /// Returns [`NetworkError::InvalidTopology`] for an unknown node.
    pub fn info(&self, node: NodeId) -> Result<TensorInfo> {
        self.node(node).map(Node::info)
    }

    fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes
            .get(id.0)
            .ok_or_else(|| NetworkError::InvalidTopology(format!("node {id} does not exist")))
    }

    fn push(&mut self, kind: NodeKind, parents: Vec<NodeId>, info: TensorInfo) -> NodeId {
        let id = NodeId(self.nodes.len());
        for parent in &parents {
            self.nodes[parent.0].children.push(id);
        }
        self.nodes.push(Node {
            kind,
            parents,
            children: Vec::new(),
            info,
        });
        id
    }

    fn check_parents(&self, parents: &[NodeId], merge: &str) -> Result<Vec<TensorInfo>> {
        if parents.len() < 2 {
            return Err(NetworkError::InvalidTopology(format!(
                "a {merge} node needs at least two parents, got {}",
                parents.len()
            )));
        }
        parents
            .iter()
            .map(|&id| {
                let node = self.node(id)?;
                if matches!(node.layer(), Some(layer) if layer.kind() == LayerKind::Output) {
                    return Err(NetworkError::InvalidTopology(format!(
                        "output node {id} cannot feed other nodes"
                    )));
                }
                Ok(node.info)
            })
            .collect()
    }

    /// Builds `spec` against the shape of `parent` and appends it.
    ///
    /// # Errors
    /// Returns the layer construction error, or
    /// [`NetworkError::InvalidTopology`] for an unknown or output parent.
    pub fn layer(&mut self, parent: NodeId, spec: &LayerSpec) -> Result<NodeId> {
        let info = self.info(parent)?;
        let layer = spec.build(info, &mut self.rng)?;
        self.add_layer(parent, layer)
    }

    /// Appends an already built layer under `parent`.
    ///
    /// # Errors
    /// Returns [`NetworkError::InvalidTopology`] when the layer doesn't accept
    /// the shape of `parent` or `parent` is an output node.
    pub fn add_layer(&mut self, parent: NodeId, layer: Layer) -> Result<NodeId> {
        let parent_node = self.node(parent)?;
        if matches!(parent_node.layer(), Some(l) if l.kind() == LayerKind::Output) {
            return Err(NetworkError::InvalidTopology(format!(
                "output node {parent} cannot feed other nodes"
            )));
        }
        let info = parent_node.info;
        let fits = match layer.kind() {
            LayerKind::Convolutional | LayerKind::Pooling => layer.input_info() == info,
            LayerKind::FullyConnected | LayerKind::Output => layer.input_info().size() == info.size(),
        };
        if !fits {
            return Err(NetworkError::InvalidTopology(format!(
                "a {} layer expecting {} cannot follow node {parent} producing {info}",
                layer.kind(),
                layer.input_info()
            )));
        }
        let output = layer.output_info();
        Ok(self.push(NodeKind::Processing(layer), vec![parent], output))
    }

    /// Appends a node adding its parents elementwise.
    ///
    /// # Errors
    /// Returns [`NetworkError::InvalidTopology`] for fewer than two parents or
    /// parents of different shapes.
    pub fn sum(&mut self, parents: &[NodeId]) -> Result<NodeId> {
        let infos = self.check_parents(parents, "sum")?;
        let info = infos[0];
        if let Some(other) = infos.iter().find(|&&other| other != info) {
            return Err(NetworkError::InvalidTopology(format!(
                "sum parents must share the same shape, got {info} and {other}"
            )));
        }
        Ok(self.push(NodeKind::Sum, parents.to_vec(), info))
    }

    /// Appends a node stacking the channels of its parents.
    ///
    /// # Errors
    /// Returns [`NetworkError::InvalidTopology`] for fewer than two parents or
    /// parents with different height or width.
    pub fn depth_concatenation(&mut self, parents: &[NodeId]) -> Result<NodeId> {
        let infos = self.check_parents(parents, "depth concatenation")?;
        let first = infos[0];
        if let Some(other) = infos
            .iter()
            .find(|other| other.height != first.height || other.width != first.width)
        {
            return Err(NetworkError::InvalidTopology(format!(
                "depth concatenation parents must share height and width, got {first} and {other}"
            )));
        }
        let channels = infos.iter().map(|info| info.channels).sum();
        let info = TensorInfo::new(first.height, first.width, channels);
        Ok(self.push(NodeKind::DepthConcatenation, parents.to_vec(), info))
    }

    /// Finishes the graph with `output` as its terminal node.
    ///
    /// # Errors
    /// Returns [`NetworkError::InvalidTopology`] unless `output` holds the
    /// only output layer and every other node feeds at least one node.
    pub fn build(self, output: NodeId, backend: Arc<dyn Backend>) -> Result<ComputationGraphNetwork> {
        let terminal = self.node(output)?;
        if !matches!(terminal.layer(), Some(layer) if layer.kind() == LayerKind::Output) {
            return Err(NetworkError::InvalidTopology(format!(
                "terminal node {output} must hold an output layer"
            )));
        }
        for (i, node) in self.nodes.iter().enumerate() {
            if i == output.0 {
                continue;
            }
            if node.children.is_empty() {
                return Err(NetworkError::InvalidTopology(format!(
                    "node #{i} is not connected to the output node"
                )));
            }
            if matches!(node.layer(), Some(layer) if layer.kind() == LayerKind::Output) {
                return Err(NetworkError::InvalidTopology(format!(
                    "node #{i} holds a second output layer"
                )));
            }
        }
        log::debug!(
            "built computation graph: {} nodes, {} -> {}",
            self.nodes.len(),
            self.nodes[0].info,
            terminal.info
        );
        Ok(ComputationGraphNetwork::from_nodes(self.nodes, output, backend))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::CpuBackend;
    use crate::functions::{ActivationType, CostFunctionType};

    fn backend() -> Arc<dyn Backend> {
        Arc::new(CpuBackend::new())
    }

    #[test]
    fn merges_check_their_parents() {
        let mut builder = ComputationGraphBuilder::new(TensorInfo::linear(4), 0);
        let input = builder.input();
        let a = builder.layer(input, &LayerSpec::fully_connected(3, ActivationType::ReLU)).unwrap();
        let b = builder.layer(input, &LayerSpec::fully_connected(2, ActivationType::ReLU)).unwrap();
        assert!(builder.sum(&[a]).is_err());
        assert!(builder.sum(&[a, b]).is_err());
        assert!(builder.depth_concatenation(&[a, b]).is_err());
        let c = builder.layer(input, &LayerSpec::fully_connected(3, ActivationType::Tanh)).unwrap();
        let concat = builder.depth_concatenation(&[a, c]).unwrap();
        assert_eq!(builder.info(concat).unwrap(), TensorInfo::new(1, 3, 2));
        assert!(builder.sum(&[a, NodeId(42)]).is_err());
    }

    #[test]
    fn dangling_nodes_are_rejected() {
        let mut builder = ComputationGraphBuilder::new(TensorInfo::linear(4), 0);
        let input = builder.input();
        builder.layer(input, &LayerSpec::fully_connected(3, ActivationType::ReLU)).unwrap();
        let out = builder
            .layer(input, &LayerSpec::output(1, ActivationType::Sigmoid, CostFunctionType::CrossEntropy))
            .unwrap();
        assert!(matches!(
            builder.build(out, backend()),
            Err(NetworkError::InvalidTopology(_))
        ));
    }

    #[test]
    fn output_nodes_are_terminal() {
        let mut builder = ComputationGraphBuilder::new(TensorInfo::linear(4), 0);
        let input = builder.input();
        let out = builder.layer(input, &LayerSpec::softmax(4)).unwrap();
        assert!(builder.layer(out, &LayerSpec::softmax(2)).is_err());

        let mut builder = ComputationGraphBuilder::new(TensorInfo::linear(4), 0);
        let input = builder.input();
        let hidden = builder.layer(input, &LayerSpec::fully_connected(3, ActivationType::ReLU)).unwrap();
        assert!(builder.build(hidden, backend()).is_err());
    }

    #[test]
    fn convolutions_need_the_exact_shape() {
        let mut rng = StdRng::seed_from_u64(3);
        let conv = LayerSpec::convolutional(2, 2, 2, ActivationType::ReLU)
            .build(TensorInfo::image(4, 4), &mut rng)
            .unwrap();
        let mut builder = ComputationGraphBuilder::new(TensorInfo::new(2, 8, 1), 0);
        let input = builder.input();
        assert!(builder.add_layer(input, conv).is_err());
    }
}
