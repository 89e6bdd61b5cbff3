//! JSON description of a network.
//!
//! The metadata tree is informational: it names the structure and the
//! hyperparameters of every layer but carries no weights, so it cannot be
//! used to restore a model.

use crate::error::Result;
use crate::functions::{ActivationType, CostFunctionType};
use crate::layers::{Layer, LayerKind};
use crate::network::{Network, NetworkType, NodeTag};
use crate::tensors::TensorInfo;
use serde::Serialize;
use std::io::Write;

/// Kernel geometry of a convolutional layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct KernelsMetadata {
    /// Kernel height.
    pub height: usize,
    /// Kernel width.
    pub width: usize,
    /// Number of kernels (output channels).
    pub count: usize,
}

/// Description of one layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayerMetadata {
    /// Layer discriminant.
    pub kind: LayerKind,
    /// Input sample shape.
    pub input: TensorInfo,
    /// Output sample shape.
    pub output: TensorInfo,
    /// Activation function.
    pub activation: ActivationType,
    /// Cost function of the output layer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<CostFunctionType>,
    /// Kernel geometry of a convolutional layer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kernels: Option<KernelsMetadata>,
    /// Trainable values.
    pub parameters: usize,
}

/// Description of one graph node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeMetadata {
    /// Node discriminant.
    pub tag: NodeTag,
    /// Indices of the parent nodes.
    pub parents: Vec<usize>,
    /// Output shape of the node.
    pub info: TensorInfo,
    /// Index into [`NetworkMetadata::layers`] for processing nodes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layer: Option<usize>,
}

/// Description of a whole network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkMetadata {
    /// Arrangement of the layers.
    pub network_type: NetworkType,
    /// Input sample shape.
    pub input: TensorInfo,
    /// Output sample shape.
    pub output: TensorInfo,
    /// Every layer, in forward order.
    pub layers: Vec<LayerMetadata>,
    /// Graph topology, for computation graphs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nodes: Option<Vec<NodeMetadata>>,
    /// Total trainable values.
    pub parameters: usize,
}

impl From<&Layer> for LayerMetadata {
    fn from(layer: &Layer) -> Self {
        let kernels = match layer {
            Layer::Convolutional(conv) => Some(KernelsMetadata {
                height: conv.kernels_info().height,
                width: conv.kernels_info().width,
                count: conv.kernels_count(),
            }),
            _ => None,
        };
        Self {
            kind: layer.kind(),
            input: layer.input_info(),
            output: layer.output_info(),
            activation: layer.activation(),
            cost: layer.cost_function(),
            kernels,
            parameters: layer.parameters_count(),
        }
    }
}

/// Collects the metadata tree of `network`.
#[must_use]
pub fn metadata(network: &dyn Network) -> NetworkMetadata {
    let nodes = network.as_graph().map(|graph| {
        let mut layer = 0;
        graph
            .nodes()
            .iter()
            .map(|node| NodeMetadata {
                tag: node.tag(),
                parents: node.parents().iter().map(|p| p.index()).collect(),
                info: node.info(),
                layer: node.layer().map(|_| {
                    layer += 1;
                    layer - 1
                }),
            })
            .collect()
    });
    NetworkMetadata {
        network_type: network.network_type(),
        input: network.input_info(),
        output: network.output_info(),
        layers: network.layers().into_iter().map(LayerMetadata::from).collect(),
        nodes,
        parameters: network.parameters_count(),
    }
}

/// Pretty-printed JSON metadata of `network`.
///
/// # Errors
/// Returns [`crate::NetworkError::Json`] if encoding fails.
pub fn to_json(network: &dyn Network) -> Result<String> {
    Ok(serde_json::to_string_pretty(&metadata(network))?)
}

/// Writes the JSON metadata of `network` to `writer`.
///
/// # Errors
/// Returns [`crate::NetworkError::Json`] if encoding or writing fails.
pub fn write_json<W: Write>(network: &dyn Network, writer: W) -> Result<()> {
    serde_json::to_writer_pretty(writer, &metadata(network))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::CpuBackend;
    use crate::layers::LayerSpec;
    use crate::network::{ComputationGraphBuilder, SequentialNetwork};
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::sync::Arc;

    #[test]
    fn sequential_metadata_lists_layers() {
        let mut rng = StdRng::seed_from_u64(0);
        let specs = [
            LayerSpec::convolutional(2, 2, 3, ActivationType::ReLU),
            LayerSpec::output(2, ActivationType::Softmax, CostFunctionType::LogLikelihood),
        ];
        let network =
            SequentialNetwork::new(TensorInfo::image(4, 4), &specs, &mut rng, Arc::new(CpuBackend::new())).unwrap();
        let tree = metadata(&network);
        assert_eq!(tree.layers.len(), 2);
        assert_eq!(tree.layers[0].kernels, Some(KernelsMetadata { height: 2, width: 2, count: 3 }));
        assert_eq!(tree.parameters, 3 * 4 + 3 + 27 * 2 + 2);
        assert!(tree.nodes.is_none());

        let json: serde_json::Value = serde_json::from_str(&to_json(&network).unwrap()).unwrap();
        assert_eq!(json["network_type"], "sequential");
        assert_eq!(json["layers"][1]["cost"], "log_likelihood");
        assert_eq!(json["layers"][0]["activation"], "relu");
        assert!(json["layers"][0].get("cost").is_none());
    }

    #[test]
    fn graph_metadata_maps_nodes_to_layers() {
        let mut builder = ComputationGraphBuilder::new(TensorInfo::linear(3), 1);
        let input = builder.input();
        let a = builder.layer(input, &LayerSpec::fully_connected(2, ActivationType::Tanh)).unwrap();
        let b = builder.layer(input, &LayerSpec::fully_connected(2, ActivationType::Tanh)).unwrap();
        let merged = builder.depth_concatenation(&[a, b]).unwrap();
        let out = builder.layer(merged, &LayerSpec::softmax(2)).unwrap();
        let network = builder.build(out, Arc::new(CpuBackend::new())).unwrap();
        let nodes = metadata(&network).nodes.unwrap();
        let layers: Vec<Option<usize>> = nodes.iter().map(|n| n.layer).collect();
        assert_eq!(layers, vec![None, Some(0), Some(1), None, Some(2)]);
        assert_eq!(nodes[3].parents, vec![1, 2]);
        assert_eq!(nodes[3].tag, NodeTag::DepthConcatenation);
    }
}
