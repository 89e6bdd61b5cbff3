use crate::error::{NetworkError, Result};
use crate::layers::Layer;
use crate::tensors::TensorInfo;
use serde::Serialize;
use std::fmt;

/// Position of a node in its graph, also its topological rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    /// Zero-based index of the node.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Discriminant of a [`NodeKind`], as stored in model files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum NodeTag {
    /// The graph entry point.
    Input = 0,
    /// A node wrapping a layer.
    Processing = 1,
    /// Elementwise sum of its parents.
    Sum = 2,
    /// Channel stacking of its parents.
    DepthConcatenation = 3,
}

impl TryFrom<u8> for NodeTag {
    type Error = NetworkError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Input),
            1 => Ok(Self::Processing),
            2 => Ok(Self::Sum),
            3 => Ok(Self::DepthConcatenation),
            _ => Err(NetworkError::deserialization(format!("unknown node tag {value}"))),
        }
    }
}

/// What a node computes.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// Forwards the network input.
    Input,
    /// Applies a layer to its single parent.
    Processing(Layer),
    /// Adds its parents, which share the same shape.
    Sum,
    /// Stacks the channels of its parents, which share height and width.
    DepthConcatenation,
}

impl NodeKind {
    /// The discriminant.
    #[must_use]
    pub const fn tag(&self) -> NodeTag {
        match self {
            Self::Input => NodeTag::Input,
            Self::Processing(_) => NodeTag::Processing,
            Self::Sum => NodeTag::Sum,
            Self::DepthConcatenation => NodeTag::DepthConcatenation,
        }
    }
}

/// A vertex of a computation graph.
///
/// `parents` and `children` hold one entry per edge, so a node feeding the
/// same merge twice appears twice.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub(super) kind: NodeKind,
    pub(super) parents: Vec<NodeId>,
    pub(super) children: Vec<NodeId>,
    pub(super) info: TensorInfo,
}

impl Node {
    /// What the node computes.
    #[must_use]
    pub const fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// Shorthand for `kind().tag()`.
    #[must_use]
    pub const fn tag(&self) -> NodeTag {
        self.kind.tag()
    }

    /// Nodes this one reads from, in input order.
    #[must_use]
    pub fn parents(&self) -> &[NodeId] {
        &self.parents
    }

    /// Nodes reading from this one.
    #[must_use]
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// Shape of the tensor this node produces.
    #[must_use]
    pub const fn info(&self) -> TensorInfo {
        self.info
    }

    /// The wrapped layer of a processing node.
    #[must_use]
    pub const fn layer(&self) -> Option<&Layer> {
        match &self.kind {
            NodeKind::Processing(layer) => Some(layer),
            _ => None,
        }
    }

    pub(super) fn layer_mut(&mut self) -> Option<&mut Layer> {
        match &mut self.kind {
            NodeKind::Processing(layer) => Some(layer),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_round_trip() {
        for tag in [NodeTag::Input, NodeTag::Processing, NodeTag::Sum, NodeTag::DepthConcatenation] {
            assert_eq!(NodeTag::try_from(tag as u8).unwrap(), tag);
        }
        assert!(matches!(NodeTag::try_from(7), Err(NetworkError::Deserialization(_))));
    }
}
