//! # Networks
//!
//! A [`Network`] composes layers either as a linear stack
//! ([`SequentialNetwork`]) or as a directed acyclic graph with branch and
//! merge nodes ([`ComputationGraphNetwork`]). Both share the same contract:
//!
//! - `forward` runs inference, releasing intermediate tensors as soon as
//!   nothing reads them anymore;
//! - `backpropagate` runs one training step over a batch: a caching forward
//!   pass with optional inverted dropout, the terminal delta from the output
//!   layer, the backward walk, and finally the parallel hand-off of every
//!   weighted layer's gradient to a [`WeightsUpdater`].
//!
//! Gradients are computed against the weights of the forward pass; no update
//! is applied until the whole backward walk succeeded, so a failing step
//! leaves the network untouched.

mod graph;
mod sequential;

pub use self::graph::{ComputationGraphBuilder, ComputationGraphNetwork, Node, NodeId, NodeKind, NodeTag};
pub use self::sequential::SequentialNetwork;

use crate::backend::Backend;
use crate::error::{NetworkError, Result};
use crate::layers::{Gradient, Layer, OutputLayer};
use crate::optim::WeightsUpdater;
use crate::tensors::{SamplesBatch, Tensor, TensorInfo, TensorView};
use rand::Rng;
use rand::rngs::StdRng;
use rayon::prelude::*;
use serde::Serialize;
use std::fmt;

/// How the layers of a network are arranged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum NetworkType {
    /// A linear stack of layers.
    Sequential = 0,
    /// A DAG of layers and merge nodes.
    ComputationGraph = 1,
}

impl TryFrom<u8> for NetworkType {
    type Error = NetworkError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Sequential),
            1 => Ok(Self::ComputationGraph),
            _ => Err(NetworkError::deserialization(format!("unknown network type {value}"))),
        }
    }
}

impl fmt::Display for NetworkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Sequential => "sequential",
            Self::ComputationGraph => "computation_graph",
        })
    }
}

/// Cost and accuracy of a network over a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Evaluation {
    /// Average cost per sample.
    pub cost: f32,
    /// Fraction of correctly classified samples, in `[0, 1]`.
    pub accuracy: f32,
}

/// The common contract of sequential and graph networks.
pub trait Network: Send + Sync + fmt::Debug {
    /// Arrangement of the layers.
    fn network_type(&self) -> NetworkType;

    /// Shape of one input sample.
    fn input_info(&self) -> TensorInfo;

    /// Shape of one output sample.
    fn output_info(&self) -> TensorInfo;

    /// Every layer, in forward (topological) order.
    fn layers(&self) -> Vec<&Layer>;

    /// The terminal layer.
    fn output_layer(&self) -> &OutputLayer;

    /// The backend the network was built with.
    fn backend(&self) -> &dyn Backend;

    /// The graph view of a computation graph network, `None` otherwise.
    fn as_graph(&self) -> Option<&ComputationGraphNetwork> {
        None
    }

    /// Runs inference on a batch, one sample per row.
    ///
    /// # Errors
    /// Returns a shape error when the rows of `x` don't match `input_info()`.
    fn forward(&self, x: TensorView<'_>) -> Result<Tensor>;

    /// Average cost and accuracy over a dataset.
    ///
    /// # Errors
    /// Returns a shape error when `x` or `y` don't match the network.
    fn evaluate(&self, x: TensorView<'_>, y: TensorView<'_>) -> Result<Evaluation> {
        let yhat = self.forward(x)?;
        let cost = self.output_layer().cost(yhat.view(), y)?;
        let accuracy = accuracy(self.backend(), yhat.view(), y);
        Ok(Evaluation { cost, accuracy })
    }

    /// Runs one training step on `batch`.
    ///
    /// `dropout` is the probability of dropping a hidden fully-connected
    /// activation (`0` disables dropout); masks are drawn from `rng`.
    ///
    /// # Errors
    /// Returns a shape error for a batch not matching the network,
    /// [`NetworkError::InvalidArgument`] for a dropout outside `[0, 1)`, and
    /// [`NetworkError::Computation`] if a kernel or the updater fails. The
    /// weights are left untouched when an error is returned before the
    /// update phase.
    fn backpropagate(
        &mut self,
        batch: &SamplesBatch,
        dropout: f32,
        rng: &mut StdRng,
        updater: &dyn WeightsUpdater,
    ) -> Result<()>;

    /// Whether any weight or bias became NaN or infinite.
    fn is_in_numeric_overflow(&self) -> bool {
        self.layers().iter().any(|layer| layer.is_in_numeric_overflow())
    }

    /// Total number of trainable values.
    fn parameters_count(&self) -> usize {
        self.layers().iter().map(|layer| layer.parameters_count()).sum()
    }

    /// Same type, same layers and weights equal within the default delta.
    fn approx_eq(&self, other: &dyn Network) -> bool {
        let (mine, theirs) = (self.layers(), other.layers());
        self.network_type() == other.network_type()
            && self.input_info() == other.input_info()
            && mine.len() == theirs.len()
            && mine.iter().zip(&theirs).all(|(a, b)| a.approx_eq(b))
    }
}

/// Fraction of samples whose prediction matches the expected output.
///
/// Rows are compared by argmax, single-output networks by `|a − y| < 0.5`.
pub(crate) fn accuracy(backend: &dyn Backend, yhat: TensorView<'_>, y: TensorView<'_>) -> f32 {
    let samples = yhat.entities().min(y.entities());
    if samples == 0 || yhat.length() != y.length() {
        return 0.0;
    }
    let hits = (0..samples)
        .into_par_iter()
        .filter(|&i| {
            let (a, t) = (yhat.row(i), y.row(i));
            if a.len() == 1 {
                (a[0] - t[0]).abs() < 0.5
            } else {
                backend.argmax(a) == backend.argmax(t)
            }
        })
        .count();
    hits as f32 / samples as f32
}

pub(crate) fn check_dropout(dropout: f32) -> Result<()> {
    if (0.0..1.0).contains(&dropout) {
        Ok(())
    } else {
        Err(NetworkError::InvalidArgument(format!(
            "dropout must be in [0, 1), got {dropout}"
        )))
    }
}

pub(crate) fn check_batch(network: &dyn Network, batch: &SamplesBatch) -> Result<()> {
    if batch.x.length() != network.input_info().size() {
        return Err(NetworkError::shape_mismatch(
            "Network::backpropagate",
            format!("inputs of {} values", network.input_info().size()),
            format!("inputs of {} values", batch.x.length()),
        ));
    }
    if batch.y.length() != network.output_info().size() {
        return Err(NetworkError::shape_mismatch(
            "Network::backpropagate",
            format!("expected outputs of {} values", network.output_info().size()),
            format!("expected outputs of {} values", batch.y.length()),
        ));
    }
    Ok(())
}

/// Inverted dropout mask: `1/p` with probability `p = 1 − dropout`, else `0`.
pub(crate) fn dropout_mask(rng: &mut StdRng, entities: usize, length: usize, dropout: f32) -> Tensor {
    let keep = 1.0 - dropout;
    let scale = 1.0 / keep;
    let mut mask = Tensor::new(entities, length);
    for v in mask.data_mut() {
        if rng.random_bool(f64::from(keep)) {
            *v = scale;
        }
    }
    mask
}

/// Hands every weighted layer's gradient to `updater`, one task per layer.
///
/// `layers` and `gradients` are aligned; the index passed to the updater is
/// the ordinal of the layer among the weighted ones.
pub(crate) fn submit_gradients<'a>(
    backend: &dyn Backend,
    layers: impl Iterator<Item = &'a mut Layer>,
    gradients: Vec<Option<Gradient>>,
    samples: usize,
    updater: &dyn WeightsUpdater,
) -> Result<()> {
    let mut work = Vec::new();
    let mut ordinal = 0;
    for (layer, gradient) in layers.zip(gradients) {
        if !layer.is_weighted() {
            continue;
        }
        if let Some(gradient) = gradient {
            work.push((ordinal, layer, gradient));
        }
        ordinal += 1;
    }
    backend.execute(&mut || {
        work.par_iter_mut().for_each(|(index, layer, gradient)| {
            updater.update(*index, gradient, samples, layer);
        });
    })
}
