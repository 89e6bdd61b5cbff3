//! Saving and loading of trained networks.
//!
//! # `.nncp` model format
//!
//! A model is a little-endian binary stream, optionally wrapped in gzip.
//! [`load`] recognizes the gzip magic and decodes either form.
//!
//! ```text
//! ┌───────────────┬────────────┬──────────────┬─────────────────────────┐
//! │ "NNCP" [4]    │ u8 version │ u8 net type  │ body                    │
//! └───────────────┴────────────┴──────────────┴─────────────────────────┘
//!
//! sequential body:  u32 layer count, layer record * count
//! graph body:       u32 node count, [u32; 3] input info, per node:
//!                     u8 node tag, u32 parent count, u32 parent * count,
//!                     layer record (processing nodes only)
//!
//! layer record:     u8 kind, [u32; 3] input info, [u32; 3] output info,
//!                   u8 activation,
//!                   u8 cost                      (output layers)
//!                   [u32; 3] kernel h, w, count  (convolutional layers)
//!                   u32 len + f32 * len weights  (weighted layers)
//!                   u32 len + f32 * len biases   (weighted layers)
//! ```
//!
//! Tensor infos are written as height, width, channels. The terminal node
//! of a graph is its last node.
//!
//! Every decoded layer record goes through [`briny`] validation before a
//! layer is built from it. Unknown tags, truncated streams and records that
//! fail validation are all reported as [`NetworkError::Deserialization`].
//!
//! # Example
//!
//! ```rust
//! use neural_cpu::backend::default_backend;
//! use neural_cpu::functions::{ActivationType, CostFunctionType};
//! use neural_cpu::layers::LayerSpec;
//! use neural_cpu::modelio::{self, Compression};
//! use neural_cpu::network::{Network, SequentialNetwork};
//! use neural_cpu::tensors::TensorInfo;
//! use rand::SeedableRng;
//!
//! let mut rng = rand::rngs::StdRng::seed_from_u64(1);
//! let specs = [LayerSpec::output(2, ActivationType::Sigmoid, CostFunctionType::CrossEntropy)];
//! let network = SequentialNetwork::new(TensorInfo::linear(3), &specs, &mut rng, default_backend())?;
//!
//! let mut bytes = Vec::new();
//! modelio::save(&network, &mut bytes, Compression::Gzip)?;
//! let restored = modelio::load(bytes.as_slice(), default_backend())?;
//! assert!(restored.approx_eq(&network));
//! # Ok::<(), neural_cpu::NetworkError>(())
//! ```

pub mod metadata;

use crate::backend::Backend;
use crate::error::{NetworkError, Result};
use crate::functions::{ActivationType, CostFunctionType};
use crate::layers::{
    ConvolutionalLayer, FullyConnectedLayer, Layer, LayerKind, OutputLayer, PoolingLayer,
};
use crate::network::{
    ComputationGraphBuilder, ComputationGraphNetwork, Network, NetworkType, NodeId, NodeKind,
    NodeTag, SequentialNetwork,
};
use crate::tensors::{Tensor, TensorInfo};
use briny::prelude::*;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::Arc;

const MAGIC: &[u8; 4] = b"NNCP";
const VERSION: u8 = 1;
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Upper bound of any count read from a stream, guarding allocations.
const MAX_COUNT: usize = 1 << 28;

/// Whether [`save`] wraps the stream in gzip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    /// Raw binary stream.
    #[default]
    None,
    /// Gzip at the default level.
    Gzip,
    /// Gzip favoring speed over size.
    GzipFast,
    /// Gzip favoring size over speed.
    GzipBest,
}

impl Compression {
    const fn level(self) -> Option<flate2::Compression> {
        match self {
            Self::None => None,
            Self::Gzip => Some(flate2::Compression::new(6)),
            Self::GzipFast => Some(flate2::Compression::new(1)),
            Self::GzipBest => Some(flate2::Compression::new(9)),
        }
    }
}

/// Writes `network` to `writer`.
///
/// # Errors
/// Returns [`NetworkError::Io`] when writing fails and
/// [`NetworkError::InvalidArgument`] when a dimension doesn't fit the format.
pub fn save<W: Write>(network: &dyn Network, writer: W, compression: Compression) -> Result<()> {
    match compression.level() {
        None => {
            let mut writer = writer;
            encode(network, &mut writer)?;
            writer.flush()?;
        }
        Some(level) => {
            let mut encoder = GzEncoder::new(writer, level);
            encode(network, &mut encoder)?;
            encoder.finish()?.flush()?;
        }
    }
    log::debug!(
        "saved {} network with {} parameters ({compression:?})",
        network.network_type(),
        network.parameters_count()
    );
    Ok(())
}

/// Writes `network` to the file at `path`, replacing it.
///
/// # Errors
/// See [`save`].
pub fn save_to_file(network: &dyn Network, path: impl AsRef<Path>, compression: Compression) -> Result<()> {
    save(network, BufWriter::new(File::create(path)?), compression)
}

/// Reads a network, plain or gzip-wrapped, binding it to `backend`.
///
/// # Errors
/// Returns [`NetworkError::Deserialization`] for malformed or truncated
/// streams and [`NetworkError::Io`] for other read failures.
pub fn load<R: Read>(reader: R, backend: Arc<dyn Backend>) -> Result<Box<dyn Network>> {
    let mut reader = BufReader::new(reader);
    let gzipped = reader.fill_buf()?.starts_with(&GZIP_MAGIC);
    let network = if gzipped {
        decode(&mut Decoder(BufReader::new(GzDecoder::new(reader))), backend)?
    } else {
        decode(&mut Decoder(reader), backend)?
    };
    log::debug!(
        "loaded {} network with {} parameters",
        network.network_type(),
        network.parameters_count()
    );
    Ok(network)
}

/// Reads a network from the file at `path`.
///
/// # Errors
/// See [`load`].
pub fn load_from_file(path: impl AsRef<Path>, backend: Arc<dyn Backend>) -> Result<Box<dyn Network>> {
    load(File::open(path)?, backend)
}

/// Like [`load`], also requiring the given input and output shapes.
///
/// # Errors
/// Returns [`NetworkError::Deserialization`] when the stored network has
/// other shapes.
pub fn load_expecting<R: Read>(
    reader: R,
    input: TensorInfo,
    output: TensorInfo,
    backend: Arc<dyn Backend>,
) -> Result<Box<dyn Network>> {
    let network = load(reader, backend)?;
    if network.input_info() != input || network.output_info() != output {
        return Err(NetworkError::deserialization(format!(
            "expected a {input} -> {output} network, found {} -> {}",
            network.input_info(),
            network.output_info()
        )));
    }
    Ok(network)
}

fn encode(network: &dyn Network, w: &mut dyn Write) -> Result<()> {
    let mut e = Encoder(w);
    e.bytes(MAGIC)?;
    e.u8(VERSION)?;
    e.u8(network.network_type() as u8)?;
    match network.as_graph() {
        Some(graph) => encode_graph(&mut e, graph),
        None => {
            let layers = network.layers();
            e.count(layers.len())?;
            layers.into_iter().try_for_each(|layer| e.layer(layer))
        }
    }
}

fn encode_graph(e: &mut Encoder<'_>, graph: &ComputationGraphNetwork) -> Result<()> {
    e.count(graph.nodes().len())?;
    e.info(graph.input_info())?;
    for node in graph.nodes() {
        e.u8(node.tag() as u8)?;
        e.count(node.parents().len())?;
        for parent in node.parents() {
            e.count(parent.index())?;
        }
        if let NodeKind::Processing(layer) = node.kind() {
            e.layer(layer)?;
        }
    }
    Ok(())
}

struct Encoder<'a>(&'a mut dyn Write);

impl Encoder<'_> {
    fn bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.0.write_all(bytes)?;
        Ok(())
    }

    fn u8(&mut self, value: u8) -> Result<()> {
        self.bytes(&[value])
    }

    fn count(&mut self, value: usize) -> Result<()> {
        let value = u32::try_from(value)
            .map_err(|_| NetworkError::InvalidArgument(format!("{value} does not fit the model format")))?;
        self.bytes(&value.to_le_bytes())
    }

    fn info(&mut self, info: TensorInfo) -> Result<()> {
        self.count(info.height)?;
        self.count(info.width)?;
        self.count(info.channels)
    }

    fn floats(&mut self, values: &[f32]) -> Result<()> {
        self.count(values.len())?;
        let mut buffer = Vec::with_capacity(values.len() * 4);
        for v in values {
            buffer.extend_from_slice(&v.to_le_bytes());
        }
        self.bytes(&buffer)
    }

    fn layer(&mut self, layer: &Layer) -> Result<()> {
        self.u8(layer.kind() as u8)?;
        self.info(layer.input_info())?;
        self.info(layer.output_info())?;
        self.u8(layer.activation() as u8)?;
        match layer {
            Layer::Output(output) => self.u8(output.cost_function() as u8)?,
            Layer::Convolutional(conv) => {
                let kernels = conv.kernels_info();
                self.count(kernels.height)?;
                self.count(kernels.width)?;
                self.count(conv.kernels_count())?;
            }
            Layer::FullyConnected(_) | Layer::Pooling(_) => {}
        }
        if let (Some(weights), Some(biases)) = (layer.weights(), layer.biases()) {
            self.floats(weights.data())?;
            self.floats(biases.data())?;
        }
        Ok(())
    }
}

struct Decoder<R>(R);

impl<R: Read> Decoder<R> {
    fn exact<const N: usize>(&mut self, what: &str) -> Result<[u8; N]> {
        let mut buffer = [0; N];
        self.0.read_exact(&mut buffer).map_err(|e| truncated(e, what))?;
        Ok(buffer)
    }

    fn u8(&mut self, what: &str) -> Result<u8> {
        Ok(self.exact::<1>(what)?[0])
    }

    fn count(&mut self, what: &str) -> Result<usize> {
        let value = u32::from_le_bytes(self.exact(what)?) as usize;
        if value > MAX_COUNT {
            return Err(NetworkError::deserialization(format!("{what} of {value} is out of range")));
        }
        Ok(value)
    }

    fn info(&mut self, what: &str) -> Result<TensorInfo> {
        let info = TensorInfo::new(self.count(what)?, self.count(what)?, self.count(what)?);
        match info.checked_size() {
            Some(size) if size <= MAX_COUNT => Ok(info),
            _ => Err(NetworkError::deserialization(format!("{what} of {info} is out of range"))),
        }
    }

    /// Reads a counted `f32` block. The buffer only grows with bytes that
    /// are actually present in the stream.
    fn floats(&mut self, what: &str) -> Result<Vec<f32>> {
        let len = self.count(what)?;
        let mut bytes = Vec::new();
        (&mut self.0).take(len as u64 * 4).read_to_end(&mut bytes)?;
        if bytes.len() != len * 4 {
            return Err(NetworkError::deserialization(format!("stream truncated while reading {what}")));
        }
        Ok(bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect())
    }

    fn layer(&mut self) -> Result<Layer> {
        let kind = LayerKind::try_from(self.u8("layer kind")?)?;
        let input = self.info("layer input")?;
        let output = self.info("layer output")?;
        let activation = ActivationType::try_from(self.u8("activation")?)?;
        let cost = match kind {
            LayerKind::Output => Some(CostFunctionType::try_from(self.u8("cost function")?)?),
            _ => None,
        };
        let kernels = match kind {
            LayerKind::Convolutional => Some(KernelsRecord {
                height: self.count("kernel height")?,
                width: self.count("kernel width")?,
                count: self.count("kernel count")?,
            }),
            _ => None,
        };
        let (weights, biases) = if kind == LayerKind::Pooling {
            (Vec::new(), Vec::new())
        } else {
            (self.floats("weights")?, self.floats("biases")?)
        };
        let record = LayerRecord {
            kind,
            input,
            output,
            activation,
            cost,
            kernels,
            weights,
            biases,
        };
        TrustedData::new(record)
            .map_err(|_| NetworkError::deserialization(format!("inconsistent {kind} layer record")))?
            .into_inner()
            .into_layer()
    }
}

fn truncated(error: io::Error, what: &str) -> NetworkError {
    if error.kind() == io::ErrorKind::UnexpectedEof {
        NetworkError::deserialization(format!("stream truncated while reading {what}"))
    } else {
        NetworkError::Io(error)
    }
}

#[derive(Debug, Clone, Copy)]
struct KernelsRecord {
    height: usize,
    width: usize,
    count: usize,
}

/// A layer as read from a stream, before any invariant is checked.
#[derive(Debug)]
struct LayerRecord {
    kind: LayerKind,
    input: TensorInfo,
    output: TensorInfo,
    activation: ActivationType,
    cost: Option<CostFunctionType>,
    kernels: Option<KernelsRecord>,
    weights: Vec<f32>,
    biases: Vec<f32>,
}

impl Validate for LayerRecord {
    fn validate(&self) -> std::result::Result<(), ValidationError> {
        let (Some(inputs), Some(outputs)) = (self.input.checked_size(), self.output.checked_size()) else {
            return Err(ValidationError);
        };
        if inputs == 0 || outputs == 0 {
            return Err(ValidationError);
        }
        let consistent = match self.kind {
            LayerKind::FullyConnected | LayerKind::Output => {
                inputs.checked_mul(outputs) == Some(self.weights.len()) && self.biases.len() == outputs
            }
            LayerKind::Convolutional => self.kernels.is_some_and(|k| {
                let weights = k
                    .count
                    .checked_mul(self.input.channels)
                    .and_then(|n| n.checked_mul(k.height))
                    .and_then(|n| n.checked_mul(k.width));
                k.height <= self.input.height
                    && k.width <= self.input.width
                    && self.output
                        == TensorInfo::new(self.input.height - k.height + 1, self.input.width - k.width + 1, k.count)
                    && weights == Some(self.weights.len())
                    && self.biases.len() == k.count
            }),
            LayerKind::Pooling => {
                self.output == crate::ops::cpu::pooled_info(self.input)
                    && self.weights.is_empty()
                    && self.biases.is_empty()
            }
        };
        if consistent { Ok(()) } else { Err(ValidationError) }
    }
}

impl LayerRecord {
    fn into_layer(self) -> Result<Layer> {
        let Self {
            kind,
            input,
            output,
            activation,
            cost,
            kernels,
            weights,
            biases,
        } = self;
        let rebuilt = match (kind, cost, kernels) {
            (LayerKind::FullyConnected, _, _) => FullyConnectedLayer::from_parts(
                input,
                Tensor::from_vec(input.size(), output.size(), weights)?,
                Tensor::from_vec(1, output.size(), biases)?,
                activation,
            )
            .map(Layer::FullyConnected),
            (LayerKind::Output, Some(cost), _) => OutputLayer::from_parts(
                input,
                Tensor::from_vec(input.size(), output.size(), weights)?,
                Tensor::from_vec(1, output.size(), biases)?,
                activation,
                cost,
            )
            .map(Layer::Output),
            (LayerKind::Convolutional, _, Some(k)) => ConvolutionalLayer::from_parts(
                input,
                TensorInfo::new(k.height, k.width, input.channels),
                Tensor::from_vec(k.count, input.channels * k.height * k.width, weights)?,
                Tensor::from_vec(1, k.count, biases)?,
                activation,
            )
            .map(Layer::Convolutional),
            (LayerKind::Pooling, _, _) => PoolingLayer::new(input, activation).map(Layer::Pooling),
            _ => return Err(NetworkError::deserialization(format!("incomplete {kind} layer record"))),
        };
        rebuilt.map_err(|e| NetworkError::deserialization(format!("invalid {kind} layer: {e}")))
    }
}

fn decode<R: Read>(d: &mut Decoder<R>, backend: Arc<dyn Backend>) -> Result<Box<dyn Network>> {
    if &d.exact::<4>("magic")? != MAGIC {
        return Err(NetworkError::deserialization("not a model stream"));
    }
    let version = d.u8("version")?;
    if version != VERSION {
        return Err(NetworkError::deserialization(format!("unsupported format version {version}")));
    }
    let network: Box<dyn Network> = match NetworkType::try_from(d.u8("network type")?)? {
        NetworkType::Sequential => {
            let count = d.count("layer count")?;
            let layers = (0..count).map(|_| d.layer()).collect::<Result<Vec<_>>>()?;
            let network = SequentialNetwork::from_layers(layers, backend)
                .map_err(|e| NetworkError::deserialization(format!("invalid network: {e}")))?;
            Box::new(network)
        }
        NetworkType::ComputationGraph => Box::new(decode_graph(d, backend)?),
    };
    let mut trailing = [0; 1];
    if d.0.read(&mut trailing)? != 0 {
        return Err(NetworkError::deserialization("trailing bytes after the model"));
    }
    Ok(network)
}

fn decode_graph<R: Read>(d: &mut Decoder<R>, backend: Arc<dyn Backend>) -> Result<ComputationGraphNetwork> {
    let count = d.count("node count")?;
    let input = d.info("graph input")?;
    if count < 2 || input.checked_size().is_none_or(|size| size == 0) {
        return Err(NetworkError::deserialization("a graph needs an input and an output node"));
    }
    if NodeTag::try_from(d.u8("node tag")?)? != NodeTag::Input || d.count("parent count")? != 0 {
        return Err(NetworkError::deserialization("the first node must be the input node"));
    }
    let invalid = |e: NetworkError| NetworkError::deserialization(format!("invalid graph: {e}"));
    let mut builder = ComputationGraphBuilder::new(input, 0);
    let mut last = builder.input();
    for index in 1..count {
        let tag = NodeTag::try_from(d.u8("node tag")?)?;
        let parents = (0..d.count("parent count")?)
            .map(|_| d.count("parent index").map(NodeId))
            .collect::<Result<Vec<_>>>()?;
        if parents.iter().any(|p| p.index() >= index) {
            return Err(NetworkError::deserialization(format!("node #{index} reads from a later node")));
        }
        last = match (tag, parents.as_slice()) {
            (NodeTag::Processing, &[parent]) => {
                let layer = d.layer()?;
                builder.add_layer(parent, layer).map_err(invalid)?
            }
            (NodeTag::Processing, _) => {
                return Err(NetworkError::deserialization(format!(
                    "processing node #{index} must have exactly one parent"
                )));
            }
            (NodeTag::Sum, _) => builder.sum(&parents).map_err(invalid)?,
            (NodeTag::DepthConcatenation, _) => builder.depth_concatenation(&parents).map_err(invalid)?,
            (NodeTag::Input, _) => {
                return Err(NetworkError::deserialization(format!("node #{index} is a second input")));
            }
        };
    }
    builder.build(last, backend).map_err(invalid)
}
