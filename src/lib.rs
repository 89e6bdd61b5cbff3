//! neural_cpu: a parallel CPU neural network engine.
//!
//! Hand-written numeric kernels over flat `f32` tensors, a closed set of
//! layers with explicit forward and backward passes, sequential and
//! computation-graph networks, four optimizers and a mini-batch training
//! driver with early stopping, overflow detection and cancellation.
//!
//! # Features
//!
//! - Fully connected, convolutional, 2×2 max-pooling and output layers.
//! - Branching graphs with sum and depth-concatenation merge nodes.
//! - SGD, momentum, Adadelta and Adam updaters.
//! - Binary model files, optionally gzipped, and JSON metadata export.
//!
//! # Modules
//!
//! - [`tensors`]: tensor buffers, views and sample batches.
//! - [`ops`]: the CPU kernels.
//! - [`backend`]: the kernel table networks execute through.
//! - [`functions`]: activations and cost functions.
//! - [`layers`]: layer specifications and concrete layers.
//! - [`network`]: sequential and graph networks.
//! - [`optim`]: weight-update rules.
//! - [`training`]: datasets, batches and the training loop.
//! - [`modelio`]: saving and loading trained networks.
//! - [`config`]: training settings read from JSON.
//!
//! # Example
//!
//! ```rust
//! use neural_cpu::backend::default_backend;
//! use neural_cpu::functions::ActivationType;
//! use neural_cpu::layers::LayerSpec;
//! use neural_cpu::network::{Network, SequentialNetwork};
//! use neural_cpu::tensors::{Tensor, TensorInfo};
//! use rand::SeedableRng;
//!
//! let mut rng = rand::rngs::StdRng::seed_from_u64(3);
//! let specs = [
//!     LayerSpec::fully_connected(8, ActivationType::ReLU),
//!     LayerSpec::softmax(3),
//! ];
//! let network = SequentialNetwork::new(TensorInfo::linear(4), &specs, &mut rng, default_backend())?;
//! let x = Tensor::from_rows(&[[0.1_f32, 0.2, 0.3, 0.4]])?;
//! let y = network.forward(x.view())?;
//! assert_eq!((y.entities(), y.length()), (1, 3));
//! # Ok::<(), neural_cpu::NetworkError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod approx;
pub mod backend;
pub mod config;
pub mod error;
pub mod functions;
pub mod layers;
pub mod modelio;
pub mod network;
pub mod ops;
pub mod optim;
pub mod tensors;
pub mod training;

pub use error::{NetworkError, Result};
