//! # Training sessions
//!
//! [`train`] drives a network through epochs of mini-batches:
//!
//! 1. the batches are reshuffled with the collection's seeded generator;
//! 2. every batch is backpropagated, after checking the optional
//!    [`CancellationToken`];
//! 3. the weights are checked for NaN or infinite values;
//! 4. the validation set, if any, is evaluated and fed to the
//!    [`RelativeConvergence`] detector;
//! 5. the test set, if any, is evaluated and reported.
//!
//! Overflow, convergence and cancellation end the session with the
//! corresponding [`StopReason`] instead of an error.
//!
//! ```rust
//! use neural_cpu::backend::default_backend;
//! use neural_cpu::functions::{ActivationType, CostFunctionType};
//! use neural_cpu::layers::LayerSpec;
//! use neural_cpu::network::SequentialNetwork;
//! use neural_cpu::optim::TrainingAlgorithm;
//! use neural_cpu::tensors::TensorInfo;
//! use neural_cpu::training::{BatchesCollection, StopReason, train};
//! use rand::SeedableRng;
//!
//! let mut rng = rand::rngs::StdRng::seed_from_u64(7);
//! let specs = [
//!     LayerSpec::fully_connected(4, ActivationType::Tanh),
//!     LayerSpec::output(1, ActivationType::Sigmoid, CostFunctionType::CrossEntropy),
//! ];
//! let mut network = SequentialNetwork::new(TensorInfo::linear(2), &specs, &mut rng, default_backend())?;
//! let x = [[0.0_f32, 0.0], [0.0, 1.0], [1.0, 0.0], [1.0, 1.0]];
//! let y = [[0.0_f32], [1.0], [1.0], [0.0]];
//! let mut batches = BatchesCollection::from_samples(&x, &y, 2)?.with_seed(1);
//! let result = train(
//!     &mut network,
//!     &mut batches,
//!     5,
//!     0.0,
//!     &TrainingAlgorithm::sgd(0.5, 0.0),
//!     None,
//!     None,
//!     None,
//!     None,
//! )?;
//! assert_eq!(result.stop_reason, StopReason::EpochsCompleted);
//! # Ok::<(), neural_cpu::NetworkError>(())
//! ```

mod batches;
mod cancellation;
mod convergence;
mod dataset;
mod result;

pub use self::batches::BatchesCollection;
pub use self::cancellation::CancellationToken;
pub use self::convergence::{ConvergenceMetric, RelativeConvergence};
pub use self::dataset::Dataset;
pub use self::result::{DatasetRole, StopReason, TrainingProgress, TrainingSessionResult};

use crate::error::{NetworkError, Result};
use crate::network::{Evaluation, Network, check_dropout};
use crate::optim::TrainingAlgorithm;
use std::time::Instant;

/// A validation set and the detector it feeds.
#[derive(Debug, Clone)]
pub struct Validation<'a> {
    /// Samples evaluated after every epoch.
    pub dataset: &'a Dataset,
    /// Early stopping rule, `None` to only report.
    pub convergence: Option<RelativeConvergence>,
}

impl<'a> Validation<'a> {
    /// Validation with early stopping.
    #[must_use]
    pub const fn new(dataset: &'a Dataset, convergence: RelativeConvergence) -> Self {
        Self {
            dataset,
            convergence: Some(convergence),
        }
    }

    /// Validation reports without early stopping.
    #[must_use]
    pub const fn report_only(dataset: &'a Dataset) -> Self {
        Self {
            dataset,
            convergence: None,
        }
    }
}

fn evaluate_and_report(
    network: &dyn Network,
    dataset: &Dataset,
    epoch: usize,
    role: DatasetRole,
    progress: Option<&dyn Fn(TrainingProgress)>,
) -> Result<TrainingProgress> {
    let evaluation = dataset.evaluate(network)?;
    let report = TrainingProgress {
        epoch,
        cost: evaluation.cost,
        accuracy: evaluation.accuracy,
        dataset: role,
    };
    log::info!(
        "epoch {epoch}: {role:?} cost {:.6}, accuracy {:.2}%",
        report.cost,
        report.accuracy * 100.0
    );
    if let Some(callback) = progress {
        callback(report);
    }
    Ok(report)
}

/// Trains `network` on `batches` for up to `epochs` epochs.
///
/// `dropout` is the drop probability of hidden fully-connected activations.
/// One updater, with its accumulators, is created from `algorithm` for the
/// whole session and dropped when it ends.
///
/// # Errors
/// Returns [`NetworkError::InvalidArgument`] for invalid hyperparameters,
/// a shape error when the samples don't match the network, and any error of
/// a backpropagation step. The network keeps the updates of the batches that
/// completed before the error.
#[allow(clippy::too_many_arguments)]
pub fn train(
    network: &mut dyn Network,
    batches: &mut BatchesCollection,
    epochs: usize,
    dropout: f32,
    algorithm: &TrainingAlgorithm,
    progress: Option<&dyn Fn(TrainingProgress)>,
    validation: Option<Validation<'_>>,
    test: Option<&Dataset>,
    token: Option<&CancellationToken>,
) -> Result<TrainingSessionResult> {
    check_dropout(dropout)?;
    if batches.input_length() != network.input_info().size() || batches.output_length() != network.output_info().size()
    {
        return Err(NetworkError::shape_mismatch(
            "train",
            format!("samples of {} -> {} values", network.input_info().size(), network.output_info().size()),
            format!("samples of {} -> {} values", batches.input_length(), batches.output_length()),
        ));
    }
    let updater = algorithm.create_updater(&*network)?;
    let (validation_set, mut convergence) = match validation {
        Some(v) => (Some(v.dataset), v.convergence),
        None => (None, None),
    };
    log::info!(
        "training {} network ({} parameters) on {} samples in {} batches for {epochs} epochs with {:?}",
        network.network_type(),
        network.parameters_count(),
        batches.samples(),
        batches.len(),
        algorithm
    );

    let start = Instant::now();
    let mut result = TrainingSessionResult {
        stop_reason: StopReason::EpochsCompleted,
        completed_epochs: 0,
        elapsed: start.elapsed(),
        validation_reports: Vec::new(),
        test_reports: Vec::new(),
    };
    'epochs: for epoch in 1..=epochs {
        batches.shuffle();
        let (list, rng) = batches.batches_and_rng();
        let count = list.len();
        for (i, batch) in list.iter().enumerate() {
            if token.is_some_and(CancellationToken::is_canceled) {
                log::warn!("training canceled during epoch {epoch}, before batch {}/{count}", i + 1);
                result.stop_reason = StopReason::TrainingCanceled;
                break 'epochs;
            }
            network.backpropagate(batch, dropout, rng, updater.as_ref())?;
            log::debug!("epoch {epoch}: batch {}/{count} done", i + 1);
        }
        result.completed_epochs = epoch;

        if network.is_in_numeric_overflow() {
            log::warn!("numeric overflow in the network weights after epoch {epoch}");
            result.stop_reason = StopReason::NumericOverflow;
            break;
        }

        let mut converged = false;
        if let Some(dataset) = validation_set {
            let report = evaluate_and_report(&*network, dataset, epoch, DatasetRole::Validation, progress)?;
            result.validation_reports.push(report);
            if let Some(detector) = convergence.as_mut() {
                converged = detector.update(&Evaluation {
                    cost: report.cost,
                    accuracy: report.accuracy,
                });
            }
        }
        if let Some(dataset) = test {
            let report = evaluate_and_report(&*network, dataset, epoch, DatasetRole::Test, progress)?;
            result.test_reports.push(report);
        }
        if converged {
            log::info!("validation metric converged after epoch {epoch}");
            result.stop_reason = StopReason::EarlyStopping;
            break;
        }
    }
    drop(updater);

    result.elapsed = start.elapsed();
    log::info!(
        "training ended ({}) after {} epochs in {:.2?}",
        result.stop_reason,
        result.completed_epochs,
        result.elapsed
    );
    Ok(result)
}
