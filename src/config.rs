//! Training session settings read from JSON.
//!
//! ```json
//! {
//!   "algorithm": { "type": "momentum", "learning_rate": 0.1, "momentum": 0.9 },
//!   "dropout": 0.2,
//!   "batch_size": 32,
//!   "epochs": 40,
//!   "seed": 7,
//!   "threads": 4,
//!   "convergence": { "tolerance": 0.01, "epochs": 5, "metric": "cost" }
//! }
//! ```
//!
//! Only `algorithm`, `batch_size` and `epochs` are required.

use crate::backend::{Backend, CpuBackend, default_backend};
use crate::error::{NetworkError, Result};
use crate::network::check_dropout;
use crate::optim::TrainingAlgorithm;
use crate::tensors::Tensor;
use crate::training::{BatchesCollection, ConvergenceMetric, RelativeConvergence};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::sync::Arc;

/// Early stopping settings.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConvergenceConfig {
    /// Relative tolerance of the watched metric.
    pub tolerance: f32,
    /// Window length in epochs.
    pub epochs: usize,
    /// Watched validation metric.
    #[serde(default)]
    pub metric: ConvergenceMetric,
}

/// Settings of one training session.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrainingConfig {
    /// Update rule.
    pub algorithm: TrainingAlgorithm,
    /// Drop probability of hidden fully-connected activations.
    #[serde(default)]
    pub dropout: f32,
    /// Samples per mini-batch.
    pub batch_size: usize,
    /// Maximum number of epochs.
    pub epochs: usize,
    /// Seed of the shuffling and dropout generator.
    #[serde(default)]
    pub seed: u64,
    /// Worker threads, the global rayon pool when absent.
    #[serde(default)]
    pub threads: Option<usize>,
    /// Early stopping on the validation set.
    #[serde(default)]
    pub convergence: Option<ConvergenceConfig>,
}

impl TrainingConfig {
    /// Parses and validates a JSON document.
    ///
    /// # Errors
    /// Returns [`NetworkError::Config`] for malformed JSON or invalid values.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| NetworkError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every value against its domain.
    ///
    /// # Errors
    /// Returns [`NetworkError::Config`] naming the first bad value.
    pub fn validate(&self) -> Result<()> {
        let config_error = |e: NetworkError| match e {
            NetworkError::InvalidArgument(reason) => NetworkError::Config(reason),
            other => other,
        };
        self.algorithm.validate().map_err(config_error)?;
        check_dropout(self.dropout).map_err(config_error)?;
        if self.batch_size == 0 {
            return Err(NetworkError::Config("batch_size must be at least 1".into()));
        }
        if self.epochs == 0 {
            return Err(NetworkError::Config("epochs must be at least 1".into()));
        }
        if self.threads == Some(0) {
            return Err(NetworkError::Config("threads must be at least 1".into()));
        }
        self.convergence().map_err(config_error)?;
        Ok(())
    }

    /// The early stopping detector, if configured.
    ///
    /// # Errors
    /// Returns [`NetworkError::InvalidArgument`] for an invalid window.
    pub fn convergence(&self) -> Result<Option<RelativeConvergence>> {
        self.convergence
            .map(|c| Ok(RelativeConvergence::new(c.tolerance, c.epochs)?.with_metric(c.metric)))
            .transpose()
    }

    /// A CPU backend with the configured thread count.
    ///
    /// # Errors
    /// Returns [`NetworkError::Computation`] if the pool cannot be spawned.
    pub fn backend(&self) -> Result<Arc<dyn Backend>> {
        match self.threads {
            Some(threads) => Ok(Arc::new(CpuBackend::with_threads(threads)?)),
            None => Ok(default_backend()),
        }
    }

    /// Splits `x`/`y` into seeded batches of the configured size.
    ///
    /// # Errors
    /// Fails when `x` and `y` have different entity counts.
    pub fn batches(&self, x: Tensor, y: Tensor) -> Result<BatchesCollection> {
        Ok(BatchesCollection::from_tensors(x, y, self.batch_size)?.with_seed(self.seed))
    }
}

/// Reads and validates a [`TrainingConfig`] from a JSON file.
///
/// # Errors
/// Returns [`NetworkError::Io`] if the file can't be read and
/// [`NetworkError::Config`] if its content is invalid.
pub fn load_config(path: impl AsRef<Path>) -> Result<TrainingConfig> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;
    let config = TrainingConfig::from_json(&contents).map_err(|e| match e {
        NetworkError::Config(reason) => NetworkError::Config(format!("{}: {reason}", path.display())),
        other => other,
    })?;
    log::debug!("loaded training config from {}", path.display());
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_uses_defaults() {
        let config = TrainingConfig::from_json(
            r#"{ "algorithm": { "type": "stochastic_gradient_descent", "learning_rate": 0.5 },
                 "batch_size": 10, "epochs": 3 }"#,
        )
        .unwrap();
        assert_eq!(config.algorithm, TrainingAlgorithm::sgd(0.5, 0.0));
        assert_eq!(config.dropout, 0.0);
        assert_eq!(config.seed, 0);
        assert!(config.threads.is_none());
        assert!(config.convergence().unwrap().is_none());
    }

    #[test]
    fn full_config() {
        let config = TrainingConfig::from_json(
            r#"{ "algorithm": { "type": "adam", "learning_rate": 0.01, "beta1": 0.9, "beta2": 0.99, "epsilon": 1e-7 },
                 "dropout": 0.25, "batch_size": 4, "epochs": 20, "seed": 11, "threads": 2,
                 "convergence": { "tolerance": 0.05, "epochs": 3, "metric": "cost" } }"#,
        )
        .unwrap();
        let detector = config.convergence().unwrap().unwrap();
        assert_eq!(detector.metric(), ConvergenceMetric::Cost);
        assert_eq!(detector.epochs(), 3);
        assert_eq!(config.threads, Some(2));
        assert!(matches!(config.algorithm, TrainingAlgorithm::Adam { .. }));
    }

    #[test]
    fn invalid_values_are_config_errors() {
        for json in [
            r#"{ "algorithm": { "type": "adadelta", "rho": 0.9, "epsilon": 1e-6 }, "batch_size": 0, "epochs": 1 }"#,
            r#"{ "algorithm": { "type": "adadelta", "rho": 0.9, "epsilon": 1e-6 }, "batch_size": 1, "epochs": 1, "dropout": 1.0 }"#,
            r#"{ "algorithm": { "type": "stochastic_gradient_descent", "learning_rate": -1.0 }, "batch_size": 1, "epochs": 1 }"#,
            r#"{ "algorithm": { "type": "adadelta", "rho": 0.9, "epsilon": 1e-6 }, "batch_size": 1, "epochs": 1,
                 "convergence": { "tolerance": 0.1, "epochs": 1 } }"#,
            r#"{ "algorithm": { "type": "adadelta", "rho": 0.9, "epsilon": 1e-6 }, "batch_size": 1, "epochs": 1, "extra": 4 }"#,
            r#"{ "algorithm": { "type": "rmsprop" }, "batch_size": 1, "epochs": 1 }"#,
        ] {
            assert!(
                matches!(TrainingConfig::from_json(json), Err(NetworkError::Config(_))),
                "{json}"
            );
        }
    }

    #[test]
    fn load_reports_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("training.json");
        fs::write(&path, r#"{ "algorithm": { "type": "adadelta", "rho": 0.9, "epsilon": 1e-6 }, "batch_size": 1, "epochs": 0 }"#)
            .unwrap();
        match load_config(&path) {
            Err(NetworkError::Config(reason)) => assert!(reason.contains("training.json"), "{reason}"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(load_config(dir.path().join("missing.json")), Err(NetworkError::Io(_))));
    }
}
