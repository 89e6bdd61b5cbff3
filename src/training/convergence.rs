use crate::error::{NetworkError, Result};
use crate::network::Evaluation;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// The validation value watched by a [`RelativeConvergence`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvergenceMetric {
    /// Validation accuracy.
    #[default]
    Accuracy,
    /// Validation cost.
    Cost,
}

impl ConvergenceMetric {
    /// Picks the watched value out of an evaluation.
    #[must_use]
    pub const fn value(self, evaluation: &Evaluation) -> f32 {
        match self {
            Self::Accuracy => evaluation.accuracy,
            Self::Cost => evaluation.cost,
        }
    }
}

/// Detects when a metric stops moving over a sliding window of epochs.
///
/// The detector keeps the last `epochs` values and reports convergence once
/// the window is full and `(max − min) / max(|max|, 1e-6) ≤ tolerance`.
#[derive(Debug, Clone, PartialEq)]
pub struct RelativeConvergence {
    tolerance: f32,
    epochs: usize,
    metric: ConvergenceMetric,
    window: VecDeque<f32>,
}

impl RelativeConvergence {
    /// Watches validation accuracy over windows of `epochs` epochs.
    ///
    /// # Errors
    /// Returns [`NetworkError::InvalidArgument`] for a negative or non finite
    /// tolerance, or a window shorter than two epochs.
    pub fn new(tolerance: f32, epochs: usize) -> Result<Self> {
        if !tolerance.is_finite() || tolerance < 0.0 {
            return Err(NetworkError::InvalidArgument(format!(
                "convergence tolerance must be a non negative number, got {tolerance}"
            )));
        }
        if epochs < 2 {
            return Err(NetworkError::InvalidArgument(format!(
                "a convergence window spans at least 2 epochs, got {epochs}"
            )));
        }
        Ok(Self {
            tolerance,
            epochs,
            metric: ConvergenceMetric::Accuracy,
            window: VecDeque::with_capacity(epochs),
        })
    }

    /// Watches `metric` instead of accuracy.
    #[must_use]
    pub fn with_metric(mut self, metric: ConvergenceMetric) -> Self {
        self.metric = metric;
        self
    }

    /// The watched metric.
    #[must_use]
    pub const fn metric(&self) -> ConvergenceMetric {
        self.metric
    }

    /// The relative tolerance.
    #[must_use]
    pub const fn tolerance(&self) -> f32 {
        self.tolerance
    }

    /// The window length, in epochs.
    #[must_use]
    pub const fn epochs(&self) -> usize {
        self.epochs
    }

    /// Records the metric of a new epoch and returns whether it converged.
    pub fn update(&mut self, evaluation: &Evaluation) -> bool {
        self.push(self.metric.value(evaluation))
    }

    /// Records a raw value and returns whether the window converged.
    pub fn push(&mut self, value: f32) -> bool {
        if self.window.len() == self.epochs {
            self.window.pop_front();
        }
        self.window.push_back(value);
        self.has_converged()
    }

    /// Whether the current window is full and flat within the tolerance.
    #[must_use]
    pub fn has_converged(&self) -> bool {
        if self.window.len() < self.epochs {
            return false;
        }
        let (min, max) = self
            .window
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        (max - min) / max.abs().max(1e-6) <= self.tolerance
    }

    /// Forgets every recorded value.
    pub fn reset(&mut self) {
        self.window.clear();
    }
}
