use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Why a training session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Every requested epoch ran.
    EpochsCompleted,
    /// The validation metric converged.
    EarlyStopping,
    /// A weight or bias became NaN or infinite.
    NumericOverflow,
    /// The cancellation token was triggered.
    TrainingCanceled,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::EpochsCompleted => "epochs completed",
            Self::EarlyStopping => "early stopping",
            Self::NumericOverflow => "numeric overflow",
            Self::TrainingCanceled => "training canceled",
        })
    }
}

/// Which held-out set a [`TrainingProgress`] was measured on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetRole {
    /// The set driving early stopping.
    Validation,
    /// The set only reported on.
    Test,
}

/// Evaluation of the network at the end of an epoch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrainingProgress {
    /// 1-based epoch number.
    pub epoch: usize,
    /// Average cost per sample.
    pub cost: f32,
    /// Fraction of correctly classified samples.
    pub accuracy: f32,
    /// The dataset measured.
    pub dataset: DatasetRole,
}

/// Outcome of [`train`](super::train).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainingSessionResult {
    /// Terminal state of the session.
    pub stop_reason: StopReason,
    /// Epochs whose batches all ran.
    pub completed_epochs: usize,
    /// Wall time of the session.
    pub elapsed: Duration,
    /// One report per evaluated epoch.
    pub validation_reports: Vec<TrainingProgress>,
    /// One report per evaluated epoch.
    pub test_reports: Vec<TrainingProgress>,
}

impl TrainingSessionResult {
    /// The last test report, if any.
    #[must_use]
    pub fn last_test_report(&self) -> Option<&TrainingProgress> {
        self.test_reports.last()
    }

    /// The last validation report, if any.
    #[must_use]
    pub fn last_validation_report(&self) -> Option<&TrainingProgress> {
        self.validation_reports.last()
    }
}
