//! Error taxonomy shared by kernels, layers, networks and the trainer.
//!
//! Shape and topology violations are programmer or model-definition bugs and
//! are returned as soon as a kernel or constructor sees them. Numeric overflow
//! and cancellation are not errors: they end a training session with a
//! [`StopReason`](crate::training::StopReason).

use thiserror::Error;

/// Every failure the crate can report.
#[derive(Error, Debug)]
pub enum NetworkError {
    /// Two operands have incompatible dimensions.
    #[error("shape mismatch in '{operation}': expected {expected}, got {got}")]
    ShapeMismatch {
        /// The kernel or constructor that rejected the operands.
        operation: &'static str,
        /// The shape that was required.
        expected: String,
        /// The shape that was provided.
        got: String,
    },

    /// A single operand has a shape the operation cannot work with.
    #[error("invalid shape in '{operation}': {reason}")]
    InvalidShape {
        /// The kernel or constructor that rejected the operand.
        operation: &'static str,
        /// Human readable explanation.
        reason: String,
    },

    /// A parameter value is outside of its domain.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The layers or graph nodes do not form a valid network.
    #[error("invalid network topology: {0}")]
    InvalidTopology(String),

    /// A parallel loop did not run to completion.
    #[error("computation failed: {0}")]
    Computation(String),

    /// A persisted model could not be decoded.
    #[error("deserialization failed: {0}")]
    Deserialization(String),

    /// A training configuration is malformed.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Underlying I/O failure while reading or writing a stream.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding failure.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl NetworkError {
    pub(crate) fn shape_mismatch(
        operation: &'static str,
        expected: impl ToString,
        got: impl ToString,
    ) -> Self {
        Self::ShapeMismatch {
            operation,
            expected: expected.to_string(),
            got: got.to_string(),
        }
    }

    pub(crate) fn invalid_shape(operation: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidShape {
            operation,
            reason: reason.into(),
        }
    }

    pub(crate) fn deserialization(reason: impl Into<String>) -> Self {
        Self::Deserialization(reason.into())
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, NetworkError>;
