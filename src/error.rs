//! Error types for loss computation.

use thiserror::Error;

/// Errors returned by the masked NLL loss and its configuration.
#[derive(Debug, Error)]
pub enum LossError {
    /// The class dimension of the predictions does not match the configured size.
    #[error("class dimension mismatch: expected {expected}, got {actual}")]
    ClassDimMismatch { expected: usize, actual: usize },

    /// Predictions must be `[batch, seq_len, num_classes]`.
    #[error("predictions must be 3-dimensional, got shape {actual:?}")]
    PredictionRank { actual: Vec<usize> },

    /// Criterion scores must be `[rows, num_classes]`.
    #[error("criterion scores must be 2-dimensional, got shape {actual:?}")]
    ScoresRank { actual: Vec<usize> },

    /// A criterion returned something other than one loss per row.
    #[error("criterion output shape mismatch: expected {expected:?}, got {actual:?}")]
    CriterionOutputShape {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("target shape mismatch: expected {expected:?}, got {actual:?}")]
    TargetShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// A non-padding target is not a valid class index.
    #[error("target {value} at position {position} is outside [0, {num_classes})")]
    TargetOutOfRange {
        position: usize,
        value: i64,
        num_classes: usize,
    },

    /// Every target in the batch is padding and the policy forbids an empty reduction.
    #[error("no valid (non-padding) targets in batch")]
    NoValidTokens,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, LossError>;
