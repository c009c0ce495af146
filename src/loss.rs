//! Masked negative log-likelihood loss for padded sequence batches.

use crate::autograd::no_grad;
use crate::criterion::{ElementwiseNll, NllCriterion};
use crate::error::{LossError, Result};
use crate::mask::IgnoreMask;
use crate::tensor::Tensor;
use ndarray::{Array1, ArrayView2};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// What to return when the normalization denominator is zero, e.g. an
/// all-padding batch with length normalization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyBatchPolicy {
    /// Divide anyway; the loss is `0 / 0 = NaN`.
    #[default]
    NonFinite,
    /// Return the (zero) masked sum without dividing.
    Zero,
    /// Fail with [`LossError::NoValidTokens`].
    Error,
}

/// Token accounting for one reduction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReductionStats {
    pub batch_size: usize,
    /// Number of non-padding targets.
    pub total: usize,
    /// Number of padding targets.
    pub ignored: usize,
}

#[derive(Debug, Clone)]
pub struct MaskedNllOutput {
    pub loss: Tensor,
    pub stats: ReductionStats,
}

/// NLL loss that skips padding targets.
///
/// Predictions are `[batch, seq_len, size]` log-probabilities (or logits, with
/// [`crate::criterion::LogSoftmaxNll`]); targets are `[batch, seq_len]` class
/// indices where `padding_idx` marks positions to ignore. The masked sum is
/// divided by the number of real tokens when `normalize_length` is set and by
/// the batch size otherwise.
///
/// # Example
///
/// ```
/// use ndarray::array;
/// use seqloss::{MaskedNllLoss, Tensor};
///
/// let loss_fn = MaskedNllLoss::new(3, -1).with_normalize_length(true);
/// let log_probs = Tensor::new(
///     vec![0.7f32.ln(), 0.2f32.ln(), 0.1f32.ln(), 0.1f32.ln(), 0.1f32.ln(), 0.8f32.ln()],
///     vec![1, 2, 3],
/// );
/// let loss = loss_fn.compute(&log_probs, array![[0_i64, -1]].view()).unwrap();
/// assert!((loss.item() + 0.7f32.ln()).abs() < 1e-6);
/// ```
#[derive(Debug, Clone)]
pub struct MaskedNllLoss<C = ElementwiseNll> {
    size: usize,
    padding_idx: i64,
    normalize_length: bool,
    empty_batch: EmptyBatchPolicy,
    criterion: C,
}

impl MaskedNllLoss<ElementwiseNll> {
    /// Creates a loss over `size` classes that ignores `padding_idx`, normalized by batch size.
    pub fn new(size: usize, padding_idx: i64) -> Self {
        Self {
            size,
            padding_idx,
            normalize_length: false,
            empty_batch: EmptyBatchPolicy::default(),
            criterion: ElementwiseNll,
        }
    }
}

impl<C: NllCriterion> MaskedNllLoss<C> {
    pub fn with_normalize_length(mut self, normalize_length: bool) -> Self {
        self.normalize_length = normalize_length;
        self
    }

    pub fn with_empty_batch(mut self, policy: EmptyBatchPolicy) -> Self {
        self.empty_batch = policy;
        self
    }

    /// Replaces the per-element criterion.
    pub fn with_criterion<D: NllCriterion>(self, criterion: D) -> MaskedNllLoss<D> {
        MaskedNllLoss {
            size: self.size,
            padding_idx: self.padding_idx,
            normalize_length: self.normalize_length,
            empty_batch: self.empty_batch,
            criterion,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn padding_idx(&self) -> i64 {
        self.padding_idx
    }

    pub fn normalize_length(&self) -> bool {
        self.normalize_length
    }

    pub fn empty_batch(&self) -> EmptyBatchPolicy {
        self.empty_batch
    }

    pub fn criterion(&self) -> &C {
        &self.criterion
    }

    /// Computes the scalar loss. See [`MaskedNllLoss::forward_with_stats`].
    pub fn compute(&self, predictions: &Tensor, targets: ArrayView2<'_, i64>) -> Result<Tensor> {
        self.forward_with_stats(predictions, targets)
            .map(|output| output.loss)
    }

    /// Computes the scalar loss together with its token counts.
    ///
    /// # Errors
    ///
    /// * [`LossError::PredictionRank`] if predictions are not 3-dimensional.
    /// * [`LossError::ClassDimMismatch`] if the last dimension is not `size`.
    /// * [`LossError::TargetShapeMismatch`] if targets are not `[batch, seq_len]`.
    /// * [`LossError::TargetOutOfRange`] from the criterion for a bad class index.
    /// * [`LossError::CriterionOutputShape`] if the criterion does not return one
    ///   loss per flattened position.
    /// * [`LossError::NoValidTokens`] when the denominator is zero under
    ///   [`EmptyBatchPolicy::Error`].
    pub fn forward_with_stats(
        &self,
        predictions: &Tensor,
        targets: ArrayView2<'_, i64>,
    ) -> Result<MaskedNllOutput> {
        let shape = predictions.shape();
        if shape.len() != 3 {
            return Err(LossError::PredictionRank { actual: shape });
        }
        if shape[2] != self.size {
            return Err(LossError::ClassDimMismatch {
                expected: self.size,
                actual: shape[2],
            });
        }
        if targets.shape() != &shape[..2] {
            return Err(LossError::TargetShapeMismatch {
                expected: shape[..2].to_vec(),
                actual: targets.shape().to_vec(),
            });
        }

        let batch_size = shape[0];
        let rows = shape[0] * shape[1];
        let scores = predictions.reshape(vec![rows, self.size]);
        // Logical iteration order is row-major regardless of memory layout.
        let flat_targets: Array1<i64> = targets.iter().copied().collect();

        let (ignore, sanitized) = no_grad(|| {
            let ignore = IgnoreMask::from_targets(flat_targets.view(), self.padding_idx);
            let sanitized = ignore.sanitize(flat_targets.view());
            (ignore, sanitized)
        });
        let stats = ReductionStats {
            batch_size,
            total: ignore.kept(),
            ignored: ignore.ignored(),
        };

        let per_token = self.criterion.forward(&scores, sanitized.view())?;
        if per_token.shape() != [rows] {
            return Err(LossError::CriterionOutputShape {
                expected: vec![rows],
                actual: per_token.shape(),
            });
        }
        let summed = per_token.masked_fill(ignore.as_array(), 0.0).sum();

        let denom = if self.normalize_length {
            stats.total
        } else {
            stats.batch_size
        };
        let loss = if denom == 0 {
            match self.empty_batch {
                EmptyBatchPolicy::NonFinite => {
                    warn!(
                        batch_size,
                        normalize_length = self.normalize_length,
                        "masked nll has a zero denominator, loss is not finite"
                    );
                    summed / 0.0
                }
                EmptyBatchPolicy::Zero => {
                    warn!(batch_size, "masked nll has no valid tokens, returning zero loss");
                    summed
                }
                EmptyBatchPolicy::Error => return Err(LossError::NoValidTokens),
            }
        } else {
            summed / denom as f32
        };

        debug!(
            criterion = self.criterion.name(),
            batch_size,
            total = stats.total,
            ignored = stats.ignored,
            loss = loss.item(),
            "masked nll reduced"
        );

        Ok(MaskedNllOutput { loss, stats })
    }
}
