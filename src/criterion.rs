//! Per-element negative log-likelihood criteria.
//!
//! A criterion turns `[N, C]` scores and `N` class indices into `N` unreduced
//! losses. Reduction and masking are left to the caller.

use crate::error::{LossError, Result};
use crate::tensor::Tensor;
use ndarray::ArrayView1;

/// Trait for per-element NLL criteria.
pub trait NllCriterion {
    /// Computes one loss value per row of `scores`, differentiable with respect to `scores`.
    fn forward(&self, scores: &Tensor, targets: ArrayView1<'_, i64>) -> Result<Tensor>;

    fn name(&self) -> &str;
}

impl<C: NllCriterion + ?Sized> NllCriterion for Box<C> {
    fn forward(&self, scores: &Tensor, targets: ArrayView1<'_, i64>) -> Result<Tensor> {
        (**self).forward(scores, targets)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

fn check_targets(targets: ArrayView1<'_, i64>, num_classes: usize) -> Result<()> {
    match targets
        .iter()
        .position(|&t| t < 0 || t as usize >= num_classes)
    {
        Some(position) => Err(LossError::TargetOutOfRange {
            position,
            value: targets[position],
            num_classes,
        }),
        None => Ok(()),
    }
}

fn check_rows(scores: &Tensor, targets: ArrayView1<'_, i64>) -> Result<usize> {
    let shape = scores.shape();
    if shape.len() != 2 {
        return Err(LossError::ScoresRank { actual: shape });
    }
    if shape[0] != targets.len() {
        return Err(LossError::TargetShapeMismatch {
            expected: vec![shape[0]],
            actual: vec![targets.len()],
        });
    }
    Ok(shape[1])
}

/// Plain NLL on log-probabilities: `loss[i] = -scores[i, targets[i]]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ElementwiseNll;

impl NllCriterion for ElementwiseNll {
    fn forward(&self, scores: &Tensor, targets: ArrayView1<'_, i64>) -> Result<Tensor> {
        let num_classes = check_rows(scores, targets)?;
        check_targets(targets, num_classes)?;
        Ok(scores.nll(targets))
    }

    fn name(&self) -> &str {
        "nll"
    }
}

/// NLL over raw logits: applies `log_softmax` along the class axis first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogSoftmaxNll;

impl NllCriterion for LogSoftmaxNll {
    fn forward(&self, scores: &Tensor, targets: ArrayView1<'_, i64>) -> Result<Tensor> {
        let num_classes = check_rows(scores, targets)?;
        check_targets(targets, num_classes)?;
        Ok(scores.log_softmax(1).nll(targets))
    }

    fn name(&self) -> &str {
        "log_softmax_nll"
    }
}
