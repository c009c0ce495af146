//! Serializable loss configuration.

use crate::criterion::{ElementwiseNll, LogSoftmaxNll, NllCriterion};
use crate::error::{LossError, Result};
use crate::loss::{EmptyBatchPolicy, MaskedNllLoss};
use serde::{Deserialize, Serialize};

/// Which per-element criterion to build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriterionKind {
    /// Predictions are already log-probabilities.
    #[default]
    Nll,
    /// Predictions are raw logits.
    LogSoftmaxNll,
}

impl CriterionKind {
    pub fn build(self) -> Box<dyn NllCriterion> {
        match self {
            CriterionKind::Nll => Box::new(ElementwiseNll),
            CriterionKind::LogSoftmaxNll => Box::new(LogSoftmaxNll),
        }
    }
}

fn default_padding_idx() -> i64 {
    -1
}

/// Configuration for [`MaskedNllLoss`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NllLossConfig {
    /// Number of classes.
    pub size: usize,
    #[serde(default = "default_padding_idx")]
    pub padding_idx: i64,
    #[serde(default)]
    pub normalize_length: bool,
    #[serde(default)]
    pub empty_batch: EmptyBatchPolicy,
    #[serde(default)]
    pub criterion: CriterionKind,
}

impl NllLossConfig {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            padding_idx: default_padding_idx(),
            normalize_length: false,
            empty_batch: EmptyBatchPolicy::default(),
            criterion: CriterionKind::default(),
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.size == 0 {
            return Err(LossError::InvalidConfig("size must be > 0".to_string()));
        }
        if (0..self.size as i64).contains(&self.padding_idx) {
            tracing::debug!(
                padding_idx = self.padding_idx,
                "padding index is also a valid class index"
            );
        }
        Ok(())
    }

    pub fn build(&self) -> Result<MaskedNllLoss<Box<dyn NllCriterion>>> {
        self.validate()?;
        Ok(MaskedNllLoss::new(self.size, self.padding_idx)
            .with_normalize_length(self.normalize_length)
            .with_empty_batch(self.empty_batch)
            .with_criterion(self.criterion.build()))
    }
}
