//! Padding mask derived from target indices.

use ndarray::{Array1, ArrayD, ArrayView1};

/// Boolean mask over flattened targets, `true` where the target is padding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IgnoreMask {
    mask: ArrayD<bool>,
    ignored: usize,
}

impl IgnoreMask {
    /// Compares every target against `padding_idx`.
    pub fn from_targets(targets: ArrayView1<'_, i64>, padding_idx: i64) -> Self {
        let mask = targets.mapv(|t| t == padding_idx).into_dyn();
        let ignored = mask.iter().filter(|&&m| m).count();
        Self { mask, ignored }
    }

    /// Number of padding positions.
    pub fn ignored(&self) -> usize {
        self.ignored
    }

    /// Number of positions that contribute to the loss.
    pub fn kept(&self) -> usize {
        self.mask.len() - self.ignored
    }

    pub fn len(&self) -> usize {
        self.mask.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mask.is_empty()
    }

    pub fn as_array(&self) -> &ArrayD<bool> {
        &self.mask
    }

    /// Copies `targets` with every padding position replaced by class `0`,
    /// so the NLL kernel never indexes with the sentinel.
    pub fn sanitize(&self, targets: ArrayView1<'_, i64>) -> Array1<i64> {
        assert_eq!(targets.len(), self.len(), "mask length must match targets");
        let mut sanitized = targets.to_owned();
        for (t, &m) in sanitized.iter_mut().zip(self.mask.iter()) {
            if m {
                *t = 0;
            }
        }
        sanitized
    }
}
