pub mod autograd;
pub mod config;
pub mod criterion;
pub mod loss;
pub mod mask;
pub mod tensor;
mod error;

pub use autograd::{is_grad_enabled, no_grad, set_grad_enabled, NoGradGuard};
pub use config::{CriterionKind, NllLossConfig};
pub use criterion::{ElementwiseNll, LogSoftmaxNll, NllCriterion};
pub use error::*;
pub use loss::{EmptyBatchPolicy, MaskedNllLoss, MaskedNllOutput, ReductionStats};
pub use mask::IgnoreMask;
pub use tensor::Tensor;
