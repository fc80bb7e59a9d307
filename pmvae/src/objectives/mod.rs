//! ELBO estimators.
//!
//! Every estimator returns one lower bound per example `(n)`; training
//! minimizes `-mean(elbo)`. KL terms are Monte Carlo density differences
//! `log q - log p` evaluated on the same draws that back the
//! reconstruction term.

mod config;
mod elbo;
mod partitioned;

pub use config::ElboConfig;
pub use elbo::*;
pub use partitioned::*;

use crate::common::*;

/// An objective scoring each example of a minibatch under model `M`
pub type ObjectiveFn<M> = fn(&M, &[Modality<Tensor>], &ElboConfig) -> Result<Tensor>;
