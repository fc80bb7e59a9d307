//! Distributions behind a single capability trait.
//!
//! Priors, posteriors and likelihoods all implement [`DistributionT`]:
//! `log_prob`, `sample`, and `sample_and_log_prob`, optionally given a
//! context tensor whose rows condition the distribution row by row.
//!
//! - [`StandardNormal`]: unconditional `N(0, I)` prior
//! - [`ConditionalDiagonalGaussian`]: `N(mu(c), diag(sigma(c)^2))`, a
//!   posterior or a prior conditioned on the shared latent
//! - [`IndependentBernoulli`], [`IsotropicGaussian`]: likelihoods whose
//!   decoder network maps latent rows to observation parameters

mod conditional_gaussian;
mod likelihood;
mod standard_normal;
mod traits;

pub use conditional_gaussian::ConditionalDiagonalGaussian;
pub use likelihood::{IndependentBernoulli, IsotropicGaussian};
pub use standard_normal::StandardNormal;
pub use traits::{require_context, DistributionT};
