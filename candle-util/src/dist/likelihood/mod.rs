//! Likelihoods p(x|z) with a decoder network from latent rows to
//! observation parameters.

mod bernoulli;
mod gaussian;

pub use bernoulli::IndependentBernoulli;
pub use gaussian::IsotropicGaussian;
