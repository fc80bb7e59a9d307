use candle_core::{Result, Tensor};
use candle_nn::{ops, Module};

use crate::candle_loss_functions::bernoulli_log_likelihood;
use crate::dist::traits::{require_context, DistributionT};

/// p(x|z) = prod_w Bernoulli(x_w; sigmoid(f(z)_w))
///
/// The decoder `f` maps latent rows `(n, h)` to logits `(n, d)`.
pub struct IndependentBernoulli {
    dim: usize,
    decoder: Box<dyn Module>,
}

impl IndependentBernoulli {
    pub fn new(dim: usize, decoder: Box<dyn Module>) -> Self {
        Self { dim, decoder }
    }

    pub fn logits(&self, z_nh: &Tensor) -> Result<Tensor> {
        self.decoder.forward(z_nh)
    }
}

impl DistributionT for IndependentBernoulli {
    fn dim(&self) -> usize {
        self.dim
    }

    fn log_prob(&self, x_nd: &Tensor, context: Option<&Tensor>) -> Result<Tensor> {
        let z_nh = require_context(context, "bernoulli log_prob")?;
        bernoulli_log_likelihood(x_nd, &self.logits(z_nh)?)
    }

    /// Binary draws `(n, k, d)`
    fn sample(&self, num_samples: usize, context: Option<&Tensor>) -> Result<Tensor> {
        let z_nh = require_context(context, "bernoulli sample")?;
        let prob_n1d = ops::sigmoid(&self.logits(z_nh)?)?.unsqueeze(1)?;
        let (n, _, d) = prob_n1d.dims3()?;
        let u_nkd = Tensor::rand(0f32, 1f32, (n, num_samples, d), z_nh.device())?
            .to_dtype(prob_n1d.dtype())?;
        u_nkd.broadcast_lt(&prob_n1d)?.to_dtype(prob_n1d.dtype())
    }

    /// Success probabilities
    fn mean(&self, context: Option<&Tensor>) -> Result<Tensor> {
        let z_nh = require_context(context, "bernoulli mean")?;
        ops::sigmoid(&self.logits(z_nh)?)
    }

    fn is_conditional(&self) -> bool {
        true
    }
}
