use candle_core::{Result, Tensor};
use candle_nn::Module;

use super::traits::{require_context, DistributionT};
use crate::candle_loss_functions::{gaussian_log_density, gaussian_noise_log_density};

const MIN_LOG_STD: f64 = -8.;
const MAX_LOG_STD: f64 = 8.;

/// Diagonal Gaussian whose parameters are computed from a context:
/// `[mu, log_sigma] = f(c)`. Without a context encoder the context
/// itself holds `[mu, log_sigma]` (e.g., the output of a multimodal
/// encoder).
pub struct ConditionalDiagonalGaussian {
    dim: usize,
    context_encoder: Option<Box<dyn Module>>,
}

impl ConditionalDiagonalGaussian {
    /// * `dim` - latent dimension
    /// * `context_encoder` - maps context rows to `2 * dim` parameters
    pub fn new(dim: usize, context_encoder: Option<Box<dyn Module>>) -> Self {
        Self {
            dim,
            context_encoder,
        }
    }

    /// Mean and log standard deviation, each `(n, dim)`
    pub fn params(&self, context: &Tensor) -> Result<(Tensor, Tensor)> {
        let params = match &self.context_encoder {
            Some(encoder) => encoder.forward(context)?,
            None => context.clone(),
        };
        let last = params.rank() - 1;
        if params.dim(last)? != 2 * self.dim {
            candle_core::bail!(
                "expected {} Gaussian parameters per row, found {}",
                2 * self.dim,
                params.dim(last)?
            );
        }
        let mean = params.narrow(last, 0, self.dim)?;
        let log_std = params
            .narrow(last, self.dim, self.dim)?
            .clamp(MIN_LOG_STD, MAX_LOG_STD)?;
        Ok((mean, log_std))
    }

    /// z = mu + sigma * eps where eps ~ N(0, 1), with `num_samples`
    /// draws per row
    ///
    /// # Returns `(z_nkd, eps_nkd, log_std_n1d)`
    fn reparameterize(&self, num_samples: usize, context: &Tensor) -> Result<(Tensor, Tensor, Tensor)> {
        let (mean_nd, log_std_nd) = self.params(context)?;
        let n = mean_nd.dim(0)?;
        let eps_nkd = Tensor::randn(0f32, 1f32, (n, num_samples, self.dim), mean_nd.device())?
            .to_dtype(mean_nd.dtype())?;
        let mean_n1d = mean_nd.unsqueeze(1)?;
        let log_std_n1d = log_std_nd.unsqueeze(1)?;
        let z_nkd = mean_n1d.broadcast_add(&eps_nkd.broadcast_mul(&log_std_n1d.exp()?)?)?;
        Ok((z_nkd, eps_nkd, log_std_n1d))
    }
}

impl DistributionT for ConditionalDiagonalGaussian {
    fn dim(&self) -> usize {
        self.dim
    }

    fn log_prob(&self, x_nd: &Tensor, context: Option<&Tensor>) -> Result<Tensor> {
        let context = require_context(context, "conditional gaussian log_prob")?;
        let (mean_nd, log_std_nd) = self.params(context)?;
        gaussian_log_density(x_nd, &mean_nd, &log_std_nd)
    }

    fn sample(&self, num_samples: usize, context: Option<&Tensor>) -> Result<Tensor> {
        let context = require_context(context, "conditional gaussian sample")?;
        let (z_nkd, _, _) = self.reparameterize(num_samples, context)?;
        Ok(z_nkd)
    }

    fn sample_and_log_prob(
        &self,
        num_samples: usize,
        context: Option<&Tensor>,
    ) -> Result<(Tensor, Tensor)> {
        let context = require_context(context, "conditional gaussian sample")?;
        let (z_nkd, eps_nkd, log_std_n1d) = self.reparameterize(num_samples, context)?;
        let log_q_nk = gaussian_noise_log_density(&eps_nkd, &log_std_n1d)?;
        Ok((z_nkd, log_q_nk))
    }

    fn mean(&self, context: Option<&Tensor>) -> Result<Tensor> {
        let context = require_context(context, "conditional gaussian mean")?;
        Ok(self.params(context)?.0)
    }

    fn is_conditional(&self) -> bool {
        true
    }
}
