use candle_core::{Result, Tensor};
use candle_nn::Module;

use crate::candle_loss_functions::gaussian_likelihood;
use crate::dist::traits::{require_context, DistributionT};

/// p(x|z) = N(x; f(z), sigma^2 I) with a fixed noise scale
pub struct IsotropicGaussian {
    dim: usize,
    decoder: Box<dyn Module>,
    log_std: f64,
}

impl IsotropicGaussian {
    /// * `dim` - observation dimension
    /// * `decoder` - latent rows to means
    /// * `log_std` - log noise standard deviation
    pub fn new(dim: usize, decoder: Box<dyn Module>, log_std: f64) -> Self {
        Self {
            dim,
            decoder,
            log_std,
        }
    }

    pub fn log_std(&self) -> f64 {
        self.log_std
    }
}

impl DistributionT for IsotropicGaussian {
    fn dim(&self) -> usize {
        self.dim
    }

    fn log_prob(&self, x_nd: &Tensor, context: Option<&Tensor>) -> Result<Tensor> {
        let z_nh = require_context(context, "gaussian log_prob")?;
        gaussian_likelihood(x_nd, &self.decoder.forward(z_nh)?, self.log_std)
    }

    fn sample(&self, num_samples: usize, context: Option<&Tensor>) -> Result<Tensor> {
        let z_nh = require_context(context, "gaussian sample")?;
        let mean_n1d = self.decoder.forward(z_nh)?.unsqueeze(1)?;
        let (n, _, d) = mean_n1d.dims3()?;
        let eps_nkd = Tensor::randn(0f32, 1f32, (n, num_samples, d), z_nh.device())?
            .to_dtype(mean_n1d.dtype())?;
        mean_n1d.broadcast_add(&(eps_nkd * self.log_std.exp())?)
    }

    fn mean(&self, context: Option<&Tensor>) -> Result<Tensor> {
        let z_nh = require_context(context, "gaussian mean")?;
        self.decoder.forward(z_nh)
    }

    fn is_conditional(&self) -> bool {
        true
    }
}
