use candle_core::{DType, Device, Result, Tensor};

use super::traits::DistributionT;
use crate::candle_loss_functions::standard_normal_log_density;

/// Standard normal N(0, I) over `dim` coordinates. A context, if
/// given, only determines how many rows are drawn.
pub struct StandardNormal {
    dim: usize,
    dtype: DType,
    device: Device,
}

impl StandardNormal {
    pub fn new(dim: usize, dtype: DType, device: &Device) -> Self {
        Self {
            dim,
            dtype,
            device: device.clone(),
        }
    }
}

impl DistributionT for StandardNormal {
    fn dim(&self) -> usize {
        self.dim
    }

    fn log_prob(&self, x_nd: &Tensor, _context: Option<&Tensor>) -> Result<Tensor> {
        standard_normal_log_density(x_nd)
    }

    fn sample(&self, num_samples: usize, context: Option<&Tensor>) -> Result<Tensor> {
        let (shape, device) = match context {
            Some(context) => (
                vec![context.dim(0)?, num_samples, self.dim],
                context.device(),
            ),
            None => (vec![num_samples, self.dim], &self.device),
        };
        Tensor::randn(0f32, 1f32, shape, device)?.to_dtype(self.dtype)
    }

    fn mean(&self, context: Option<&Tensor>) -> Result<Tensor> {
        match context {
            Some(context) => Tensor::zeros((context.dim(0)?, self.dim), self.dtype, context.device()),
            None => Tensor::zeros((1, self.dim), self.dtype, &self.device),
        }
    }
}
