#![allow(dead_code)]

use candle_util::candle_core;
use candle_core::{DType, Device, Result, Tensor};
use candle_util::candle_modality::*;
use candle_util::candle_model_traits::*;
use candle_util::dist::DistributionT;

use pmvae::common::BoxedDist;
use pmvae::mvae_model::MultimodalVae;
use pmvae::pmvae_model::PartitionedMultimodalVae;

/// -0.5 * ln(2 pi)
pub const LOG_NORM: f64 = -0.918_938_533_204_672_7;

/// N(mu, I) that always draws its mean
///
/// With `conditional` the mean is the row sum of the context,
/// broadcast over `dim`; otherwise it is zero and a context only sets
/// the number of rows.
pub struct MeanDraw {
    pub dim: usize,
    pub conditional: bool,
}

impl MeanDraw {
    pub fn boxed(dim: usize, conditional: bool) -> BoxedDist {
        Box::new(Self { dim, conditional })
    }

    fn location(&self, context: Option<&Tensor>, rows: usize, dev: &Device) -> Result<Tensor> {
        match context {
            Some(c) if self.conditional => c
                .sum_keepdim(1)?
                .broadcast_as((c.dim(0)?, self.dim))?
                .contiguous(),
            _ => Tensor::zeros((rows, self.dim), DType::F32, dev),
        }
    }
}

impl DistributionT for MeanDraw {
    fn dim(&self) -> usize {
        self.dim
    }

    fn log_prob(&self, x_nd: &Tensor, context: Option<&Tensor>) -> Result<Tensor> {
        let mu = self.location(context, x_nd.dim(0)?, x_nd.device())?;
        ((x_nd - mu)?.sqr()?.sum(1)? * -0.5)? + LOG_NORM * self.dim as f64
    }

    fn sample(&self, num_samples: usize, context: Option<&Tensor>) -> Result<Tensor> {
        match context {
            Some(c) => {
                let n = c.dim(0)?;
                self.location(Some(c), n, c.device())?
                    .unsqueeze(1)?
                    .broadcast_as((n, num_samples, self.dim))?
                    .contiguous()
            }
            None => Tensor::zeros((num_samples, self.dim), DType::F32, &Device::Cpu),
        }
    }

    fn mean(&self, context: Option<&Tensor>) -> Result<Tensor> {
        let rows = match context {
            Some(c) => c.dim(0)?,
            None => 1,
        };
        self.location(context, rows, &Device::Cpu)
    }

    fn is_conditional(&self) -> bool {
        self.conditional
    }
}

/// The same log density for every row
pub struct ConstantDensity {
    pub dim: usize,
    pub value: f64,
}

impl ConstantDensity {
    pub fn boxed(dim: usize, value: f64) -> BoxedDist {
        Box::new(Self { dim, value })
    }
}

impl DistributionT for ConstantDensity {
    fn dim(&self) -> usize {
        self.dim
    }

    fn log_prob(&self, x_nd: &Tensor, _context: Option<&Tensor>) -> Result<Tensor> {
        Tensor::full(self.value as f32, x_nd.dim(0)?, x_nd.device())
    }

    fn sample(&self, num_samples: usize, context: Option<&Tensor>) -> Result<Tensor> {
        match context {
            Some(c) => Tensor::zeros((c.dim(0)?, num_samples, self.dim), DType::F32, c.device()),
            None => Tensor::zeros((num_samples, self.dim), DType::F32, &Device::Cpu),
        }
    }
}

/// `m_i = x_i` and `s = sum` of the present inputs
pub struct SumEncoder {
    pub num_modalities: usize,
}

fn sum_present(x_vec: &[Modality<Tensor>]) -> Result<Tensor> {
    let present = present_or_fail(x_vec, "sum encoder")?;
    let mut s = present[0].clone();
    for x in present.iter().skip(1) {
        s = (s + *x)?;
    }
    Ok(s)
}

impl PartitionedEncoderT for SumEncoder {
    fn forward(&self, x_vec: &[Modality<Tensor>]) -> Result<PartitionedContext> {
        check_num_modalities("sum encoder inputs", self.num_modalities, x_vec.len())?;
        Ok(Partitioned {
            m: x_vec.to_vec(),
            s: sum_present(x_vec)?,
        })
    }

    fn num_modalities(&self) -> usize {
        self.num_modalities
    }
}

impl MultimodalEncoderT for SumEncoder {
    fn forward(&self, x_vec: &[Modality<Tensor>]) -> Result<Tensor> {
        check_num_modalities("sum encoder inputs", self.num_modalities, x_vec.len())?;
        sum_present(x_vec)
    }

    fn num_modalities(&self) -> usize {
        self.num_modalities
    }
}

/// One-dimensional partitioned model whose draws are all means:
/// `q(m_i | x) = N(x_i, 1)`, `q(s | x) = N(sum x, 1)`, `p(s) = N(0, 1)`,
/// `p(m_i | s) = N(s, 1)` (or `N(0, 1)` when not conditioned) and
/// `p(x_i | m_i, s) = N(m_i + s, 1)`.
pub fn mean_draw_pmvae(num_modalities: usize) -> Result<PartitionedMultimodalVae> {
    let many = |conditional: bool| -> Vec<BoxedDist> {
        (0..num_modalities)
            .map(|_| MeanDraw::boxed(1, conditional))
            .collect()
    };
    PartitionedMultimodalVae::new(
        MeanDraw::boxed(1, false),
        many(true),
        MeanDraw::boxed(1, true),
        many(true),
        many(true),
        Box::new(SumEncoder { num_modalities }),
    )
}

/// One-dimensional joint model: `q(z | x) = N(sum x, 1)`,
/// `p(z) = N(0, 1)` and `p(x_i | z) = N(z, 1)`
pub fn mean_draw_mvae(num_modalities: usize) -> Result<MultimodalVae> {
    MultimodalVae::new(
        MeanDraw::boxed(1, false),
        MeanDraw::boxed(1, true),
        (0..num_modalities)
            .map(|_| MeanDraw::boxed(1, true))
            .collect(),
        Box::new(SumEncoder { num_modalities }),
    )
}

/// `x = [[1]]`, `y = [[2]]`
pub fn literal_pair() -> Result<Vec<Tensor>> {
    let dev = Device::Cpu;
    Ok(vec![
        Tensor::new(&[[1f32]], &dev)?,
        Tensor::new(&[[2f32]], &dev)?,
    ])
}

pub fn to_vec(x: &Tensor) -> Result<Vec<f32>> {
    x.flatten_all()?.to_vec1::<f32>()
}
