use candle_core::{Result, Tensor};

use crate::candle_modality::{check_num_modalities, present_or_fail, Modality};
use crate::candle_model_traits::FusionT;

pub const POE_EPS: f64 = 1e-8;

/// Combine Gaussian experts by precision-weighted averaging
///
/// var(k) = exp(2 * log_std(k)) + eps
/// T(k) = 1 / (var(k) + eps)
/// mean = sum_k mean(k) * T(k) / sum_k T(k)
/// log_std = log(1 / sum_k T(k) + eps) / 2
///
/// * `mean_knd` - expert means (K x n x d)
/// * `log_std_knd` - expert log standard deviations (K x n x d)
///
/// # Returns `(mean_nd, log_std_nd)`
pub fn product_of_experts(mean_knd: &Tensor, log_std_knd: &Tensor) -> Result<(Tensor, Tensor)> {
    let var_knd = ((log_std_knd * 2.)?.exp()? + POE_EPS)?;
    let precision_knd = (var_knd + POE_EPS)?.recip()?;
    let total_nd = precision_knd.sum(0)?;
    let mean_nd = (mean_knd * &precision_knd)?.sum(0)?.div(&total_nd)?;
    let var_nd = total_nd.recip()?;
    let log_std_nd = ((var_nd + POE_EPS)?.log()? * 0.5)?;
    Ok((mean_nd, log_std_nd))
}

/// Fuse the present experts together with a standard normal prior
/// expert. Absent slots contribute nothing.
///
/// * `means` - per-modality means (n x d)
/// * `log_stds` - per-modality log standard deviations (n x d)
pub fn product_of_present_experts(
    means: &[Modality<Tensor>],
    log_stds: &[Modality<Tensor>],
) -> Result<(Tensor, Tensor)> {
    check_num_modalities("expert log_stds", means.len(), log_stds.len())?;
    let mut mean_vec: Vec<Tensor> = present_or_fail(means, "product of experts")?
        .into_iter()
        .cloned()
        .collect();
    let mut log_std_vec: Vec<Tensor> = present_or_fail(log_stds, "product of experts")?
        .into_iter()
        .cloned()
        .collect();
    check_num_modalities("present expert log_stds", mean_vec.len(), log_std_vec.len())?;

    let prior = Tensor::zeros_like(&mean_vec[0])?;
    mean_vec.push(prior.clone());
    log_std_vec.push(prior);

    product_of_experts(&Tensor::stack(&mean_vec, 0)?, &Tensor::stack(&log_std_vec, 0)?)
}

/// Fusion of per-modality `[mean, log_std]` rows into one Gaussian
/// context `[mean, log_std]` (n x 2d).
#[derive(Clone, Copy, Debug, Default)]
pub struct PoeFusion;

impl FusionT for PoeFusion {
    fn fuse(&self, params: &[Modality<Tensor>]) -> Result<Tensor> {
        let mut means = Vec::with_capacity(params.len());
        let mut log_stds = Vec::with_capacity(params.len());
        for p in params {
            match p {
                Modality::Present(p) => {
                    let chunks = p.chunk(2, p.rank() - 1)?;
                    means.push(Modality::Present(chunks[0].clone()));
                    log_stds.push(Modality::Present(chunks[1].clone()));
                }
                Modality::Absent => {
                    means.push(Modality::Absent);
                    log_stds.push(Modality::Absent);
                }
            }
        }
        let (mean_nd, log_std_nd) = product_of_present_experts(&means, &log_stds)?;
        Tensor::cat(&[mean_nd, log_std_nd], 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use candle_core::Device;

    #[test]
    fn single_expert_with_prior() -> Result<()> {
        let dev = Device::Cpu;
        let mean = Tensor::new(&[[2f32]], &dev)?;
        let log_std = Tensor::new(&[[0f32]], &dev)?;

        let (m, ls) = product_of_present_experts(
            &[Modality::Present(mean)],
            &[Modality::Present(log_std)],
        )?;

        let m: Vec<Vec<f32>> = m.to_vec2()?;
        let ls: Vec<Vec<f32>> = ls.to_vec2()?;
        assert_abs_diff_eq!(m[0][0], 1.0, epsilon = 1e-5);
        assert_abs_diff_eq!(ls[0][0] as f64, 0.5f64.ln() / 2., epsilon = 1e-5);
        Ok(())
    }

    #[test]
    fn expert_order_does_not_matter() -> Result<()> {
        let dev = Device::Cpu;
        let a = Tensor::new(&[[0.3f32, -1.2, 0.1, 0.5]], &dev)?;
        let b = Tensor::new(&[[1.5f32, 0.7, -0.4, -2.0]], &dev)?;

        let ab = PoeFusion.fuse(&[Modality::Present(a.clone()), Modality::Present(b.clone())])?;
        let ba = PoeFusion.fuse(&[Modality::Present(b), Modality::Present(a)])?;

        let ab: Vec<f32> = ab.flatten_all()?.to_vec1()?;
        let ba: Vec<f32> = ba.flatten_all()?.to_vec1()?;
        for (x, y) in ab.iter().zip(ba.iter()) {
            assert_abs_diff_eq!(x, y, epsilon = 1e-6);
        }
        Ok(())
    }

    #[test]
    fn absent_expert_is_skipped() -> Result<()> {
        let dev = Device::Cpu;
        let a = Tensor::new(&[[2f32, 0.0]], &dev)?;
        let alone = PoeFusion.fuse(&[Modality::Present(a.clone())])?;
        let with_gap = PoeFusion.fuse(&[Modality::Present(a), Modality::Absent])?;

        let alone: Vec<f32> = alone.flatten_all()?.to_vec1()?;
        let with_gap: Vec<f32> = with_gap.flatten_all()?.to_vec1()?;
        assert_eq!(alone, with_gap);

        assert!(PoeFusion.fuse(&[Modality::Absent, Modality::Absent]).is_err());
        Ok(())
    }
}
