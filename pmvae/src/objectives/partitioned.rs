use super::config::ElboConfig;
use super::elbo::*;
use crate::common::*;
use crate::model_traits::*;
use crate::pmvae_model::{CoupledPmvae, LatentCoupling, PartitionedMultimodalVae};

use candle_util::candle_model_traits::{Partitioned, PartitionedContext, PartitionedLatent};

/// Posterior sample of the partitioned model
pub type PartitionedSample = PosteriorSample<PartitionedLatent, PartitionedContext>;

/// Joint ELBO of the partitioned model with independent `m` and `s`
pub fn pmvae_elbo(
    model: &PartitionedMultimodalVae,
    inputs: &[Modality<Tensor>],
    config: &ElboConfig,
) -> Result<Tensor> {
    stochastic_elbo(&model.coupled(LatentCoupling::Independent), inputs, config)
}

/// Joint ELBO with `m` priors conditioned on `s`
pub fn hier_pmvae_elbo(
    model: &PartitionedMultimodalVae,
    inputs: &[Modality<Tensor>],
    config: &ElboConfig,
) -> Result<Tensor> {
    stochastic_elbo(&model.coupled(LatentCoupling::Hierarchical), inputs, config)
}

/// Joint ELBO with `m` priors conditioned on `s` and likelihoods
/// reading `m` alone
pub fn hier_pmvae_v2_elbo(
    model: &PartitionedMultimodalVae,
    inputs: &[Modality<Tensor>],
    config: &ElboConfig,
) -> Result<Tensor> {
    stochastic_elbo(
        &model.coupled(LatentCoupling::HierarchicalSpecific),
        inputs,
        config,
    )
}

/// Sum of the ELBOs of each modality alone; `samples[i].latent.m[i]`
/// and `samples[i].context.s` are reused by the cross-posterior terms
pub fn partitioned_unimodal_elbos(
    model: &CoupledPmvae<'_>,
    inputs: &[Modality<Tensor>],
    config: &ElboConfig,
) -> Result<(Tensor, Vec<Modality<PartitionedSample>>)> {
    unimodal_elbos(model, inputs, config)
}

/// Unimodal ELBOs plus a joint term on the shared latent only:
///
/// log p(x | m_x, s) + log p(y | m_y, s)
///   - beta * [log q(s|x,y) - log q(s|x)] - beta * [log q(s|x,y) - log q(s|y)]
///
/// where `s ~ q(s|x,y)` and each `m_i` is the draw from the unimodal
/// ELBO of modality `i`
pub fn coupled_pmvaevae_elbo(
    model: &CoupledPmvae<'_>,
    inputs: &[Modality<Tensor>],
    config: &ElboConfig,
) -> Result<Tensor> {
    check_two_modalities("pmvaevae_elbo", inputs.len(), model.num_modalities())?;
    let (elbo_sum, unimodal) = partitioned_unimodal_elbos(model, inputs, config)?;

    let num_samples = config.num_samples;
    let weights = config.weights(model.num_modalities())?;
    let s_posterior = model.model().s_posterior();

    let joint_context = model.model().encode_context(inputs)?;
    let (s, log_q_joint) = s_posterior.sample_and_log_prob(num_samples, Some(&joint_context.s))?;
    let s = merge_leading_dims(&s)?;
    let log_q_joint = log_q_joint.flatten_all()?;
    let nk = s.dim(0)?;

    let mut elbo = Tensor::zeros_like(&log_q_joint)?;
    let mut m = Vec::with_capacity(unimodal.len());
    for (i, sample) in unimodal.iter().enumerate() {
        match sample {
            Modality::Present(sample) => {
                let s_context = align_rows(&sample.context.s, nk)?;
                let log_q_uni = s_posterior.log_prob(&s, Some(&s_context))?;
                let kl = (&log_q_joint - log_q_uni)?;
                elbo = (elbo - (kl * config.kl_multiplier)?)?;
                m.push(sample.latent.m[i].clone());
            }
            Modality::Absent => m.push(Modality::Absent),
        }
    }

    let latent = Partitioned { m, s };
    elbo = (elbo + model.log_p_x_z(inputs, &latent, &weights, num_samples)?)?;

    elbo_sum + split_leading_dim(&elbo, num_samples)?.mean(1)?
}

pub fn pmvaevae_elbo(
    model: &PartitionedMultimodalVae,
    inputs: &[Modality<Tensor>],
    config: &ElboConfig,
) -> Result<Tensor> {
    coupled_pmvaevae_elbo(&model.coupled(LatentCoupling::Independent), inputs, config)
}

pub fn hier_pmvaevae_elbo(
    model: &PartitionedMultimodalVae,
    inputs: &[Modality<Tensor>],
    config: &ElboConfig,
) -> Result<Tensor> {
    coupled_pmvaevae_elbo(&model.coupled(LatentCoupling::Hierarchical), inputs, config)
}

pub fn hier_pmvaevae_v2_elbo(
    model: &PartitionedMultimodalVae,
    inputs: &[Modality<Tensor>],
    config: &ElboConfig,
) -> Result<Tensor> {
    coupled_pmvaevae_elbo(
        &model.coupled(LatentCoupling::HierarchicalSpecific),
        inputs,
        config,
    )
}
