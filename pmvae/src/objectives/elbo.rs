use super::config::ElboConfig;
use crate::common::*;
use crate::model_traits::*;

use candle_util::candle_loss_functions::log_mean_exp;

/// A posterior sample of model `M`
pub type ModelSample<M> =
    PosteriorSample<<M as MultimodalVaeT>::Latent, <M as MultimodalVaeT>::Context>;

/// Monte Carlo ELBO draws
///
/// elbo(b, j) = log p(x_b | z_bj) + beta * (log p(z_bj) - log q(z_bj | x_b))
///
/// # Returns `(elbo_nk, sample)`
/// * `elbo_nk` - one value per example and draw (n x k)
/// * `sample` - the posterior draws behind them
pub fn compute_elbo_draws<M: MultimodalVaeT>(
    model: &M,
    inputs: &[Modality<Tensor>],
    config: &ElboConfig,
) -> Result<(Tensor, ModelSample<M>)> {
    config.check()?;
    let num_samples = config.num_samples;
    let weights = config.weights(model.num_modalities())?;

    let sample = model.log_q_z_x(inputs, num_samples)?;
    let log_p_z = model.log_p_z(&sample.latent)?;
    let log_p_x_z = model.log_p_x_z(inputs, &sample.latent, &weights, num_samples)?;

    let kl_term = ((log_p_z - &sample.log_q)? * config.kl_multiplier)?;
    let elbo = (log_p_x_z + kl_term)?;
    Ok((split_leading_dim(&elbo, num_samples)?, sample))
}

/// ELBO averaged over the posterior draws
///
/// # Returns `(elbo_n, sample)`
pub fn compute_elbo<M: MultimodalVaeT>(
    model: &M,
    inputs: &[Modality<Tensor>],
    config: &ElboConfig,
) -> Result<(Tensor, ModelSample<M>)> {
    let (elbo_nk, sample) = compute_elbo_draws(model, inputs, config)?;
    Ok((elbo_nk.mean(1)?, sample))
}

/// Monte Carlo ELBO of whichever modalities are present
pub fn stochastic_elbo<M: MultimodalVaeT>(
    model: &M,
    inputs: &[Modality<Tensor>],
    config: &ElboConfig,
) -> Result<Tensor> {
    Ok(compute_elbo(model, inputs, config)?.0)
}

/// Sum of ELBOs computed on each modality alone (every other slot
/// masked absent). Absent inputs contribute nothing.
///
/// # Returns `(elbo_n, samples)` where `samples[i]` is the posterior
/// sample given modality `i` alone
pub fn unimodal_elbos<M: MultimodalVaeT>(
    model: &M,
    inputs: &[Modality<Tensor>],
    config: &ElboConfig,
) -> Result<(Tensor, Vec<Modality<ModelSample<M>>>)> {
    let first = present_or_fail(inputs, "unimodal elbos")?[0];
    let mut elbo_sum = Tensor::zeros(first.dim(0)?, first.dtype(), first.device())?;
    let mut samples = Vec::with_capacity(inputs.len());

    for (i, x) in inputs.iter().enumerate() {
        if x.is_absent() {
            samples.push(Modality::Absent);
            continue;
        }
        let (elbo, sample) = compute_elbo(model, &only_modality(inputs, i), config)?;
        elbo_sum = (elbo_sum + elbo)?;
        samples.push(Modality::Present(sample));
    }
    Ok((elbo_sum, samples))
}

/// ELBO(x, y) + ELBO(x) + ELBO(y)
pub fn mvae_elbo<M: MultimodalVaeT>(
    model: &M,
    inputs: &[Modality<Tensor>],
    config: &ElboConfig,
) -> Result<Tensor> {
    let (unimodal, _) = unimodal_elbos(model, inputs, config)?;
    let joint = stochastic_elbo(model, inputs, config)?;
    unimodal + joint
}

/// Unimodal ELBOs plus a joint term regularizing the joint posterior
/// toward each unimodal posterior:
///
/// log p(x, y | z) - beta * [log q(z|x,y) - log q(z|x)] - beta * [log q(z|x,y) - log q(z|y)]
///
/// with `z ~ q(z|x,y)` backing every term.
pub fn vaevae_elbo<M: MultimodalVaeT>(
    model: &M,
    inputs: &[Modality<Tensor>],
    config: &ElboConfig,
) -> Result<Tensor> {
    check_two_modalities("vaevae_elbo", inputs.len(), model.num_modalities())?;
    let (elbo_sum, unimodal) = unimodal_elbos(model, inputs, config)?;

    let num_samples = config.num_samples;
    let weights = config.weights(model.num_modalities())?;
    let joint = model.log_q_z_x(inputs, num_samples)?;

    let mut elbo = model.log_p_x_z(inputs, &joint.latent, &weights, num_samples)?;
    for sample in unimodal.iter().filter_map(|s| s.present()) {
        let log_q_uni = model.log_q_z_given(&joint.latent, &sample.context)?;
        let kl = (&joint.log_q - log_q_uni)?;
        elbo = (elbo - (kl * config.kl_multiplier)?)?;
    }

    elbo_sum + split_leading_dim(&elbo, num_samples)?.mean(1)?
}

/// Importance-weighted bound
///
/// log (1/K) sum_k exp(elbo(b, k))
///
/// with `K = config.num_samples`; tighter than the averaged ELBO
pub fn log_prob_lower_bound<M: MultimodalVaeT>(
    model: &M,
    inputs: &[Modality<Tensor>],
    config: &ElboConfig,
) -> Result<Tensor> {
    let (elbo_nk, _) = compute_elbo_draws(model, inputs, config)?;
    log_mean_exp(&elbo_nk, 1)
}

pub(crate) fn check_two_modalities(
    operation: &str,
    num_inputs: usize,
    num_modalities: usize,
) -> Result<()> {
    for found in [num_inputs, num_modalities] {
        if found != 2 {
            return Err(ModelError::UnsupportedArity {
                operation: operation.to_string(),
                expected: 2,
                found,
            }
            .into());
        }
    }
    Ok(())
}
