use candle_core::{Result, Tensor};

const LN_2PI: f64 = 1.837_877_066_409_345_3;

/// Diagonal Gaussian log-density, summed over the last axis
///
/// llik(i) = sum_k -0.5 * ((x(i,k) - mu(i,k)) / sigma(i,k))^2 - log sigma(i,k) - 0.5 * log(2π)
///
/// * `x_nk` - values
/// * `mean_nk` - mean
/// * `log_std_nk` - log standard deviation
///
pub fn gaussian_log_density(x_nk: &Tensor, mean_nk: &Tensor, log_std_nk: &Tensor) -> Result<Tensor> {
    let z_nk = x_nk
        .broadcast_sub(mean_nk)?
        .broadcast_div(&log_std_nk.exp()?)?;
    let log_p = ((z_nk.sqr()? * (-0.5))?.broadcast_sub(log_std_nk)? - 0.5 * LN_2PI)?;
    log_p.sum(log_p.rank() - 1)
}

/// Standard normal log-density, summed over the last axis
pub fn standard_normal_log_density(x_nk: &Tensor) -> Result<Tensor> {
    let log_p = ((x_nk.sqr()? * (-0.5))? - 0.5 * LN_2PI)?;
    log_p.sum(log_p.rank() - 1)
}

/// Log-density of the reparameterization noise, i.e., the Gaussian
/// log-density of `mean + exp(log_std) * eps` evaluated at itself
///
/// * `eps_nk` - standard normal noise
/// * `log_std_nk` - log standard deviation
///
pub fn gaussian_noise_log_density(eps_nk: &Tensor, log_std_nk: &Tensor) -> Result<Tensor> {
    let log_p = ((eps_nk.sqr()? * (-0.5))?.broadcast_sub(log_std_nk)? - 0.5 * LN_2PI)?;
    log_p.sum(log_p.rank() - 1)
}

/// Independent Bernoulli log-likelihood given logits
///
/// llik(i) = sum_w x(i,w) * l(i,w) - log(1 + exp(l(i,w)))
///
/// where `log(1 + exp(l)) = max(l, 0) + log(1 + exp(-|l|))`
///
/// * `x_nd` - data tensor in [0, 1]
/// * `logits_nd` - logits (reconstruction)
///
pub fn bernoulli_log_likelihood(x_nd: &Tensor, logits_nd: &Tensor) -> Result<Tensor> {
    let softplus_nd = (logits_nd.relu()? + (logits_nd.abs()?.neg()?.exp()? + 1.0)?.log()?)?;
    let llik = (x_nd.mul(logits_nd)? - softplus_nd)?;
    llik.sum(llik.rank() - 1)
}

/// Gaussian log-likelihood with a fixed isotropic noise
///
/// llik(i) = sum_w -0.5 * [ (x(i,w) - xhat(i,w)) / sigma ]^2 - log sigma - 0.5 * log(2π)
///
/// * `x_nd` - data tensor (observed data)
/// * `hat_nd` - mean tensor (reconstruction)
/// * `log_std` - log noise standard deviation
///
pub fn gaussian_likelihood(x_nd: &Tensor, hat_nd: &Tensor, log_std: f64) -> Result<Tensor> {
    let z_nd = (x_nd.sub(hat_nd)? / log_std.exp())?;
    let llik = ((z_nd.sqr()? * (-0.5))? - (log_std + 0.5 * LN_2PI))?;
    llik.sum(llik.rank() - 1)
}

/// log(1/K sum_k exp(x_k)) along `dim`, stabilized by the maximum
pub fn log_mean_exp(x: &Tensor, dim: usize) -> Result<Tensor> {
    let num = x.dim(dim)? as f64;
    let max_x = x.max_keepdim(dim)?;
    let sum_exp = x.broadcast_sub(&max_x)?.exp()?.sum_keepdim(dim)?;
    (sum_exp.log()? + max_x)?.squeeze(dim)? - num.ln()
}
