use crate::common::*;
use crate::model_traits::*;

use candle_util::candle_model_traits::{
    Partitioned, PartitionedContext, PartitionedEncoderT, PartitionedLatent,
};

/// How modality-specific latents `m` relate to the shared latent `s`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LatentCoupling {
    /// p(m) p(s), likelihoods read `[m, s]`
    #[default]
    Independent,
    /// p(m|s) p(s), likelihoods read `[m, s]`
    Hierarchical,
    /// p(m|s) p(s), likelihoods read `m` alone
    HierarchicalSpecific,
}

impl LatentCoupling {
    pub fn conditions_m_on_s(&self) -> bool {
        !matches!(self, LatentCoupling::Independent)
    }

    pub fn likelihood_reads_s(&self) -> bool {
        !matches!(self, LatentCoupling::HierarchicalSpecific)
    }

    /// Input dimension of each likelihood's decoder
    pub fn likelihood_context_dim(&self, m_dim: usize, s_dim: usize) -> usize {
        if self.likelihood_reads_s() {
            m_dim + s_dim
        } else {
            m_dim
        }
    }
}

/// Partitioned multimodal VAE: one modality-specific latent per
/// modality and one shared latent.
///
/// * `s_prior`, `s_posterior` - shared latent
/// * `m_priors`, `m_posteriors` - modality-specific latents
/// * `likelihoods` - p(x_i | m_i, s)
/// * `inputs_encoder` - inputs to posterior contexts `{m, s}`
pub struct PartitionedMultimodalVae {
    s_prior: BoxedDist,
    m_priors: Vec<BoxedDist>,
    s_posterior: BoxedDist,
    m_posteriors: Vec<BoxedDist>,
    likelihoods: Vec<BoxedDist>,
    inputs_encoder: Box<dyn PartitionedEncoderT>,
    coupling: LatentCoupling,
}

impl PartitionedMultimodalVae {
    pub fn new(
        s_prior: BoxedDist,
        m_priors: Vec<BoxedDist>,
        s_posterior: BoxedDist,
        m_posteriors: Vec<BoxedDist>,
        likelihoods: Vec<BoxedDist>,
        inputs_encoder: Box<dyn PartitionedEncoderT>,
    ) -> Result<Self> {
        let num_modalities = likelihoods.len();
        check_num_modalities("m_priors", num_modalities, m_priors.len())?;
        check_num_modalities("m_posteriors", num_modalities, m_posteriors.len())?;
        check_num_modalities(
            "inputs encoder",
            num_modalities,
            inputs_encoder.num_modalities(),
        )?;

        Ok(Self {
            s_prior,
            m_priors,
            s_posterior,
            m_posteriors,
            likelihoods,
            inputs_encoder,
            coupling: LatentCoupling::Independent,
        })
    }

    /// Default coupling used by this model's own methods; the decoders
    /// must have been built for it
    pub fn with_coupling(mut self, coupling: LatentCoupling) -> Self {
        self.coupling = coupling;
        self
    }

    pub fn coupling(&self) -> LatentCoupling {
        self.coupling
    }

    /// View this model under a different prior/likelihood coupling
    pub fn coupled(&self, coupling: LatentCoupling) -> CoupledPmvae<'_> {
        CoupledPmvae {
            model: self,
            coupling,
        }
    }

    pub fn s_posterior(&self) -> &dyn DistributionT {
        self.s_posterior.as_ref()
    }

    /// Prior of the `i`-th modality-specific latent
    pub fn m_prior(&self, i: usize) -> Option<&dyn DistributionT> {
        self.m_priors.get(i).map(|p| p.as_ref())
    }

    /// Posterior contexts `{m, s}` of the inputs
    pub fn encode_context(&self, inputs: &[Modality<Tensor>]) -> Result<PartitionedContext> {
        check_num_modalities("inputs", self.likelihoods.len(), inputs.len())?;
        self.inputs_encoder.forward(inputs)
    }

    /// Draw latents from the posterior. With `num_samples = None` one
    /// draw per row `(n, d)`, otherwise `(n, k, d)`.
    pub fn encode(
        &self,
        inputs: &[Modality<Tensor>],
        num_samples: Option<usize>,
    ) -> Result<PartitionedLatent> {
        self.coupled(self.coupling).encode(inputs, num_samples)
    }

    /// x ~ p(x|m, s) for each modality; absent `m` are drawn from the
    /// prior
    pub fn decode(&self, latent: &PartitionedLatent, mean: bool) -> Result<Vec<Tensor>> {
        self.coupled(self.coupling).decode(latent, mean)
    }
}

/// A [`PartitionedMultimodalVae`] read under a specific
/// [`LatentCoupling`]
#[derive(Clone, Copy)]
pub struct CoupledPmvae<'a> {
    model: &'a PartitionedMultimodalVae,
    coupling: LatentCoupling,
}

impl<'a> CoupledPmvae<'a> {
    pub fn model(&self) -> &'a PartitionedMultimodalVae {
        self.model
    }

    pub fn coupling(&self) -> LatentCoupling {
        self.coupling
    }

    fn m_prior_context<'b>(&self, s: &'b Tensor) -> Option<&'b Tensor> {
        if self.coupling.conditions_m_on_s() {
            Some(s)
        } else {
            None
        }
    }

    fn likelihood_context(&self, m: &Tensor, s: &Tensor) -> Result<Tensor> {
        if self.coupling.likelihood_reads_s() {
            Tensor::cat(&[m, s], m.rank() - 1)
        } else {
            Ok(m.clone())
        }
    }

    pub fn encode(
        &self,
        inputs: &[Modality<Tensor>],
        num_samples: Option<usize>,
    ) -> Result<PartitionedLatent> {
        let context = self.model.encode_context(inputs)?;
        let draw = |dist: &dyn DistributionT, c: &Tensor| -> Result<Tensor> {
            match num_samples {
                None => merge_leading_dims(&dist.sample(1, Some(c))?),
                Some(k) => dist.sample(k, Some(c)),
            }
        };

        let m = context
            .m
            .iter()
            .zip(self.model.m_posteriors.iter())
            .map(|(c, q)| c.as_ref().try_map(|c| draw(q.as_ref(), c)))
            .collect::<Result<Vec<_>>>()?;

        Ok(Partitioned {
            m,
            s: draw(self.model.s_posterior.as_ref(), &context.s)?,
        })
    }

    pub fn decode(&self, latent: &PartitionedLatent, mean: bool) -> Result<Vec<Tensor>> {
        let model = self.model;
        check_num_modalities("latents", model.likelihoods.len(), latent.m.len())?;
        let s = &latent.s;

        let mut ret = Vec::with_capacity(latent.m.len());
        for ((m, prior), likelihood) in latent
            .m
            .iter()
            .zip(model.m_priors.iter())
            .zip(model.likelihoods.iter())
        {
            let m = match m {
                Modality::Present(m) => m.clone(),
                // p(m|s) under hierarchical coupling; an unconditional
                // prior reads s only for its number of rows
                Modality::Absent => merge_leading_dims(&prior.sample(1, Some(s))?)?,
            };
            let context = self.likelihood_context(&m, s)?;
            let x = if mean {
                likelihood.mean(Some(&context))?
            } else {
                merge_leading_dims(&likelihood.sample(1, Some(&context))?)?
            };
            ret.push(x);
        }
        Ok(ret)
    }
}

impl MultimodalVaeT for CoupledPmvae<'_> {
    type Latent = PartitionedLatent;
    type Context = PartitionedContext;

    fn num_modalities(&self) -> usize {
        self.model.likelihoods.len()
    }

    fn log_q_z_x(
        &self,
        inputs: &[Modality<Tensor>],
        num_samples: usize,
    ) -> Result<PosteriorSample<PartitionedLatent, PartitionedContext>> {
        let model = self.model;
        let context = model.encode_context(inputs)?;

        let (s, log_q_s) = model
            .s_posterior
            .sample_and_log_prob(num_samples, Some(&context.s))?;
        let s = merge_leading_dims(&s)?;
        let mut log_q = log_q_s.flatten_all()?;

        let mut m = Vec::with_capacity(context.m.len());
        for (c, q) in context.m.iter().zip(model.m_posteriors.iter()) {
            match c {
                Modality::Present(c) => {
                    let (z, log_q_m) = q.sample_and_log_prob(num_samples, Some(c))?;
                    m.push(Modality::Present(merge_leading_dims(&z)?));
                    log_q = (log_q + log_q_m.flatten_all()?)?;
                }
                Modality::Absent => m.push(Modality::Absent),
            }
        }

        Ok(PosteriorSample {
            log_q,
            latent: Partitioned { m, s },
            context,
        })
    }

    fn log_q_z_given(
        &self,
        latent: &PartitionedLatent,
        context: &PartitionedContext,
    ) -> Result<Tensor> {
        let model = self.model;
        check_num_modalities("posterior contexts", latent.m.len(), context.m.len())?;
        let nk = latent.s.dim(0)?;

        let s_context = align_rows(&context.s, nk)?;
        let mut log_q = model.s_posterior.log_prob(&latent.s, Some(&s_context))?;

        for ((z, c), q) in latent
            .m
            .iter()
            .zip(context.m.iter())
            .zip(model.m_posteriors.iter())
        {
            if let (Modality::Present(z), Modality::Present(c)) = (z, c) {
                let c = align_rows(c, nk)?;
                log_q = (log_q + q.log_prob(z, Some(&c))?)?;
            }
        }
        Ok(log_q)
    }

    fn log_p_z(&self, latent: &PartitionedLatent) -> Result<Tensor> {
        let model = self.model;
        check_num_modalities("latents", model.m_priors.len(), latent.m.len())?;
        let s = &latent.s;

        let mut log_p = model.s_prior.log_prob(s, None)?;
        for (z, p) in latent.m.iter().zip(model.m_priors.iter()) {
            if let Modality::Present(z) = z {
                log_p = (log_p + p.log_prob(z, self.m_prior_context(s))?)?;
            }
        }
        Ok(log_p)
    }

    fn log_p_x_z(
        &self,
        inputs: &[Modality<Tensor>],
        latent: &PartitionedLatent,
        weights: &[f64],
        num_samples: usize,
    ) -> Result<Tensor> {
        let model = self.model;
        let num_modalities = model.likelihoods.len();
        check_num_modalities("inputs", num_modalities, inputs.len())?;
        check_num_modalities("latents", num_modalities, latent.m.len())?;
        check_num_modalities("likelihood weights", num_modalities, weights.len())?;

        let s = &latent.s;
        let mut log_p = Tensor::zeros(s.dim(0)?, s.dtype(), s.device())?;

        for (((x, m), likelihood), &w) in inputs
            .iter()
            .zip(latent.m.iter())
            .zip(model.likelihoods.iter())
            .zip(weights.iter())
        {
            if let (Modality::Present(x), Modality::Present(m)) = (x, m) {
                let x = repeat_rows(x, num_samples)?;
                let context = self.likelihood_context(m, s)?;
                log_p = (log_p + (likelihood.log_prob(&x, Some(&context))? * w)?)?;
            }
        }
        Ok(log_p)
    }

    fn sample(&self, num_samples: usize, mean: bool) -> Result<Vec<Tensor>> {
        let s = self.model.s_prior.sample(num_samples, None)?;
        let latent = Partitioned {
            m: vec![Modality::Absent; self.num_modalities()],
            s,
        };
        self.decode(&latent, mean)
    }

    fn cross_reconstruct(
        &self,
        inputs: &[Tensor],
        num_samples: Option<usize>,
        mean: bool,
    ) -> Result<Vec<Tensor>> {
        check_cross_reconstruct(inputs.len(), self.num_modalities(), num_samples)?;
        let (x, y) = (&inputs[0], &inputs[1]);

        let x_latent = self.encode(&[Modality::Present(x.clone()), Modality::Absent], None)?;
        let y_from_x = self.decode(&x_latent, mean)?.swap_remove(1);

        let y_latent = self.encode(&[Modality::Absent, Modality::Present(y.clone())], None)?;
        let x_from_y = self.decode(&y_latent, mean)?.swap_remove(0);

        Ok(vec![x_from_y, y_from_x])
    }
}

impl MultimodalVaeT for PartitionedMultimodalVae {
    type Latent = PartitionedLatent;
    type Context = PartitionedContext;

    fn num_modalities(&self) -> usize {
        self.likelihoods.len()
    }

    fn log_q_z_x(
        &self,
        inputs: &[Modality<Tensor>],
        num_samples: usize,
    ) -> Result<PosteriorSample<PartitionedLatent, PartitionedContext>> {
        self.coupled(self.coupling).log_q_z_x(inputs, num_samples)
    }

    fn log_q_z_given(
        &self,
        latent: &PartitionedLatent,
        context: &PartitionedContext,
    ) -> Result<Tensor> {
        self.coupled(self.coupling).log_q_z_given(latent, context)
    }

    fn log_p_z(&self, latent: &PartitionedLatent) -> Result<Tensor> {
        self.coupled(self.coupling).log_p_z(latent)
    }

    fn log_p_x_z(
        &self,
        inputs: &[Modality<Tensor>],
        latent: &PartitionedLatent,
        weights: &[f64],
        num_samples: usize,
    ) -> Result<Tensor> {
        self.coupled(self.coupling)
            .log_p_x_z(inputs, latent, weights, num_samples)
    }

    fn sample(&self, num_samples: usize, mean: bool) -> Result<Vec<Tensor>> {
        self.coupled(self.coupling).sample(num_samples, mean)
    }

    fn cross_reconstruct(
        &self,
        inputs: &[Tensor],
        num_samples: Option<usize>,
        mean: bool,
    ) -> Result<Vec<Tensor>> {
        self.coupled(self.coupling)
            .cross_reconstruct(inputs, num_samples, mean)
    }
}

/// Cross reconstruction is defined for two modalities and one
/// reconstruction per input
pub(crate) fn check_cross_reconstruct(
    num_inputs: usize,
    num_modalities: usize,
    num_samples: Option<usize>,
) -> Result<()> {
    for found in [num_inputs, num_modalities] {
        if found != 2 {
            return Err(ModelError::UnsupportedArity {
                operation: "cross_reconstruct".into(),
                expected: 2,
                found,
            }
            .into());
        }
    }
    if num_samples.is_some() {
        return Err(ModelError::Unsupported {
            operation: "cross_reconstruct".into(),
            reason: "only one reconstruction per input (num_samples = None)".into(),
        }
        .into());
    }
    Ok(())
}
