use crate::common::*;
use crate::model_traits::*;
use crate::pmvae_model::check_cross_reconstruct;

use candle_util::candle_model_traits::MultimodalEncoderT;

/// Multimodal VAE with a single joint latent
pub struct MultimodalVae {
    prior: BoxedDist,
    posterior: BoxedDist,
    likelihoods: Vec<BoxedDist>,
    inputs_encoder: Box<dyn MultimodalEncoderT>,
}

impl MultimodalVae {
    pub fn new(
        prior: BoxedDist,
        posterior: BoxedDist,
        likelihoods: Vec<BoxedDist>,
        inputs_encoder: Box<dyn MultimodalEncoderT>,
    ) -> Result<Self> {
        check_num_modalities(
            "inputs encoder",
            likelihoods.len(),
            inputs_encoder.num_modalities(),
        )?;
        Ok(Self {
            prior,
            posterior,
            likelihoods,
            inputs_encoder,
        })
    }

    pub fn encode_context(&self, inputs: &[Modality<Tensor>]) -> Result<Tensor> {
        check_num_modalities("inputs", self.likelihoods.len(), inputs.len())?;
        self.inputs_encoder.forward(inputs)
    }

    /// `(n, d)` with `num_samples = None`, otherwise `(n, k, d)`
    pub fn encode(&self, inputs: &[Modality<Tensor>], num_samples: Option<usize>) -> Result<Tensor> {
        let context = self.encode_context(inputs)?;
        match num_samples {
            None => merge_leading_dims(&self.posterior.sample(1, Some(&context))?),
            Some(k) => self.posterior.sample(k, Some(&context)),
        }
    }

    /// x ~ p(x|z) for each modality
    pub fn decode(&self, z_nd: &Tensor, mean: bool) -> Result<Vec<Tensor>> {
        self.likelihoods
            .iter()
            .map(|likelihood| {
                if mean {
                    likelihood.mean(Some(z_nd))
                } else {
                    merge_leading_dims(&likelihood.sample(1, Some(z_nd))?)
                }
            })
            .collect()
    }
}

impl MultimodalVaeT for MultimodalVae {
    type Latent = Tensor;
    type Context = Tensor;

    fn num_modalities(&self) -> usize {
        self.likelihoods.len()
    }

    fn log_q_z_x(
        &self,
        inputs: &[Modality<Tensor>],
        num_samples: usize,
    ) -> Result<PosteriorSample<Tensor, Tensor>> {
        let context = self.encode_context(inputs)?;
        let (z, log_q) = self
            .posterior
            .sample_and_log_prob(num_samples, Some(&context))?;
        Ok(PosteriorSample {
            log_q: log_q.flatten_all()?,
            latent: merge_leading_dims(&z)?,
            context,
        })
    }

    fn log_q_z_given(&self, latent: &Tensor, context: &Tensor) -> Result<Tensor> {
        let context = align_rows(context, latent.dim(0)?)?;
        self.posterior.log_prob(latent, Some(&context))
    }

    fn log_p_z(&self, latent: &Tensor) -> Result<Tensor> {
        self.prior.log_prob(latent, None)
    }

    fn log_p_x_z(
        &self,
        inputs: &[Modality<Tensor>],
        latent: &Tensor,
        weights: &[f64],
        num_samples: usize,
    ) -> Result<Tensor> {
        check_num_modalities("inputs", self.likelihoods.len(), inputs.len())?;
        check_num_modalities("likelihood weights", self.likelihoods.len(), weights.len())?;

        let mut log_p = Tensor::zeros(latent.dim(0)?, latent.dtype(), latent.device())?;
        for ((x, likelihood), &w) in inputs
            .iter()
            .zip(self.likelihoods.iter())
            .zip(weights.iter())
        {
            if let Modality::Present(x) = x {
                let x = repeat_rows(x, num_samples)?;
                log_p = (log_p + (likelihood.log_prob(&x, Some(latent))? * w)?)?;
            }
        }
        Ok(log_p)
    }

    fn sample(&self, num_samples: usize, mean: bool) -> Result<Vec<Tensor>> {
        let z = self.prior.sample(num_samples, None)?;
        self.decode(&z, mean)
    }

    fn cross_reconstruct(
        &self,
        inputs: &[Tensor],
        num_samples: Option<usize>,
        mean: bool,
    ) -> Result<Vec<Tensor>> {
        check_cross_reconstruct(inputs.len(), self.num_modalities(), num_samples)?;
        let (x, y) = (&inputs[0], &inputs[1]);

        let z_x = self.encode(&[Modality::Present(x.clone()), Modality::Absent], None)?;
        let y_from_x = self.decode(&z_x, mean)?.swap_remove(1);

        let z_y = self.encode(&[Modality::Absent, Modality::Present(y.clone())], None)?;
        let x_from_y = self.decode(&z_y, mean)?.swap_remove(0);

        Ok(vec![x_from_y, y_from_x])
    }
}
