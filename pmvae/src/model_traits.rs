use crate::common::*;

/// Latents drawn from the posterior together with what produced them
///
/// * `log_q` - posterior log density of each draw (n * k)
/// * `latent` - draws, flattened so that row `b * k + j` is the `j`-th
///   draw for example `b`
/// * `context` - posterior parameters, one row per example (n)
#[derive(Clone, Debug)]
pub struct PosteriorSample<L, C> {
    pub log_q: Tensor,
    pub latent: L,
    pub context: C,
}

/// Log-density primitives shared by the multimodal VAEs. All ELBO
/// estimators are written against this trait.
pub trait MultimodalVaeT {
    type Latent: Clone;
    type Context: Clone;

    fn num_modalities(&self) -> usize;

    /// Encode `inputs`, draw `num_samples` latents per row and score
    /// them under the posterior
    fn log_q_z_x(
        &self,
        inputs: &[Modality<Tensor>],
        num_samples: usize,
    ) -> Result<PosteriorSample<Self::Latent, Self::Context>>;

    /// Score already drawn latents under the posterior given by
    /// `context`, without resampling. Context rows are repeated to
    /// match the latent rows.
    fn log_q_z_given(&self, latent: &Self::Latent, context: &Self::Context) -> Result<Tensor>;

    /// log p(z)
    fn log_p_z(&self, latent: &Self::Latent) -> Result<Tensor>;

    /// sum_i w(i) * log p(x_i | z) over the present modalities
    ///
    /// * `inputs` - `n` rows per modality, repeated `num_samples` times
    ///   to line up with the latent rows
    fn log_p_x_z(
        &self,
        inputs: &[Modality<Tensor>],
        latent: &Self::Latent,
        weights: &[f64],
        num_samples: usize,
    ) -> Result<Tensor>;

    /// Draw latents from the prior and decode, one output per modality
    fn sample(&self, num_samples: usize, mean: bool) -> Result<Vec<Tensor>>;

    /// `x -> z_x -> y` and `y -> z_y -> x` for a two-modality model
    ///
    /// # Returns `[x_from_y, y_from_x]`
    fn cross_reconstruct(
        &self,
        inputs: &[Tensor],
        num_samples: Option<usize>,
        mean: bool,
    ) -> Result<Vec<Tensor>>;
}
