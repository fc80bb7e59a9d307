use candle_core::{Result, Tensor};

use crate::candle_modality::Modality;

/// Modality-specific parts `m` (one slot per modality, absent where
/// the modality was not observed) and a shared part `s` that is always
/// present.
#[derive(Clone, Debug)]
pub struct Partitioned<T> {
    pub m: Vec<Modality<T>>,
    pub s: T,
}

/// Sampled latents `{m, s}`
pub type PartitionedLatent = Partitioned<Tensor>;

/// Posterior contexts `{m, s}` as produced by an encoder
pub type PartitionedContext = Partitioned<Tensor>;

impl<T> Partitioned<T> {
    pub fn num_modalities(&self) -> usize {
        self.m.len()
    }
}

/// Combine per-modality features into one context row per example
pub trait FusionT {
    /// * `feats` - per-modality features (n x d_i), absent if missing
    ///
    /// # Returns fused context (n x d_out)
    fn fuse(&self, feats: &[Modality<Tensor>]) -> Result<Tensor>;
}

pub trait MultimodalEncoderT {
    /// Map an ordered list of inputs to one posterior context
    ///
    /// * `x_vec` - per-modality data (n x d_i), absent if missing
    fn forward(&self, x_vec: &[Modality<Tensor>]) -> Result<Tensor>;

    fn num_modalities(&self) -> usize;
}

pub trait PartitionedEncoderT {
    /// Map an ordered list of inputs to modality-specific contexts and
    /// a fused shared context
    ///
    /// * `x_vec` - per-modality data (n x d_i), absent if missing
    ///
    /// # Returns `{m, s}` where `m[i]` is absent iff `x_vec[i]` is
    fn forward(&self, x_vec: &[Modality<Tensor>]) -> Result<PartitionedContext>;

    fn num_modalities(&self) -> usize;
}

pub trait SplitEncoderT {
    /// An encoder that spits out two results for one modality
    ///
    /// # Returns `(m_context, s_feature)`
    /// * `m_context` - parameters of the modality-specific posterior
    /// * `s_feature` - input to the shared-space fusion
    fn forward_split(&self, x_nd: &Tensor) -> Result<(Tensor, Tensor)>;
}
