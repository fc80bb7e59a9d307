use candle_core::{Result, Tensor};
use candle_nn::{Activation, Linear, Module, VarBuilder};

use crate::candle_aux_layers::{stack_relu_linear, StackLayers};
use crate::candle_modality::{check_num_modalities, present_or_fail, Modality};
use crate::candle_model_traits::*;

/// Feed-forward encoder for one modality
pub struct MlpEncoder {
    fc: StackLayers<Linear>,
    dim_obs: usize,
    dim_out: usize,
}

impl MlpEncoder {
    pub fn new(dim_obs: usize, dim_out: usize, hidden: &[usize], vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            fc: stack_relu_linear(dim_obs, dim_out, hidden, vb)?,
            dim_obs,
            dim_out,
        })
    }

    pub fn dim_obs(&self) -> usize {
        self.dim_obs
    }

    pub fn dim_out(&self) -> usize {
        self.dim_out
    }
}

impl Module for MlpEncoder {
    fn forward(&self, x_nd: &Tensor) -> Result<Tensor> {
        self.fc.forward(x_nd)
    }
}

/// One modality's encoder with a shared trunk and two heads:
/// `2 * m_dim` parameters of the modality-specific posterior and
/// `s_feature_dim` features for the shared-space fusion
pub struct PartitionedMlpEncoder {
    trunk: StackLayers<Linear>,
    m_head: Linear,
    s_head: Linear,
}

impl PartitionedMlpEncoder {
    /// Variables: `fc.{}` (trunk), `m`, `s`
    pub fn new(
        dim_obs: usize,
        m_dim: usize,
        s_feature_dim: usize,
        hidden: &[usize],
        vb: VarBuilder,
    ) -> Result<Self> {
        let mut trunk = StackLayers::<Linear>::new();
        let mut prev_dim = dim_obs;
        for (j, &next_dim) in hidden.iter().enumerate() {
            trunk.push_with_act(
                candle_nn::linear(prev_dim, next_dim, vb.pp(format!("fc.{}", j)))?,
                Activation::Relu,
            );
            prev_dim = next_dim;
        }
        Ok(Self {
            trunk,
            m_head: candle_nn::linear(prev_dim, 2 * m_dim, vb.pp("m"))?,
            s_head: candle_nn::linear(prev_dim, s_feature_dim, vb.pp("s"))?,
        })
    }
}

impl SplitEncoderT for PartitionedMlpEncoder {
    fn forward_split(&self, x_nd: &Tensor) -> Result<(Tensor, Tensor)> {
        let h_nh = self.trunk.forward(x_nd)?;
        Ok((self.m_head.forward(&h_nh)?, self.s_head.forward(&h_nh)?))
    }
}

/// Per-modality encoders followed by a fusion module
pub struct MultimodalEncoder {
    encoders: Vec<Box<dyn Module>>,
    fusion: Box<dyn FusionT>,
}

impl MultimodalEncoder {
    pub fn new(encoders: Vec<Box<dyn Module>>, fusion: Box<dyn FusionT>) -> Self {
        Self { encoders, fusion }
    }
}

impl MultimodalEncoderT for MultimodalEncoder {
    fn forward(&self, x_vec: &[Modality<Tensor>]) -> Result<Tensor> {
        check_num_modalities("encoder inputs", self.encoders.len(), x_vec.len())?;
        present_or_fail(x_vec, "multimodal encoder")?;
        let feats = x_vec
            .iter()
            .zip(self.encoders.iter())
            .map(|(x, enc)| x.as_ref().try_map(|x| enc.forward(x)))
            .collect::<Result<Vec<_>>>()?;
        self.fusion.fuse(&feats)
    }

    fn num_modalities(&self) -> usize {
        self.encoders.len()
    }
}

/// Per-modality split encoders; only the shared-space features are
/// fused while modality-specific contexts stay per modality
pub struct PartitionedMultimodalEncoder {
    encoders: Vec<Box<dyn SplitEncoderT>>,
    fusion: Box<dyn FusionT>,
}

impl PartitionedMultimodalEncoder {
    pub fn new(encoders: Vec<Box<dyn SplitEncoderT>>, fusion: Box<dyn FusionT>) -> Self {
        Self { encoders, fusion }
    }
}

impl PartitionedEncoderT for PartitionedMultimodalEncoder {
    fn forward(&self, x_vec: &[Modality<Tensor>]) -> Result<PartitionedContext> {
        check_num_modalities("encoder inputs", self.encoders.len(), x_vec.len())?;
        present_or_fail(x_vec, "partitioned encoder")?;

        let mut m = Vec::with_capacity(x_vec.len());
        let mut s_feats = Vec::with_capacity(x_vec.len());
        for (x, enc) in x_vec.iter().zip(self.encoders.iter()) {
            match x {
                Modality::Present(x) => {
                    let (m_ctx, s_feat) = enc.forward_split(x)?;
                    m.push(Modality::Present(m_ctx));
                    s_feats.push(Modality::Present(s_feat));
                }
                Modality::Absent => {
                    m.push(Modality::Absent);
                    s_feats.push(Modality::Absent);
                }
            }
        }

        Ok(Partitioned {
            m,
            s: self.fusion.fuse(&s_feats)?,
        })
    }

    fn num_modalities(&self) -> usize {
        self.encoders.len()
    }
}
