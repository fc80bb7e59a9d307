use candle_core::{Result, Tensor};
use candle_nn::{Linear, Module, VarBuilder};
use serde::Deserialize;

use crate::candle_aux_layers::{stack_relu_linear, StackLayers};
use crate::candle_modality::{check_num_modalities, present_or_fail, Modality};
use crate::candle_model_traits::FusionT;

/// Permutation-invariant reduction over the set axis
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SetPooling {
    #[default]
    Max,
    Mean,
    Sum,
}

impl SetPooling {
    pub fn pool(&self, x: &Tensor, dim: usize) -> Result<Tensor> {
        match self {
            SetPooling::Max => x.max(dim),
            SetPooling::Mean => x.mean(dim),
            SetPooling::Sum => x.sum(dim),
        }
    }
}

/// Concatenate all slots along the feature axis, filling absent ones
/// with zeros, then apply a feed-forward network
pub struct ConcatFusion {
    input_dims: Vec<usize>,
    fc: StackLayers<Linear>,
}

impl ConcatFusion {
    /// * `input_dims` - feature dimension of each slot
    /// * `output_dim` - fused dimension
    /// * `hidden` - hidden layer sizes
    pub fn new(
        input_dims: &[usize],
        output_dim: usize,
        hidden: &[usize],
        vb: VarBuilder,
    ) -> Result<Self> {
        let total: usize = input_dims.iter().sum();
        Ok(Self {
            input_dims: input_dims.to_vec(),
            fc: stack_relu_linear(total, output_dim, hidden, vb)?,
        })
    }
}

impl FusionT for ConcatFusion {
    fn fuse(&self, feats: &[Modality<Tensor>]) -> Result<Tensor> {
        check_num_modalities("concat inputs", self.input_dims.len(), feats.len())?;
        let sample = present_or_fail(feats, "concat fusion")?[0];
        let n = sample.dim(0)?;

        let padded = feats
            .iter()
            .zip(self.input_dims.iter())
            .map(|(x, &d)| match x {
                Modality::Present(x) => Ok(x.clone()),
                Modality::Absent => Tensor::zeros((n, d), sample.dtype(), sample.device()),
            })
            .collect::<Result<Vec<_>>>()?;

        self.fc.forward(&Tensor::cat(&padded, 1)?)
    }
}

/// Pool the present slots, then apply a feed-forward network. Every
/// slot must share the same feature dimension.
pub struct SetEncoder {
    pooling: SetPooling,
    fc: StackLayers<Linear>,
}

impl SetEncoder {
    pub fn new(
        input_dim: usize,
        output_dim: usize,
        hidden: &[usize],
        pooling: SetPooling,
        vb: VarBuilder,
    ) -> Result<Self> {
        Ok(Self {
            pooling,
            fc: stack_relu_linear(input_dim, output_dim, hidden, vb)?,
        })
    }
}

impl FusionT for SetEncoder {
    fn fuse(&self, feats: &[Modality<Tensor>]) -> Result<Tensor> {
        let present: Vec<Tensor> = present_or_fail(feats, "set encoder")?
            .into_iter()
            .cloned()
            .collect();
        let pooled = self.pooling.pool(&Tensor::stack(&present, 0)?, 0)?;
        self.fc.forward(&pooled)
    }
}

/// Element-wise encoder, pooling over the set, then a decoder
pub struct DeepSet {
    enc: StackLayers<Linear>,
    dec: StackLayers<Linear>,
    pooling: SetPooling,
}

impl DeepSet {
    /// Variables under `enc` and `dec`
    pub fn new(
        input_dim: usize,
        output_dim: usize,
        hidden_dim: usize,
        num_enc_layers: usize,
        num_dec_layers: usize,
        pooling: SetPooling,
        vb: VarBuilder,
    ) -> Result<Self> {
        let enc = stack_relu_linear(
            input_dim,
            hidden_dim,
            &vec![hidden_dim; num_enc_layers],
            vb.pp("enc"),
        )?;
        let dec = stack_relu_linear(
            hidden_dim,
            output_dim,
            &vec![hidden_dim; num_dec_layers],
            vb.pp("dec"),
        )?;
        Ok(Self { enc, dec, pooling })
    }
}

impl FusionT for DeepSet {
    fn fuse(&self, feats: &[Modality<Tensor>]) -> Result<Tensor> {
        let present: Vec<Tensor> = present_or_fail(feats, "deep set")?
            .into_iter()
            .cloned()
            .collect();
        // n x set x d
        let x_nsd = Tensor::stack(&present, 1)?;
        let h_nsh = self.enc.forward(&x_nsd)?;
        self.dec.forward(&self.pooling.pool(&h_nsh, 1)?)
    }
}
