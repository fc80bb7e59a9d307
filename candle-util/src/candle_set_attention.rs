//! Attention over the set of present modalities.
//!
//! `MAB(X, Y)`: multihead attention block with queries from `X` and
//! keys/values from `Y`; `SAB(X) = MAB(X, X)`; `PMA(X) = MAB(S, X)` with
//! learned seed vectors `S`.

use candle_core::{Result, Tensor};
use candle_nn::{ops, Embedding, LayerNorm, Linear, Module, VarBuilder};

use crate::candle_modality::{present_or_fail, Modality};
use crate::candle_model_traits::FusionT;

pub struct MultiheadAttentionBlock {
    fc_q: Linear,
    fc_k: Linear,
    fc_v: Linear,
    fc_o: Linear,
    ln0: Option<LayerNorm>,
    ln1: Option<LayerNorm>,
    num_heads: usize,
    dim_v: usize,
}

impl MultiheadAttentionBlock {
    pub fn new(
        dim_q: usize,
        dim_k: usize,
        dim_v: usize,
        num_heads: usize,
        layer_norm: bool,
        vb: VarBuilder,
    ) -> Result<Self> {
        if num_heads == 0 || dim_v % num_heads != 0 {
            candle_core::bail!("{} heads cannot split dimension {}", num_heads, dim_v);
        }
        let (ln0, ln1) = if layer_norm {
            (
                Some(candle_nn::layer_norm(dim_v, 1e-5, vb.pp("ln0"))?),
                Some(candle_nn::layer_norm(dim_v, 1e-5, vb.pp("ln1"))?),
            )
        } else {
            (None, None)
        };
        Ok(Self {
            fc_q: candle_nn::linear(dim_q, dim_v, vb.pp("fc_q"))?,
            fc_k: candle_nn::linear(dim_k, dim_v, vb.pp("fc_k"))?,
            fc_v: candle_nn::linear(dim_k, dim_v, vb.pp("fc_v"))?,
            fc_o: candle_nn::linear(dim_v, dim_v, vb.pp("fc_o"))?,
            ln0,
            ln1,
            num_heads,
            dim_v,
        })
    }

    /// (b, m, h * e) -> (b, h, m, e)
    fn split_heads(&self, x: &Tensor) -> Result<Tensor> {
        let (b, m, _) = x.dims3()?;
        x.reshape((b, m, self.num_heads, self.dim_v / self.num_heads))?
            .transpose(1, 2)?
            .contiguous()
    }

    /// * `q_bmd` - queries (batch x m x dim_q)
    /// * `k_bsd` - keys and values (batch x s x dim_k)
    pub fn forward(&self, q_bmd: &Tensor, k_bsd: &Tensor) -> Result<Tensor> {
        let (b, m, _) = q_bmd.dims3()?;

        let q = self.split_heads(&self.fc_q.forward(q_bmd)?)?;
        let k = self.split_heads(&self.fc_k.forward(k_bsd)?)?;
        let v = self.split_heads(&self.fc_v.forward(k_bsd)?)?;

        let scale = (self.dim_v as f64).sqrt();
        let logits = (q.matmul(&k.t()?.contiguous()?)? / scale)?;
        let attn = ops::softmax_last_dim(&logits)?;

        let o = (q + attn.matmul(&v)?)?
            .transpose(1, 2)?
            .contiguous()?
            .reshape((b, m, self.dim_v))?;

        let o = match &self.ln0 {
            Some(ln) => ln.forward(&o)?,
            None => o,
        };
        let o = (&o + self.fc_o.forward(&o)?.relu()?)?;
        match &self.ln1 {
            Some(ln) => ln.forward(&o),
            None => Ok(o),
        }
    }
}

/// Self-attention block
pub struct SetAttentionBlock {
    mab: MultiheadAttentionBlock,
}

impl SetAttentionBlock {
    pub fn new(
        dim_in: usize,
        dim_out: usize,
        num_heads: usize,
        layer_norm: bool,
        vb: VarBuilder,
    ) -> Result<Self> {
        Ok(Self {
            mab: MultiheadAttentionBlock::new(dim_in, dim_in, dim_out, num_heads, layer_norm, vb)?,
        })
    }
}

impl Module for SetAttentionBlock {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        self.mab.forward(x, x)
    }
}

/// Pooling by multihead attention onto learned seeds
pub struct PoolingByAttention {
    seeds: Tensor,
    mab: MultiheadAttentionBlock,
}

impl PoolingByAttention {
    pub fn new(
        dim: usize,
        num_heads: usize,
        num_seeds: usize,
        layer_norm: bool,
        vb: VarBuilder,
    ) -> Result<Self> {
        let seeds = vb.get_with_hints(
            (1, num_seeds, dim),
            "seeds",
            candle_nn::init::DEFAULT_KAIMING_NORMAL,
        )?;
        Ok(Self {
            seeds,
            mab: MultiheadAttentionBlock::new(dim, dim, dim, num_heads, layer_norm, vb.pp("mab"))?,
        })
    }
}

impl Module for PoolingByAttention {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let (b, _, _) = x.dims3()?;
        let (_, num_seeds, dim) = self.seeds.dims3()?;
        let seeds = self.seeds.broadcast_as((b, num_seeds, dim))?.contiguous()?;
        self.mab.forward(&seeds, x)
    }
}

#[derive(Clone, Debug)]
pub struct SetTransformerArgs {
    pub input_dim: usize,
    pub output_dim: usize,
    pub hidden_dim: usize,
    pub num_hidden_layers: usize,
    pub num_heads: usize,
    pub layer_norm: bool,
    /// learn one embedding per modality, added to its features
    pub num_modality_embeddings: Option<usize>,
}

/// SAB stack over the present slots, PMA with one seed, then a linear
/// output layer
pub struct SetTransformer {
    embeddings: Option<Embedding>,
    enc: Vec<SetAttentionBlock>,
    pool: PoolingByAttention,
    out: Linear,
}

impl SetTransformer {
    pub fn new(args: &SetTransformerArgs, vb: VarBuilder) -> Result<Self> {
        let embeddings = match args.num_modality_embeddings {
            Some(num) => Some(candle_nn::embedding(num, args.input_dim, vb.pp("embs"))?),
            None => None,
        };

        let mut enc = vec![SetAttentionBlock::new(
            args.input_dim,
            args.hidden_dim,
            args.num_heads,
            args.layer_norm,
            vb.pp("enc.0"),
        )?];
        for j in 0..args.num_hidden_layers {
            enc.push(SetAttentionBlock::new(
                args.hidden_dim,
                args.hidden_dim,
                args.num_heads,
                args.layer_norm,
                vb.pp(format!("enc.{}", j + 1)),
            )?);
        }

        let pool = PoolingByAttention::new(
            args.hidden_dim,
            args.num_heads,
            1,
            args.layer_norm,
            vb.pp("pma"),
        )?;
        let out = candle_nn::linear(args.hidden_dim, args.output_dim, vb.pp("out"))?;

        Ok(Self {
            embeddings,
            enc,
            pool,
            out,
        })
    }
}

impl FusionT for SetTransformer {
    fn fuse(&self, feats: &[Modality<Tensor>]) -> Result<Tensor> {
        present_or_fail(feats, "set transformer")?;

        let mut x_vec = Vec::with_capacity(feats.len());
        for (idx, x) in feats.iter().enumerate() {
            let Modality::Present(x) = x else { continue };
            let x = match &self.embeddings {
                Some(embs) => {
                    let idx = Tensor::new(&[idx as u32], x.device())?;
                    x.broadcast_add(&embs.forward(&idx)?)?
                }
                None => x.clone(),
            };
            x_vec.push(x);
        }

        // n x set x d
        let mut h = Tensor::stack(&x_vec, 1)?;
        for sab in self.enc.iter() {
            h = sab.forward(&h)?;
        }
        let pooled = self.pool.forward(&h)?;
        self.out.forward(&pooled)?.squeeze(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn args(embeddings: Option<usize>) -> SetTransformerArgs {
        SetTransformerArgs {
            input_dim: 3,
            output_dim: 5,
            hidden_dim: 8,
            num_hidden_layers: 1,
            num_heads: 2,
            layer_norm: true,
            num_modality_embeddings: embeddings,
        }
    }

    #[test]
    fn pooled_output_ignores_order() -> Result<()> {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        let st = SetTransformer::new(&args(None), vb)?;

        let a = Tensor::new(&[[0.3f32, -0.2, 1.0], [0.0, 1.0, 0.5]], &dev)?;
        let b = Tensor::new(&[[-1.0f32, 0.7, 0.1], [0.4, 0.4, -0.4]], &dev)?;

        let ab = st.fuse(&[Modality::Present(a.clone()), Modality::Present(b.clone())])?;
        let ba = st.fuse(&[Modality::Present(b), Modality::Present(a.clone())])?;
        assert_eq!(ab.dims(), &[2, 5]);

        let ab: Vec<f32> = ab.flatten_all()?.to_vec1()?;
        let ba: Vec<f32> = ba.flatten_all()?.to_vec1()?;
        for (x, y) in ab.iter().zip(ba.iter()) {
            assert_abs_diff_eq!(x, y, epsilon = 1e-5);
        }

        let single = st.fuse(&[Modality::Absent, Modality::Present(a)])?;
        assert_eq!(single.dims(), &[2, 5]);
        Ok(())
    }

    #[test]
    fn embeddings_leave_inputs_untouched() -> Result<()> {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        let st = SetTransformer::new(&args(Some(2)), vb)?;

        let a = Tensor::new(&[[0.3f32, -0.2, 1.0]], &dev)?;
        let before: Vec<f32> = a.flatten_all()?.to_vec1()?;
        st.fuse(&[Modality::Present(a.clone()), Modality::Absent])?;
        let after: Vec<f32> = a.flatten_all()?.to_vec1()?;
        assert_eq!(before, after);
        Ok(())
    }
}
