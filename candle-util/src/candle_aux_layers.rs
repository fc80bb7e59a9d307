use candle_core::{Result, Tensor};
use candle_nn::{Activation, Linear, Module, VarBuilder};

/// build a stack of alternating `M` and `A` layers
pub struct StackLayers<M>
where
    M: Module,
{
    module_layers: Vec<M>,
    activation_layers: Vec<Option<Activation>>,
}

impl<M> Module for StackLayers<M>
where
    M: Module,
{
    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        let mut x = input.clone();
        for (module, activation) in self.module_layers.iter().zip(self.activation_layers.iter()) {
            x = module.forward(&x)?;
            if let Some(activation) = activation {
                x = activation.forward(&x)?;
            }
        }
        Ok(x)
    }
}

impl<M> StackLayers<M>
where
    M: Module,
{
    pub fn new() -> Self {
        Self {
            module_layers: Vec::new(),
            activation_layers: Vec::new(),
        }
    }

    /// Appends a layer after all the current layers.
    pub fn push_with_act(&mut self, layer: M, activation: Activation) {
        self.module_layers.push(layer);
        self.activation_layers.push(Some(activation));
    }

    pub fn push(&mut self, layer: M) {
        self.module_layers.push(layer);
        self.activation_layers.push(None);
    }

    pub fn len(&self) -> usize {
        self.module_layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.module_layers.is_empty()
    }
}

impl<M> Default for StackLayers<M>
where
    M: Module,
{
    fn default() -> Self {
        Self::new()
    }
}

/// A feed-forward network `in_dim -> hidden[0] -> ... -> out_dim` with
/// ReLU between layers and a linear output.
///
/// Variables: `fc.{}.weight`, `fc.{}.bias` where {} is the layer index
pub fn stack_relu_linear(
    in_dim: usize,
    out_dim: usize,
    hidden: &[usize],
    vb: VarBuilder,
) -> Result<StackLayers<Linear>> {
    let mut fc = StackLayers::<Linear>::new();
    let mut prev_dim = in_dim;
    for (j, &next_dim) in hidden.iter().enumerate() {
        fc.push_with_act(
            candle_nn::linear(prev_dim, next_dim, vb.pp(format!("fc.{}", j)))?,
            Activation::Relu,
        );
        prev_dim = next_dim;
    }
    fc.push(candle_nn::linear(
        prev_dim,
        out_dim,
        vb.pp(format!("fc.{}", hidden.len())),
    )?);
    Ok(fc)
}

/// Pass-through layer, e.g., a per-modality encoder when the fusion
/// module consumes raw inputs
#[derive(Clone, Copy, Debug, Default)]
pub struct Identity;

impl Module for Identity {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        Ok(xs.clone())
    }
}
