//! Named component builders.
//!
//! Experiments refer to priors, posteriors, likelihoods, fusion modules
//! and objectives by string key. [`Registry::resolve`] turns an
//! [`ExperimentConfig`] into a model, its objective and the variables
//! to optimize. Unknown keys fail with
//! [`ModelError::UnknownRegistryKey`].

use crate::common::*;
use crate::config::*;
use crate::mvae_model::MultimodalVae;
use crate::objectives::*;
use crate::pmvae_model::{LatentCoupling, PartitionedMultimodalVae};

use candle_nn::{Module, VarBuilder, VarMap};
use candle_util::candle_aux_layers::stack_relu_linear;
use candle_util::candle_fusion::{ConcatFusion, DeepSet, SetEncoder, SetPooling};
use candle_util::candle_model_traits::{FusionT, SplitEncoderT};
use candle_util::candle_multimodal_encoder::*;
use candle_util::candle_product_of_experts::PoeFusion;
use candle_util::candle_set_attention::{SetTransformer, SetTransformerArgs};
use candle_util::dist::*;
use std::collections::BTreeMap;

/// What a distribution builder gets to work with
///
/// * `dim` - dimension of the variable
/// * `context_dim` - dimension of the conditioning rows (0 if none)
/// * `hidden` - hidden layers of any network it builds
/// * `log_std` - fixed noise scale, for likelihoods that take one
pub struct DistArgs<'a> {
    pub dim: usize,
    pub context_dim: usize,
    pub hidden: &'a [usize],
    pub log_std: Option<f64>,
    pub vb: VarBuilder<'a>,
}

pub type DistFactory = fn(DistArgs<'_>) -> Result<BoxedDist>;

pub struct FusionArgs<'a> {
    pub num_modalities: usize,
    pub feature_dim: usize,
    pub output_dim: usize,
    pub config: &'a FusionConfig,
    pub vb: VarBuilder<'a>,
}

pub type FusionFactory = fn(FusionArgs<'_>) -> Result<Box<dyn FusionT>>;

#[derive(Clone, Copy)]
pub struct FusionEntry {
    pub build: FusionFactory,
    /// consumes `[mean, log_std]` experts, so per-modality features are
    /// `2 * latent_dim` wide
    pub gaussian_experts: bool,
}

pub type JointObjectiveFn = ObjectiveFn<MultimodalVae>;

pub type PartitionedObjectiveFn = ObjectiveFn<PartitionedMultimodalVae>;

/// An objective, the latent coupling its decoders must be built for,
/// and, when it makes sense, its single-latent counterpart
#[derive(Clone, Copy)]
pub struct ObjectiveEntry {
    pub partitioned: PartitionedObjectiveFn,
    pub joint: Option<JointObjectiveFn>,
    pub coupling: LatentCoupling,
}

pub enum ResolvedModel {
    Joint {
        model: MultimodalVae,
        objective: JointObjectiveFn,
    },
    Partitioned {
        model: PartitionedMultimodalVae,
        objective: PartitionedObjectiveFn,
    },
}

/// A built model; every trainable variable lives in `varmap`
pub struct ResolvedExperiment {
    pub model: ResolvedModel,
    pub varmap: VarMap,
    pub elbo: ElboConfig,
    pub objective_key: String,
}

pub struct Registry {
    priors: BTreeMap<String, DistFactory>,
    posteriors: BTreeMap<String, DistFactory>,
    likelihoods: BTreeMap<String, DistFactory>,
    fusions: BTreeMap<String, FusionEntry>,
    objectives: BTreeMap<String, ObjectiveEntry>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

fn lookup<T: Copy>(map: &BTreeMap<String, T>, kind: &str, key: &str) -> Result<T> {
    map.get(key).copied().ok_or_else(|| {
        ModelError::UnknownRegistryKey {
            kind: kind.to_string(),
            key: key.to_string(),
        }
        .into()
    })
}

impl Registry {
    pub fn empty() -> Self {
        Self {
            priors: BTreeMap::new(),
            posteriors: BTreeMap::new(),
            likelihoods: BTreeMap::new(),
            fusions: BTreeMap::new(),
            objectives: BTreeMap::new(),
        }
    }

    pub fn with_builtins() -> Self {
        let mut reg = Self::empty();

        reg.register_prior("standard_normal", build_standard_normal);
        reg.register_prior("conditional_normal", build_conditional_normal);
        reg.register_posterior("diagonal_normal", build_diagonal_normal);
        reg.register_likelihood("bernoulli", build_bernoulli);
        reg.register_likelihood("gaussian", build_gaussian);

        reg.register_fusion("poe", build_poe, true);
        reg.register_fusion("concat", build_concat, false);
        reg.register_fusion("set_max", build_set_max, false);
        reg.register_fusion("set_mean", build_set_mean, false);
        reg.register_fusion("set_sum", build_set_sum, false);
        reg.register_fusion("deep_set", build_deep_set, false);
        reg.register_fusion("set_transformer", build_set_transformer, false);

        use LatentCoupling::*;
        let generic: [(&str, PartitionedObjectiveFn, JointObjectiveFn); 3] = [
            (
                "elbo",
                stochastic_elbo::<PartitionedMultimodalVae>,
                stochastic_elbo::<MultimodalVae>,
            ),
            ("mvae", mvae_elbo::<PartitionedMultimodalVae>, mvae_elbo::<MultimodalVae>),
            (
                "vaevae",
                vaevae_elbo::<PartitionedMultimodalVae>,
                vaevae_elbo::<MultimodalVae>,
            ),
        ];
        for (key, partitioned, joint) in generic {
            reg.register_objective(
                key,
                ObjectiveEntry {
                    partitioned,
                    joint: Some(joint),
                    coupling: Independent,
                },
            );
        }

        let partitioned: [(&str, PartitionedObjectiveFn, LatentCoupling); 6] = [
            ("pmvae", pmvae_elbo, Independent),
            ("pmvaevae", pmvaevae_elbo, Independent),
            ("hier_pmvae", hier_pmvae_elbo, Hierarchical),
            ("hier_pmvaevae", hier_pmvaevae_elbo, Hierarchical),
            ("hier_pmvae_v2", hier_pmvae_v2_elbo, HierarchicalSpecific),
            ("hier_pmvaevae_v2", hier_pmvaevae_v2_elbo, HierarchicalSpecific),
        ];
        for (key, objective, coupling) in partitioned {
            reg.register_objective(
                key,
                ObjectiveEntry {
                    partitioned: objective,
                    joint: None,
                    coupling,
                },
            );
        }
        reg
    }

    pub fn register_prior(&mut self, key: &str, factory: DistFactory) {
        self.priors.insert(key.to_string(), factory);
    }

    pub fn register_posterior(&mut self, key: &str, factory: DistFactory) {
        self.posteriors.insert(key.to_string(), factory);
    }

    pub fn register_likelihood(&mut self, key: &str, factory: DistFactory) {
        self.likelihoods.insert(key.to_string(), factory);
    }

    pub fn register_fusion(&mut self, key: &str, build: FusionFactory, gaussian_experts: bool) {
        self.fusions.insert(
            key.to_string(),
            FusionEntry {
                build,
                gaussian_experts,
            },
        );
    }

    pub fn register_objective(&mut self, key: &str, entry: ObjectiveEntry) {
        self.objectives.insert(key.to_string(), entry);
    }

    pub fn prior(&self, key: &str) -> Result<DistFactory> {
        lookup(&self.priors, "prior", key)
    }

    pub fn posterior(&self, key: &str) -> Result<DistFactory> {
        lookup(&self.posteriors, "posterior", key)
    }

    pub fn likelihood(&self, key: &str) -> Result<DistFactory> {
        lookup(&self.likelihoods, "likelihood", key)
    }

    pub fn fusion(&self, key: &str) -> Result<FusionEntry> {
        lookup(&self.fusions, "fusion", key)
    }

    pub fn objective(&self, key: &str) -> Result<ObjectiveEntry> {
        lookup(&self.objectives, "objective", key)
    }

    /// Registered keys by component kind, sorted
    pub fn keys(&self) -> Vec<(&'static str, Vec<&str>)> {
        fn names<T>(map: &BTreeMap<String, T>) -> Vec<&str> {
            map.keys().map(|k| k.as_str()).collect()
        }
        vec![
            ("prior", names(&self.priors)),
            ("posterior", names(&self.posteriors)),
            ("likelihood", names(&self.likelihoods)),
            ("fusion", names(&self.fusions)),
            ("objective", names(&self.objectives)),
        ]
    }

    /// Build the model described by `config` with fresh variables on
    /// `device`
    pub fn resolve(
        &self,
        config: &ExperimentConfig,
        dtype: DType,
        device: &Device,
    ) -> anyhow::Result<ResolvedExperiment> {
        config.validate()?;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, dtype, device);
        let entry = self.objective(&config.objective)?;

        let model = match config.model {
            ModelKind::Partitioned => ResolvedModel::Partitioned {
                model: self.build_partitioned(config, entry.coupling, vb)?,
                objective: entry.partitioned,
            },
            ModelKind::Joint => {
                let Some(objective) = entry.joint else {
                    return Err(candle_core::Error::from(ModelError::Unsupported {
                        operation: format!("objective `{}`", config.objective),
                        reason: "needs a partitioned model".into(),
                    })
                    .into());
                };
                ResolvedModel::Joint {
                    model: self.build_joint(config, vb)?,
                    objective,
                }
            }
        };

        info!(
            "built a {:?} model with {} modalities for `{}`",
            config.model,
            config.num_modalities(),
            config.objective
        );

        Ok(ResolvedExperiment {
            model,
            varmap,
            elbo: config.elbo.clone(),
            objective_key: config.objective.clone(),
        })
    }

    /// Modality-specific latents, a shared latent, and likelihoods
    /// reading whatever `coupling` feeds them
    pub fn build_partitioned(
        &self,
        config: &ExperimentConfig,
        coupling: LatentCoupling,
        vb: VarBuilder,
    ) -> Result<PartitionedMultimodalVae> {
        let m_dim = config.m_latent_dim;
        let s_dim = config.s_latent_dim;
        let fusion_entry = self.fusion(&config.fusion.key)?;
        let feature_dim = if fusion_entry.gaussian_experts {
            2 * s_dim
        } else {
            config.fusion.feature_dim
        };

        let encoders = config
            .modalities
            .iter()
            .enumerate()
            .map(|(i, modality)| -> Result<Box<dyn SplitEncoderT>> {
                Ok(Box::new(PartitionedMlpEncoder::new(
                    modality.dim,
                    m_dim,
                    feature_dim,
                    &config.encoder_hidden,
                    vb.pp(format!("encoder.{}", i)),
                )?))
            })
            .collect::<Result<Vec<_>>>()?;

        let fusion = (fusion_entry.build)(FusionArgs {
            num_modalities: config.num_modalities(),
            feature_dim,
            output_dim: 2 * s_dim,
            config: &config.fusion,
            vb: vb.pp("fusion"),
        })?;

        let s_prior = (self.prior(&config.s_prior)?)(DistArgs {
            dim: s_dim,
            context_dim: 0,
            hidden: &config.decoder_hidden,
            log_std: None,
            vb: vb.pp("s_prior"),
        })?;

        let s_posterior = (self.posterior(&config.posterior)?)(DistArgs {
            dim: s_dim,
            context_dim: 2 * s_dim,
            hidden: &config.encoder_hidden,
            log_std: None,
            vb: vb.pp("s_posterior"),
        })?;

        let m_prior = self.prior(&config.m_prior)?;
        let m_posterior = self.posterior(&config.posterior)?;
        let likelihood_context_dim = coupling.likelihood_context_dim(m_dim, s_dim);

        let mut m_priors = vec![];
        let mut m_posteriors = vec![];
        let mut likelihoods = vec![];

        for (i, modality) in config.modalities.iter().enumerate() {
            let prior = m_prior(DistArgs {
                dim: m_dim,
                context_dim: if coupling.conditions_m_on_s() { s_dim } else { 0 },
                hidden: &config.decoder_hidden,
                log_std: None,
                vb: vb.pp(format!("m_prior.{}", i)),
            })?;
            // an unconditional prior would ignore s and leave m independent
            if coupling.conditions_m_on_s() && !prior.is_conditional() {
                return Err(ModelError::Unsupported {
                    operation: format!("m prior `{}`", config.m_prior),
                    reason: format!(
                        "{:?} coupling needs a prior conditioned on s, e.g. conditional_normal",
                        coupling
                    ),
                }
                .into());
            }
            m_priors.push(prior);

            m_posteriors.push(m_posterior(DistArgs {
                dim: m_dim,
                context_dim: 2 * m_dim,
                hidden: &config.encoder_hidden,
                log_std: None,
                vb: vb.pp(format!("m_posterior.{}", i)),
            })?);

            likelihoods.push((self.likelihood(&modality.likelihood)?)(DistArgs {
                dim: modality.dim,
                context_dim: likelihood_context_dim,
                hidden: &config.decoder_hidden,
                log_std: modality.log_std,
                vb: vb.pp(format!("likelihood.{}", i)),
            })?);
        }

        let inputs_encoder = PartitionedMultimodalEncoder::new(encoders, fusion);

        Ok(PartitionedMultimodalVae::new(
            s_prior,
            m_priors,
            s_posterior,
            m_posteriors,
            likelihoods,
            Box::new(inputs_encoder),
        )?
        .with_coupling(coupling))
    }

    /// One latent of dimension `s_latent_dim` shared by every modality
    pub fn build_joint(&self, config: &ExperimentConfig, vb: VarBuilder) -> Result<MultimodalVae> {
        let z_dim = config.s_latent_dim;
        let fusion_entry = self.fusion(&config.fusion.key)?;
        let feature_dim = if fusion_entry.gaussian_experts {
            2 * z_dim
        } else {
            config.fusion.feature_dim
        };

        let encoders = config
            .modalities
            .iter()
            .enumerate()
            .map(|(i, modality)| -> Result<Box<dyn Module>> {
                Ok(Box::new(MlpEncoder::new(
                    modality.dim,
                    feature_dim,
                    &config.encoder_hidden,
                    vb.pp(format!("encoder.{}", i)),
                )?))
            })
            .collect::<Result<Vec<_>>>()?;

        let fusion = (fusion_entry.build)(FusionArgs {
            num_modalities: config.num_modalities(),
            feature_dim,
            output_dim: 2 * z_dim,
            config: &config.fusion,
            vb: vb.pp("fusion"),
        })?;

        let prior = (self.prior(&config.s_prior)?)(DistArgs {
            dim: z_dim,
            context_dim: 0,
            hidden: &config.decoder_hidden,
            log_std: None,
            vb: vb.pp("prior"),
        })?;

        let posterior = (self.posterior(&config.posterior)?)(DistArgs {
            dim: z_dim,
            context_dim: 2 * z_dim,
            hidden: &config.encoder_hidden,
            log_std: None,
            vb: vb.pp("posterior"),
        })?;

        let likelihoods = config
            .modalities
            .iter()
            .enumerate()
            .map(|(i, modality)| {
                (self.likelihood(&modality.likelihood)?)(DistArgs {
                    dim: modality.dim,
                    context_dim: z_dim,
                    hidden: &config.decoder_hidden,
                    log_std: modality.log_std,
                    vb: vb.pp(format!("likelihood.{}", i)),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        MultimodalVae::new(
            prior,
            posterior,
            likelihoods,
            Box::new(MultimodalEncoder::new(encoders, fusion)),
        )
    }
}

////////////////////////////
// distribution factories //
////////////////////////////

fn build_standard_normal(args: DistArgs<'_>) -> Result<BoxedDist> {
    Ok(Box::new(StandardNormal::new(
        args.dim,
        args.vb.dtype(),
        args.vb.device(),
    )))
}

/// N(mu(c), sigma(c)^2) with a network reading the context
fn build_conditional_normal(args: DistArgs<'_>) -> Result<BoxedDist> {
    if args.context_dim == 0 {
        return Err(ModelError::Unsupported {
            operation: "conditional_normal prior".into(),
            reason: "needs a context; use it for m given s".into(),
        }
        .into());
    }
    let net = stack_relu_linear(args.context_dim, 2 * args.dim, args.hidden, args.vb)?;
    Ok(Box::new(ConditionalDiagonalGaussian::new(
        args.dim,
        Some(Box::new(net)),
    )))
}

/// The context already holds `[mean, log_std]`
fn build_diagonal_normal(args: DistArgs<'_>) -> Result<BoxedDist> {
    if args.context_dim != 2 * args.dim {
        candle_core::bail!(
            "diagonal_normal posterior of dim {} needs a {}-wide context, got {}",
            args.dim,
            2 * args.dim,
            args.context_dim
        );
    }
    Ok(Box::new(ConditionalDiagonalGaussian::new(args.dim, None)))
}

fn build_bernoulli(args: DistArgs<'_>) -> Result<BoxedDist> {
    let decoder = stack_relu_linear(args.context_dim, args.dim, args.hidden, args.vb)?;
    Ok(Box::new(IndependentBernoulli::new(
        args.dim,
        Box::new(decoder),
    )))
}

fn build_gaussian(args: DistArgs<'_>) -> Result<BoxedDist> {
    let decoder = stack_relu_linear(args.context_dim, args.dim, args.hidden, args.vb)?;
    Ok(Box::new(IsotropicGaussian::new(
        args.dim,
        Box::new(decoder),
        args.log_std.unwrap_or(0.0),
    )))
}

//////////////////////
// fusion factories //
//////////////////////

fn build_poe(_args: FusionArgs<'_>) -> Result<Box<dyn FusionT>> {
    Ok(Box::new(PoeFusion))
}

fn build_concat(args: FusionArgs<'_>) -> Result<Box<dyn FusionT>> {
    Ok(Box::new(ConcatFusion::new(
        &vec![args.feature_dim; args.num_modalities],
        args.output_dim,
        &args.config.hidden,
        args.vb,
    )?))
}

fn build_set_encoder(args: FusionArgs<'_>, pooling: SetPooling) -> Result<Box<dyn FusionT>> {
    Ok(Box::new(SetEncoder::new(
        args.feature_dim,
        args.output_dim,
        &args.config.hidden,
        pooling,
        args.vb,
    )?))
}

fn build_set_max(args: FusionArgs<'_>) -> Result<Box<dyn FusionT>> {
    build_set_encoder(args, SetPooling::Max)
}

fn build_set_mean(args: FusionArgs<'_>) -> Result<Box<dyn FusionT>> {
    build_set_encoder(args, SetPooling::Mean)
}

fn build_set_sum(args: FusionArgs<'_>) -> Result<Box<dyn FusionT>> {
    build_set_encoder(args, SetPooling::Sum)
}

fn hidden_dim(args: &FusionArgs<'_>) -> usize {
    args.config
        .hidden
        .first()
        .copied()
        .unwrap_or(args.feature_dim)
}

fn build_deep_set(args: FusionArgs<'_>) -> Result<Box<dyn FusionT>> {
    let hidden_dim = hidden_dim(&args);
    Ok(Box::new(DeepSet::new(
        args.feature_dim,
        args.output_dim,
        hidden_dim,
        args.config.num_enc_layers,
        args.config.num_dec_layers,
        args.config.pooling,
        args.vb,
    )?))
}

fn build_set_transformer(args: FusionArgs<'_>) -> Result<Box<dyn FusionT>> {
    let st_args = SetTransformerArgs {
        input_dim: args.feature_dim,
        output_dim: args.output_dim,
        hidden_dim: hidden_dim(&args),
        num_hidden_layers: args.config.num_layers,
        num_heads: args.config.num_heads,
        layer_norm: args.config.layer_norm,
        num_modality_embeddings: args
            .config
            .modality_embeddings
            .then_some(args.num_modalities),
    };
    Ok(Box::new(SetTransformer::new(&st_args, args.vb)?))
}
