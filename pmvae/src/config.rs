use crate::objectives::ElboConfig;

use candle_util::candle_fusion::SetPooling;
use serde::Deserialize;

/// Which latent structure to build
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    /// one latent per modality plus a shared latent
    #[default]
    Partitioned,
    /// a single shared latent
    Joint,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ModalityConfig {
    pub name: String,
    pub dim: usize,
    /// likelihood registry key
    #[serde(default = "default_likelihood")]
    pub likelihood: String,
    /// fixed log noise scale of a Gaussian likelihood (0 if missing)
    #[serde(default)]
    pub log_std: Option<f64>,
}

/// How per-modality features are fused into the shared posterior
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// fusion registry key
    pub key: String,
    /// per-modality feature dimension handed to a learned fusion
    pub feature_dim: usize,
    pub hidden: Vec<usize>,
    /// pooling of the deep set
    pub pooling: SetPooling,
    /// deep set: hidden layers before and after pooling
    pub num_enc_layers: usize,
    pub num_dec_layers: usize,
    /// set transformer: self-attention blocks
    pub num_layers: usize,
    pub num_heads: usize,
    pub layer_norm: bool,
    /// set transformer: add a learned embedding per modality
    pub modality_embeddings: bool,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            key: "poe".into(),
            feature_dim: 32,
            hidden: vec![64],
            pooling: SetPooling::Max,
            num_enc_layers: 3,
            num_dec_layers: 1,
            num_layers: 1,
            num_heads: 4,
            layer_norm: false,
            modality_embeddings: false,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct TrainSettings {
    pub learning_rate: f32,
    pub batch_size: usize,
    pub num_epochs: usize,
}

impl Default for TrainSettings {
    fn default() -> Self {
        Self {
            learning_rate: 1e-3,
            batch_size: 100,
            num_epochs: 100,
        }
    }
}

/// A model, its objective and its optimizer settings, read from JSON.
/// Components are looked up by key in the
/// [`Registry`](crate::registry::Registry).
///
/// ```json
/// {
///   "modalities": [
///     { "name": "x", "dim": 10, "likelihood": "gaussian" },
///     { "name": "y", "dim": 12, "likelihood": "gaussian" }
///   ],
///   "m_latent_dim": 2,
///   "s_latent_dim": 2,
///   "objective": "pmvaevae",
///   "fusion": { "key": "set_transformer", "feature_dim": 16 },
///   "elbo": { "num_samples": 4, "kl_multiplier": 1.0 }
/// }
/// ```
#[derive(Clone, Debug, Deserialize)]
pub struct ExperimentConfig {
    #[serde(default)]
    pub model: ModelKind,
    pub modalities: Vec<ModalityConfig>,
    /// dimension of each modality-specific latent (partitioned only)
    #[serde(default = "default_latent_dim")]
    pub m_latent_dim: usize,
    /// dimension of the shared latent, or of the single latent of a
    /// joint model
    #[serde(default = "default_latent_dim")]
    pub s_latent_dim: usize,
    #[serde(default = "default_prior")]
    pub s_prior: String,
    #[serde(default = "default_prior")]
    pub m_prior: String,
    #[serde(default = "default_posterior")]
    pub posterior: String,
    #[serde(default)]
    pub fusion: FusionConfig,
    #[serde(default = "default_hidden")]
    pub encoder_hidden: Vec<usize>,
    #[serde(default = "default_hidden")]
    pub decoder_hidden: Vec<usize>,
    /// objective registry key
    #[serde(default = "default_objective")]
    pub objective: String,
    #[serde(default)]
    pub elbo: ElboConfig,
    #[serde(default)]
    pub train: TrainSettings,
}

fn default_likelihood() -> String {
    "gaussian".into()
}

fn default_latent_dim() -> usize {
    2
}

fn default_prior() -> String {
    "standard_normal".into()
}

fn default_posterior() -> String {
    "diagonal_normal".into()
}

fn default_hidden() -> Vec<usize> {
    vec![64]
}

fn default_objective() -> String {
    "pmvae".into()
}

impl ExperimentConfig {
    pub fn from_json_file(path: &str) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read {}: {}", path, e))?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> anyhow::Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn num_modalities(&self) -> usize {
        self.modalities.len()
    }

    pub fn modality_dims(&self) -> Vec<usize> {
        self.modalities.iter().map(|m| m.dim).collect()
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.modalities.is_empty() {
            anyhow::bail!("need at least one modality");
        }
        if let Some(m) = self.modalities.iter().find(|m| m.dim == 0) {
            anyhow::bail!("modality `{}` has zero dimension", m.name);
        }
        if self.s_latent_dim == 0 {
            anyhow::bail!("s_latent_dim must be positive");
        }
        if self.model == ModelKind::Partitioned && self.m_latent_dim == 0 {
            anyhow::bail!("m_latent_dim must be positive");
        }
        if self.train.batch_size == 0 {
            anyhow::bail!("batch_size must be positive");
        }
        self.elbo.check()?;
        self.elbo.weights(self.num_modalities())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() -> anyhow::Result<()> {
        let config = ExperimentConfig::from_json_str(
            r#"{ "modalities": [ { "name": "x", "dim": 3 }, { "name": "y", "dim": 4, "likelihood": "bernoulli" } ] }"#,
        )?;
        assert_eq!(config.model, ModelKind::Partitioned);
        assert_eq!(config.modality_dims(), vec![3, 4]);
        assert_eq!(config.modalities[0].likelihood, "gaussian");
        assert_eq!(config.modalities[1].likelihood, "bernoulli");
        assert_eq!(config.objective, "pmvae");
        assert_eq!(config.fusion.key, "poe");
        assert_eq!(config.fusion.num_enc_layers, 3);
        assert_eq!(config.fusion.num_dec_layers, 1);
        assert_eq!(config.elbo.num_samples, 1);
        Ok(())
    }

    #[test]
    fn nested_sections_parse() -> anyhow::Result<()> {
        let config = ExperimentConfig::from_json_str(
            r#"{
                "model": "joint",
                "modalities": [ { "name": "x", "dim": 3 }, { "name": "y", "dim": 4 } ],
                "s_latent_dim": 5,
                "objective": "vaevae",
                "fusion": { "key": "deep_set", "pooling": "mean", "num_dec_layers": 2 },
                "elbo": { "likelihood_weights": [1.0, 2.0], "num_samples": 3 },
                "train": { "num_epochs": 7 }
            }"#,
        )?;
        assert_eq!(config.model, ModelKind::Joint);
        assert_eq!(config.fusion.pooling, SetPooling::Mean);
        assert_eq!(config.fusion.num_enc_layers, 3);
        assert_eq!(config.fusion.num_dec_layers, 2);
        assert_eq!(config.fusion.num_layers, 1);
        assert_eq!(config.fusion.feature_dim, 32);
        assert_eq!(config.elbo.weights(2)?, vec![1.0, 2.0]);
        assert_eq!(config.train.num_epochs, 7);
        assert_eq!(config.train.batch_size, 100);
        Ok(())
    }

    #[test]
    fn reads_from_file() -> anyhow::Result<()> {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new()?;
        writeln!(
            file,
            r#"{{ "modalities": [ {{ "name": "x", "dim": 3 }} ], "objective": "elbo" }}"#
        )?;
        let path = file.path().to_string_lossy().to_string();
        let config = ExperimentConfig::from_json_file(&path)?;
        assert_eq!(config.objective, "elbo");
        assert!(ExperimentConfig::from_json_file("/nonexistent/pmvae.json").is_err());
        Ok(())
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let bad = [
            r#"{ "modalities": [] }"#,
            r#"{ "modalities": [ { "name": "x", "dim": 0 } ] }"#,
            r#"{ "modalities": [ { "name": "x", "dim": 2 } ], "elbo": { "num_samples": 0 } }"#,
            r#"{ "modalities": [ { "name": "x", "dim": 2 } ], "elbo": { "likelihood_weights": [1.0, 1.0] } }"#,
        ];
        for text in bad {
            assert!(ExperimentConfig::from_json_str(text).is_err(), "{}", text);
        }
    }
}
