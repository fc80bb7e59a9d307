use crate::common::*;
use serde::Deserialize;

/// Weights and Monte Carlo settings shared by every objective
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ElboConfig {
    /// per-modality reconstruction weights; all 1.0 if missing
    pub likelihood_weights: Option<Vec<f64>>,
    /// posterior draws per example
    pub num_samples: usize,
    /// weight on `log p(z) - log q(z|x)`
    pub kl_multiplier: f64,
}

impl Default for ElboConfig {
    fn default() -> Self {
        Self {
            likelihood_weights: None,
            num_samples: 1,
            kl_multiplier: 1.0,
        }
    }
}

impl ElboConfig {
    pub fn with_num_samples(&self, num_samples: usize) -> Self {
        Self {
            num_samples,
            ..self.clone()
        }
    }

    /// Likelihood weights for `num_modalities` modalities
    pub fn weights(&self, num_modalities: usize) -> Result<Vec<f64>> {
        match &self.likelihood_weights {
            Some(w) => {
                check_num_modalities("likelihood weights", num_modalities, w.len())?;
                Ok(w.clone())
            }
            None => Ok(vec![1.0; num_modalities]),
        }
    }

    pub fn check(&self) -> Result<()> {
        if self.num_samples == 0 {
            candle_core::bail!("need at least one posterior sample");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weights_default_and_mismatch() -> Result<()> {
        let config = ElboConfig::default();
        assert_eq!(config.weights(3)?, vec![1.0; 3]);

        let config: ElboConfig =
            serde_json::from_str(r#"{ "likelihood_weights": [1.0, 0.5], "num_samples": 4 }"#)
                .map_err(candle_core::Error::wrap)?;
        assert_eq!(config.num_samples, 4);
        assert_eq!(config.kl_multiplier, 1.0);
        assert_eq!(config.weights(2)?, vec![1.0, 0.5]);
        assert!(config.weights(3).is_err());
        Ok(())
    }
}
