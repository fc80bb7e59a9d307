use candle_core::{Result, Tensor};

use crate::candle_batch_ops::{merge_leading_dims, repeat_rows, split_leading_dim};
use crate::candle_model_errors::ModelError;

/// A distribution usable as prior, posterior or likelihood.
///
/// Shapes:
/// - unconditional draws are `(k, d)` with log densities `(k)`
/// - draws given a context `(n, c)` are `(n, k, d)` with log
///   densities `(n, k)`
/// - `log_prob` scores rows: `x_nd` `(n, d)` with context `(n, c)` gives `(n)`
pub trait DistributionT {
    /// Dimension of one draw
    fn dim(&self) -> usize;

    /// Log density of each row of `x_nd`
    ///
    /// * `x_nd` - values (n x d)
    /// * `context` - conditioning rows (n x c), if any
    fn log_prob(&self, x_nd: &Tensor, context: Option<&Tensor>) -> Result<Tensor>;

    /// Draw `num_samples` values (per context row if conditioned)
    fn sample(&self, num_samples: usize, context: Option<&Tensor>) -> Result<Tensor>;

    /// Draw values and score them in one pass
    ///
    /// # Returns `(z, log_p)`
    /// * `z` - `(n, k, d)` or `(k, d)`
    /// * `log_p` - `(n, k)` or `(k)`
    fn sample_and_log_prob(
        &self,
        num_samples: usize,
        context: Option<&Tensor>,
    ) -> Result<(Tensor, Tensor)> {
        let z = self.sample(num_samples, context)?;
        match context {
            Some(context) => {
                let z_flat = merge_leading_dims(&z)?;
                let context_flat = repeat_rows(context, num_samples)?;
                let log_p = self.log_prob(&z_flat, Some(&context_flat))?;
                Ok((z, split_leading_dim(&log_p, num_samples)?))
            }
            None => {
                let log_p = self.log_prob(&z, None)?;
                Ok((z, log_p))
            }
        }
    }

    /// Expected value given the context `(n, d)`
    fn mean(&self, _context: Option<&Tensor>) -> Result<Tensor> {
        Err(ModelError::Unsupported {
            operation: "mean".into(),
            reason: "this distribution does not expose its mean".into(),
        }
        .into())
    }

    /// Whether draws need a context
    fn is_conditional(&self) -> bool {
        false
    }
}

/// Unwrap the context of a conditional distribution
pub fn require_context<'a>(context: Option<&'a Tensor>, operation: &str) -> Result<&'a Tensor> {
    context.ok_or_else(|| {
        ModelError::Unsupported {
            operation: operation.to_string(),
            reason: "conditional distribution needs a context".into(),
        }
        .into()
    })
}
