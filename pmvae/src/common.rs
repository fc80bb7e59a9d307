pub use log::info;

pub use candle_util::{candle_core, candle_nn};

pub use candle_core::{DType, Device, Result, Tensor};
pub use candle_util::candle_batch_ops::*;
pub use candle_util::candle_modality::*;
pub use candle_util::candle_model_errors::ModelError;
pub use candle_util::dist::DistributionT;

/// A boxed prior, posterior or likelihood
pub type BoxedDist = Box<dyn DistributionT>;
