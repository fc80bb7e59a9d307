use crate::common::*;
use crate::model_traits::MultimodalVaeT;
use crate::objectives::*;

use candle_nn::{AdamW, Optimizer, VarMap};
use candle_util::candle_data_loader::DataLoader;
use candle_util::candle_inference::TrainConfig;
use indicatif::{ProgressBar, ProgressDrawTarget};
use serde::Serialize;

fn mean_scalar(x: &Tensor) -> Result<f32> {
    x.mean_all()?.to_dtype(DType::F32)?.to_scalar::<f32>()
}

/// Maximize `objective` by AdamW over every variable in `variable_map`
///
/// Each epoch reshuffles `data` and takes one step per minibatch on
/// `-mean(objective)`, treating every modality as observed.
///
/// # Returns the average ELBO of each epoch
pub fn train_multimodal_vae<M, DataL>(
    model: &M,
    objective: ObjectiveFn<M>,
    variable_map: &VarMap,
    data: &mut DataL,
    elbo_config: &ElboConfig,
    train_config: &TrainConfig,
) -> anyhow::Result<Vec<f32>>
where
    M: MultimodalVaeT,
    DataL: DataLoader,
{
    let device = &train_config.device;
    let mut adam = AdamW::new_lr(
        variable_map.all_vars(),
        train_config.learning_rate.into(),
    )?;

    let pb = ProgressBar::new(train_config.num_epochs as u64);
    if !train_config.show_progress || train_config.verbose {
        pb.set_draw_target(ProgressDrawTarget::hidden());
    }

    let mut elbo_trace = Vec::with_capacity(train_config.num_epochs);

    for epoch in 0..train_config.num_epochs {
        data.shuffle_minibatch(train_config.batch_size)?;
        let num_minibatches = data.num_minibatch();
        let mut elbo_tot = 0f32;

        for b in 0..num_minibatches {
            let inputs = all_present(&data.minibatch_data(b, device)?);
            let elbo = objective(model, &inputs, elbo_config)?;
            let loss = elbo.mean_all()?.neg()?;
            adam.backward_step(&loss)?;
            elbo_tot += mean_scalar(&elbo)?;
        }

        pb.inc(1);
        elbo_trace.push(elbo_tot / num_minibatches.max(1) as f32);
        if train_config.verbose {
            info!(
                "[{}] elbo: {}",
                epoch + 1,
                elbo_trace.last().ok_or(anyhow::anyhow!("elbo"))?
            );
        }
    }
    pb.finish_and_clear();
    Ok(elbo_trace)
}

/// Held-out style summary of a trained model
#[derive(Clone, Debug, Serialize)]
pub struct EvalReport {
    /// average objective value
    pub elbo: f32,
    /// average importance-weighted bound
    pub log_prob_lower_bound: f32,
    /// `[mse(x, x_from_y), mse(y, y_from_x)]` for two modalities
    pub cross_reconstruction_mse: Option<Vec<f32>>,
}

/// Evaluate on fully observed `data`
///
/// * `num_bound_samples` - draws behind the importance-weighted bound
pub fn evaluate_multimodal_vae<M>(
    model: &M,
    objective: ObjectiveFn<M>,
    data: &[Tensor],
    elbo_config: &ElboConfig,
    num_bound_samples: usize,
) -> anyhow::Result<EvalReport>
where
    M: MultimodalVaeT,
{
    let inputs = all_present(data);
    let elbo = mean_scalar(&objective(model, &inputs, elbo_config)?)?;

    let bound_config = elbo_config.with_num_samples(num_bound_samples);
    let bound = mean_scalar(&log_prob_lower_bound(model, &inputs, &bound_config)?)?;

    let cross_reconstruction_mse = if data.len() == 2 {
        let recon = model.cross_reconstruct(data, None, true)?;
        let mse = recon
            .iter()
            .zip(data.iter())
            .map(|(x_hat, x)| mean_scalar(&(x_hat - x)?.sqr()?))
            .collect::<Result<Vec<_>>>()?;
        Some(mse)
    } else {
        None
    };

    Ok(EvalReport {
        elbo,
        log_prob_lower_bound: bound,
        cross_reconstruction_mse,
    })
}
