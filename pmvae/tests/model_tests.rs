mod common;

use candle_util::candle_core;
use candle_core::{DType, Device, Result, Tensor};
use candle_util::candle_data_loader::MultimodalInMemoryData;
use candle_util::candle_inference::TrainConfig;
use candle_util::candle_model_traits::Partitioned;
use candle_util::candle_modality::*;
use candle_util::dist::DistributionT;
use common::*;

use pmvae::config::ExperimentConfig;
use pmvae::fit_pmvae::*;
use pmvae::model_traits::MultimodalVaeT;
use pmvae::mvae_model::MultimodalVae;
use pmvae::pmvae_model::{LatentCoupling, PartitionedMultimodalVae};
use pmvae::registry::{Registry, ResolvedModel};
use pmvae::toy_data::{generate_toy_views, ToyDataArgs};

fn constant_pmvae() -> Result<PartitionedMultimodalVae> {
    PartitionedMultimodalVae::new(
        ConstantDensity::boxed(1, 1.),
        vec![ConstantDensity::boxed(1, 10.), ConstantDensity::boxed(1, 100.)],
        MeanDraw::boxed(1, true),
        vec![MeanDraw::boxed(1, true), MeanDraw::boxed(1, true)],
        vec![ConstantDensity::boxed(1, 5.), ConstantDensity::boxed(1, 7.)],
        Box::new(SumEncoder { num_modalities: 2 }),
    )
}

fn registry_model(dims: &[usize], objective: &str) -> anyhow::Result<PartitionedMultimodalVae> {
    registry_model_with(dims, objective, "")
}

/// `extra` is spliced into the config object, e.g. `, "m_prior": "..."`
fn registry_model_with(
    dims: &[usize],
    objective: &str,
    extra: &str,
) -> anyhow::Result<PartitionedMultimodalVae> {
    let modalities = dims
        .iter()
        .enumerate()
        .map(|(i, d)| format!(r#"{{ "name": "v{}", "dim": {} }}"#, i, d))
        .collect::<Vec<_>>()
        .join(", ");
    let config = ExperimentConfig::from_json_str(&format!(
        r#"{{ "modalities": [ {} ], "objective": "{}", "encoder_hidden": [8], "decoder_hidden": [8] {} }}"#,
        modalities, objective, extra
    ))?;
    match Registry::with_builtins()
        .resolve(&config, DType::F32, &Device::Cpu)?
        .model
    {
        ResolvedModel::Partitioned { model, .. } => Ok(model),
        ResolvedModel::Joint { .. } => anyhow::bail!("expected a partitioned model"),
    }
}

#[test]
fn absent_slots_contribute_nothing() -> Result<()> {
    let model = constant_pmvae()?;
    let dev = Device::Cpu;
    let t = Tensor::zeros((3, 1), DType::F32, &dev)?;

    let latent = Partitioned {
        m: vec![Modality::Present(t.clone()), Modality::Absent],
        s: t.clone(),
    };
    assert_eq!(to_vec(&model.log_p_z(&latent)?)?, vec![11.; 3]);

    let latent_s_only = Partitioned {
        m: vec![Modality::Absent, Modality::Absent],
        s: t.clone(),
    };
    assert_eq!(to_vec(&model.log_p_z(&latent_s_only)?)?, vec![1.; 3]);

    let both = Partitioned {
        m: vec![Modality::Present(t.clone()), Modality::Present(t.clone())],
        s: t.clone(),
    };
    let weights = [1., 1.];
    let x_only = vec![Modality::Present(t.clone()), Modality::Absent];
    assert_eq!(to_vec(&model.log_p_x_z(&x_only, &both, &weights, 1)?)?, vec![5.; 3]);

    let all = all_present(&[t.clone(), t.clone()]);
    assert_eq!(to_vec(&model.log_p_x_z(&all, &latent, &weights, 1)?)?, vec![5.; 3]);
    assert_eq!(to_vec(&model.log_p_x_z(&all, &both, &weights, 1)?)?, vec![12.; 3]);

    // the joint model skips absent inputs the same way
    let joint = MultimodalVae::new(
        ConstantDensity::boxed(1, 1.),
        MeanDraw::boxed(1, true),
        vec![ConstantDensity::boxed(1, 5.), ConstantDensity::boxed(1, 7.)],
        Box::new(SumEncoder { num_modalities: 2 }),
    )?;
    let y_only = vec![Modality::Absent, Modality::Present(t.clone())];
    assert_eq!(to_vec(&joint.log_p_x_z(&y_only, &t, &weights, 1)?)?, vec![7.; 3]);
    Ok(())
}

#[test]
fn inputs_repeat_to_match_draws() -> Result<()> {
    let model = constant_pmvae()?;
    let dev = Device::Cpu;
    let x = Tensor::zeros((2, 1), DType::F32, &dev)?;
    let inputs = all_present(&[x.clone(), x]);

    let sample = model.log_q_z_x(&inputs, 3)?;
    assert_eq!(sample.log_q.dims(), &[6]);
    assert_eq!(sample.latent.s.dims(), &[6, 1]);
    assert_eq!(sample.context.s.dims(), &[2, 1]);

    let log_p = model.log_p_x_z(&inputs, &sample.latent, &[1., 1.], 3)?;
    assert_eq!(log_p.dims(), &[6]);

    let log_q = model.log_q_z_given(&sample.latent, &sample.context)?;
    assert_eq!(to_vec(&log_q)?, to_vec(&sample.log_q)?);
    Ok(())
}

#[test]
fn cross_reconstruct_shapes() -> anyhow::Result<()> {
    let model = registry_model(&[3, 4], "pmvae")?;
    let dev = Device::Cpu;
    let x = Tensor::randn(0f32, 1f32, (6, 3), &dev)?;
    let y = Tensor::randn(0f32, 1f32, (6, 4), &dev)?;

    for mean in [true, false] {
        let recon = model.cross_reconstruct(&[x.clone(), y.clone()], None, mean)?;
        assert_eq!(recon.len(), 2);
        assert_eq!(recon[0].dims(), &[6, 3]);
        assert_eq!(recon[1].dims(), &[6, 4]);
    }

    assert!(model
        .cross_reconstruct(&[x.clone(), y.clone()], Some(2), true)
        .is_err());
    assert!(model.cross_reconstruct(&[x.clone()], None, true).is_err());

    let three = registry_model(&[3, 4, 2], "pmvae")?;
    let z = Tensor::randn(0f32, 1f32, (6, 2), &dev)?;
    assert!(three.cross_reconstruct(&[x, y, z], None, true).is_err());
    Ok(())
}

#[test]
fn encode_and_decode_fill_absent_latents() -> anyhow::Result<()> {
    let model = registry_model_with(&[3, 4], "hier_pmvae", r#", "m_prior": "conditional_normal""#)?;
    assert_eq!(model.coupling(), LatentCoupling::Hierarchical);
    let dev = Device::Cpu;
    let x = Tensor::randn(0f32, 1f32, (5, 3), &dev)?;

    let latent = model.encode(&[Modality::Present(x.clone()), Modality::Absent], None)?;
    assert_eq!(latent.s.dims(), &[5, 2]);
    assert!(latent.m[1].is_absent());

    let decoded = model.decode(&latent, true)?;
    assert_eq!(decoded[0].dims(), &[5, 3]);
    assert_eq!(decoded[1].dims(), &[5, 4]);

    let draws = model.encode(&[Modality::Present(x), Modality::Absent], Some(7))?;
    assert_eq!(draws.s.dims(), &[5, 7, 2]);

    // the absent slot is drawn from p(m|s), so its location moves with s
    let prior = model
        .m_prior(1)
        .ok_or_else(|| anyhow::anyhow!("missing m prior"))?;
    assert!(prior.is_conditional());
    let s = Tensor::new(&[[1f32, -1.], [-2., 3.]], &dev)?;
    let mean: Vec<Vec<f32>> = prior.mean(Some(&s))?.to_vec2()?;
    assert_eq!(mean.len(), 2);
    let gap: f32 = mean[0]
        .iter()
        .zip(mean[1].iter())
        .map(|(a, b)| (a - b).abs())
        .sum();
    assert!(gap > 0., "prior mean ignores s: {:?}", mean);
    assert!(prior.mean(None).is_err());
    Ok(())
}

#[test]
fn mean_samples_are_reproducible() -> Result<()> {
    let model = mean_draw_pmvae(2)?;
    let first = model.sample(8, true)?;
    let second = model.sample(8, true)?;
    assert_eq!(first.len(), 2);
    for (a, b) in first.iter().zip(second.iter()) {
        assert_eq!(a.dims(), &[8, 1]);
        assert_eq!(to_vec(a)?, to_vec(b)?);
    }

    let joint = mean_draw_mvae(2)?;
    let first = joint.sample(8, true)?;
    let second = joint.sample(8, true)?;
    for (a, b) in first.iter().zip(second.iter()) {
        assert_eq!(to_vec(a)?, to_vec(b)?);
    }
    Ok(())
}

#[test]
fn mismatched_component_counts_fail_fast() -> Result<()> {
    let result = PartitionedMultimodalVae::new(
        MeanDraw::boxed(1, false),
        vec![MeanDraw::boxed(1, true)],
        MeanDraw::boxed(1, true),
        vec![MeanDraw::boxed(1, true), MeanDraw::boxed(1, true)],
        vec![MeanDraw::boxed(1, true), MeanDraw::boxed(1, true)],
        Box::new(SumEncoder { num_modalities: 2 }),
    );
    assert!(result.is_err());

    let model = mean_draw_pmvae(2)?;
    let x = literal_pair()?;
    let three = vec![
        Modality::Present(x[0].clone()),
        Modality::Present(x[1].clone()),
        Modality::Absent,
    ];
    assert!(model.log_q_z_x(&three, 1).is_err());
    assert!(model.encode(&three, None).is_err());
    Ok(())
}

#[test]
fn short_training_run_reports_finite_values() -> anyhow::Result<()> {
    let model = registry_model(&[5, 6], "pmvaevae")?;
    let views = generate_toy_views(
        &ToyDataArgs {
            num_rows: 64,
            dims: vec![5, 6],
            ..Default::default()
        },
        &Device::Cpu,
    )?;
    let full = views.clone();
    let mut data = MultimodalInMemoryData::new(views)?;

    // a fresh model, so train its variables through the registry
    let config = ExperimentConfig::from_json_str(
        r#"{ "modalities": [ { "name": "x", "dim": 5 }, { "name": "y", "dim": 6 } ],
             "objective": "pmvaevae", "encoder_hidden": [8], "decoder_hidden": [8],
             "elbo": { "num_samples": 2 } }"#,
    )?;
    let resolved = Registry::with_builtins().resolve(&config, DType::F32, &Device::Cpu)?;
    let ResolvedModel::Partitioned { model: trained, objective } = resolved.model else {
        anyhow::bail!("expected a partitioned model");
    };

    let mut train_config = TrainConfig::cpu(1e-2, 16, 3);
    train_config.show_progress = false;

    let trace = train_multimodal_vae(
        &trained,
        objective,
        &resolved.varmap,
        &mut data,
        &resolved.elbo,
        &train_config,
    )?;
    assert_eq!(trace.len(), 3);
    assert!(trace.iter().all(|v| v.is_finite()));

    let report = evaluate_multimodal_vae(&trained, objective, &full, &resolved.elbo, 10)?;
    assert!(report.elbo.is_finite());
    assert!(report.log_prob_lower_bound.is_finite());
    assert_eq!(report.cross_reconstruction_mse.map(|v| v.len()), Some(2));

    // an untrained model evaluates too
    let report = evaluate_multimodal_vae(&model, objective, &full, &resolved.elbo, 10)?;
    assert!(report.elbo.is_finite());
    Ok(())
}
