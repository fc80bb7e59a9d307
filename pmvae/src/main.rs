use pmvae::common::*;
use pmvae::config::ExperimentConfig;
use pmvae::fit_pmvae::*;
use pmvae::registry::{Registry, ResolvedModel};
use pmvae::toy_data::{generate_toy_views, ToyDataArgs};

use candle_util::candle_data_loader::MultimodalInMemoryData;
use candle_util::candle_inference::TrainConfig;
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;

#[derive(Parser, Debug)]
#[command(
    version,
    about = "PMVAE",
    long_about = "Partitioned multimodal variational autoencoders\n\
		  Each modality has its own latent and all modalities share one.\n\
		  Models, fusion modules and objectives are chosen by key in a JSON config."
)]
struct Cli {
    #[command(subcommand)]
    commands: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        about = "Train a model on a synthetic multi-view dataset",
        long_about = "Train a multimodal VAE in the three stages: \n\
		      (1) Simulate views from shared and view-specific Gaussian factors\n\
		      (2) Build the model and objective named in the config\n\
		      (3) Optimize by AdamW and report cross reconstruction\n\
		      and the importance-weighted log-likelihood bound.\n"
    )]
    Train(TrainArgs),

    /// list registered priors, posteriors, likelihoods, fusion modules and objectives
    Registry,
}

#[derive(ValueEnum, Clone, Debug, PartialEq)]
#[clap(rename_all = "lowercase")]
enum ComputeDevice {
    Cpu,
    Cuda,
    Metal,
}

#[derive(Args, Debug)]
struct TrainArgs {
    /// Experiment configuration (JSON)
    #[arg(long, short, required = true)]
    config: Box<str>,

    /// # training epochs (overrides the config)
    #[arg(long, short = 'i')]
    epochs: Option<usize>,

    /// # simulated rows
    #[arg(long, short = 'n', default_value_t = 1000)]
    num_rows: usize,

    /// shared factor dimension of the simulated views
    #[arg(long, default_value_t = 2)]
    toy_shared_dim: usize,

    /// view-specific factor dimension of the simulated views
    #[arg(long, default_value_t = 2)]
    toy_specific_dim: usize,

    /// noise standard deviation of the simulated views
    #[arg(long, default_value_t = 0.1)]
    toy_noise: f32,

    /// random seed of the simulation
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// # posterior draws behind the final log-likelihood bound
    #[arg(long, default_value_t = 100)]
    bound_samples: usize,

    /// write the ELBO trace and evaluation to this JSON file
    #[arg(long, short)]
    out: Option<Box<str>>,

    /// candle device
    #[arg(long, value_enum, default_value = "cpu")]
    device: ComputeDevice,

    /// verbosity
    #[arg(long, short)]
    verbose: bool,
}

#[derive(Serialize)]
struct TrainOutput<'a> {
    objective: &'a str,
    elbo_trace: Vec<f32>,
    evaluation: EvalReport,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match &cli.commands {
        Commands::Train(args) => {
            fit_experiment(args)?;
        }
        Commands::Registry => {
            for (kind, keys) in Registry::with_builtins().keys() {
                println!("{}: {}", kind, keys.join(", "));
            }
        }
    }

    Ok(())
}

fn fit_experiment(args: &TrainArgs) -> anyhow::Result<()> {
    if args.verbose {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    let mut config = ExperimentConfig::from_json_file(&args.config)?;
    if let Some(epochs) = args.epochs {
        config.train.num_epochs = epochs;
    }

    let dev = match args.device {
        ComputeDevice::Metal => Device::new_metal(0)?,
        ComputeDevice::Cuda => Device::new_cuda(0)?,
        _ => Device::Cpu,
    };

    // 1. Simulate views
    let toy = ToyDataArgs {
        num_rows: args.num_rows,
        dims: config.modality_dims(),
        shared_dim: args.toy_shared_dim,
        specific_dim: args.toy_specific_dim,
        noise_std: args.toy_noise,
        seed: args.seed,
    };
    let views = generate_toy_views(&toy, &Device::Cpu)?
        .into_iter()
        .zip(config.modalities.iter())
        .map(|(x, modality)| -> Result<Tensor> {
            if modality.likelihood == "bernoulli" {
                x.gt(0f32)?.to_dtype(DType::F32)
            } else {
                Ok(x)
            }
        })
        .collect::<Result<Vec<_>>>()?;

    let mut data = MultimodalInMemoryData::new(views)?;

    // 2. Build the model
    let resolved = Registry::with_builtins().resolve(&config, DType::F32, &dev)?;

    let train_config = TrainConfig {
        learning_rate: config.train.learning_rate,
        batch_size: config.train.batch_size,
        num_epochs: config.train.num_epochs,
        device: dev.clone(),
        verbose: args.verbose,
        show_progress: true,
    };

    // 3. Train and evaluate
    info!(
        "training `{}` on {} rows for {} epochs",
        resolved.objective_key,
        data.num_rows(),
        train_config.num_epochs
    );

    let full_data = data.full_data(&dev)?;
    let elbo = &resolved.elbo;

    let (elbo_trace, evaluation) = match &resolved.model {
        ResolvedModel::Joint { model, objective } => {
            let trace = train_multimodal_vae(
                model,
                *objective,
                &resolved.varmap,
                &mut data,
                elbo,
                &train_config,
            )?;
            let eval =
                evaluate_multimodal_vae(model, *objective, &full_data, elbo, args.bound_samples)?;
            (trace, eval)
        }
        ResolvedModel::Partitioned { model, objective } => {
            let trace = train_multimodal_vae(
                model,
                *objective,
                &resolved.varmap,
                &mut data,
                elbo,
                &train_config,
            )?;
            let eval =
                evaluate_multimodal_vae(model, *objective, &full_data, elbo, args.bound_samples)?;
            (trace, eval)
        }
    };

    info!("elbo: {}", evaluation.elbo);
    info!("log p(x) >= {}", evaluation.log_prob_lower_bound);
    if let Some(mse) = evaluation.cross_reconstruction_mse.as_ref() {
        info!("cross reconstruction mse [x|y, y|x]: {:?}", mse);
    }

    if let Some(out) = args.out.as_deref() {
        let output = TrainOutput {
            objective: &resolved.objective_key,
            elbo_trace,
            evaluation,
        };
        let file = std::fs::File::create(out)?;
        serde_json::to_writer_pretty(file, &output)?;
        info!("wrote {}", out);
    }

    info!("Done");
    Ok(())
}
