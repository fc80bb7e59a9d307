use crate::common::*;

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use rayon::prelude::*;

/// Views generated from shared and view-specific Gaussian factors
///
/// x_i = [z_i, z_s] * A_i + noise_std * eps
///
/// where `z_s`, `z_i`, `eps` ~ N(0, I) and `A_i` is a fixed random
/// mixing matrix.
#[derive(Clone, Debug)]
pub struct ToyDataArgs {
    pub num_rows: usize,
    pub dims: Vec<usize>,
    pub shared_dim: usize,
    pub specific_dim: usize,
    pub noise_std: f32,
    pub seed: u64,
}

impl Default for ToyDataArgs {
    fn default() -> Self {
        Self {
            num_rows: 1000,
            dims: vec![10, 10],
            shared_dim: 2,
            specific_dim: 2,
            noise_std: 0.1,
            seed: 42,
        }
    }
}

fn normal_vec(rng: &mut StdRng, len: usize, sd: f32) -> anyhow::Result<Vec<f32>> {
    let normal = Normal::new(0_f32, sd)?;
    Ok((0..len).map(|_| normal.sample(rng)).collect())
}

/// One `(num_rows, dims[i])` matrix per view on `device`
pub fn generate_toy_views(args: &ToyDataArgs, device: &Device) -> anyhow::Result<Vec<Tensor>> {
    if args.num_rows == 0 || args.dims.is_empty() {
        anyhow::bail!("need at least one row and one view");
    }
    let nn = args.num_rows;
    let kk = args.specific_dim + args.shared_dim;

    let mut rng = StdRng::seed_from_u64(args.seed);
    let z_s = normal_vec(&mut rng, nn * args.shared_dim, 1.)?;
    let z_s = Tensor::from_vec(z_s, (nn, args.shared_dim), device)?;

    // each view gets its own stream so the views can be drawn in parallel
    let views = args
        .dims
        .par_iter()
        .enumerate()
        .map(|(i, &dd)| -> anyhow::Result<Tensor> {
            let mut rng = StdRng::seed_from_u64(args.seed.wrapping_add(1 + i as u64));
            let z_i = normal_vec(&mut rng, nn * args.specific_dim, 1.)?;
            let mixing = normal_vec(&mut rng, kk * dd, 1. / (kk as f32).sqrt())?;
            let noise = normal_vec(&mut rng, nn * dd, args.noise_std)?;

            let mixing = Tensor::from_vec(mixing, (kk, dd), device)?;
            let noise = Tensor::from_vec(noise, (nn, dd), device)?;

            let z = if args.specific_dim > 0 {
                let z_i = Tensor::from_vec(z_i, (nn, args.specific_dim), device)?;
                Tensor::cat(&[&z_i, &z_s], 1)?
            } else {
                z_s.clone()
            };
            Ok((z.matmul(&mixing)? + noise)?)
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    info!(
        "generated {} views of {} rows, shared dim {}",
        views.len(),
        nn,
        args.shared_dim
    );
    Ok(views)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn views_have_requested_shapes_and_are_reproducible() -> anyhow::Result<()> {
        let args = ToyDataArgs {
            num_rows: 20,
            dims: vec![3, 5],
            ..Default::default()
        };
        let dev = Device::Cpu;
        let views = generate_toy_views(&args, &dev)?;
        assert_eq!(views[0].dims(), &[20, 3]);
        assert_eq!(views[1].dims(), &[20, 5]);

        let again = generate_toy_views(&args, &dev)?;
        let diff = (&views[1] - &again[1])?.abs()?.sum_all()?.to_scalar::<f32>()?;
        assert_eq!(diff, 0.);
        Ok(())
    }

    #[test]
    fn views_share_a_factor() -> anyhow::Result<()> {
        // without view-specific factors or noise both views are
        // multiples of the same z_s
        let args = ToyDataArgs {
            num_rows: 10,
            dims: vec![2, 3],
            shared_dim: 1,
            specific_dim: 0,
            noise_std: 0.,
            seed: 7,
        };
        let views = generate_toy_views(&args, &Device::Cpu)?;
        let x: Vec<Vec<f32>> = views[0].to_vec2()?;
        let y: Vec<Vec<f32>> = views[1].to_vec2()?;
        for r in 1..args.num_rows {
            approx::assert_relative_eq!(
                x[r][0] / x[0][0],
                y[r][0] / y[0][0],
                max_relative = 1e-4
            );
        }
        Ok(())
    }
}
