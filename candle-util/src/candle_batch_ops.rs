//! Reshaping helpers for Monte Carlo axes.
//!
//! A conditional distribution with `n` context rows sampled `k` times
//! gives `(n, k, ...)`. Objectives work on `(n * k, ...)` where row
//! `b * k + j` is the `j`-th draw for example `b`.

use candle_core::{Result, Tensor};

/// `(n, k, ...) -> (n * k, ...)`
pub fn merge_leading_dims(x: &Tensor) -> Result<Tensor> {
    let dims = x.dims();
    debug_assert!(dims.len() >= 2);
    let mut merged = vec![dims[0] * dims[1]];
    merged.extend_from_slice(&dims[2..]);
    x.reshape(merged)
}

/// `(n * k, ...) -> (n, k, ...)`
pub fn split_leading_dim(x: &Tensor, num_samples: usize) -> Result<Tensor> {
    let dims = x.dims();
    let nk = dims[0];
    if num_samples == 0 || nk % num_samples != 0 {
        candle_core::bail!("cannot split {} rows into groups of {}", nk, num_samples);
    }
    let mut split = vec![nk / num_samples, num_samples];
    split.extend_from_slice(&dims[1..]);
    x.reshape(split)
}

/// Repeat each row `num_reps` times consecutively:
/// `[x0, x1] -> [x0, x0, x1, x1]` for `num_reps = 2`
pub fn repeat_rows(x: &Tensor, num_reps: usize) -> Result<Tensor> {
    if num_reps == 1 {
        return Ok(x.clone());
    }
    let dims = x.dims().to_vec();
    let mut expanded = dims.clone();
    expanded.insert(1, num_reps);
    let x = x.unsqueeze(1)?.broadcast_as(expanded)?.contiguous()?;
    merge_leading_dims(&x)
}

/// Repeat rows of `x` so that it lines up with `num_rows` rows of
/// flattened Monte Carlo draws.
pub fn align_rows(x: &Tensor, num_rows: usize) -> Result<Tensor> {
    let n = x.dim(0)?;
    if n == num_rows {
        return Ok(x.clone());
    }
    if n == 0 || num_rows % n != 0 {
        candle_core::bail!("cannot align {} rows with {} rows", n, num_rows);
    }
    repeat_rows(x, num_rows / n)
}
