//! Partitioned multimodal variational autoencoders.
//!
//! Each modality gets its own latent `m_i` and all modalities share a
//! latent `s`, fused from whichever modalities are observed. The
//! [`objectives`] train the shared space so that any one modality can
//! stand in for the others.

pub mod common;
pub mod config;
pub mod fit_pmvae;
pub mod model_traits;
pub mod mvae_model;
pub mod objectives;
pub mod pmvae_model;
pub mod registry;
pub mod toy_data;
