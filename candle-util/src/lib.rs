pub mod candle_aux_layers;
pub mod candle_batch_ops;
pub mod candle_data_loader;
pub mod candle_fusion;
pub mod candle_inference;
pub mod candle_loss_functions;
pub mod candle_modality;
pub mod candle_model_errors;
pub mod candle_model_traits;
pub mod candle_multimodal_encoder;
pub mod candle_product_of_experts;
pub mod candle_set_attention;
pub mod dist;

pub use candle_core;
pub use candle_nn;
