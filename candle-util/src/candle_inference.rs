/// Optimizer and minibatch settings shared by the training loops.
/// Models are built and fed on `device`; nothing reads a global
/// default device or precision.
pub struct TrainConfig {
    pub learning_rate: f32,
    pub batch_size: usize,
    pub num_epochs: usize,
    pub device: candle_core::Device,
    pub verbose: bool,
    pub show_progress: bool,
}

impl TrainConfig {
    pub fn cpu(learning_rate: f32, batch_size: usize, num_epochs: usize) -> Self {
        Self {
            learning_rate,
            batch_size,
            num_epochs,
            device: candle_core::Device::Cpu,
            verbose: false,
            show_progress: true,
        }
    }
}
