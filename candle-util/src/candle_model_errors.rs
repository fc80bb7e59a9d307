use thiserror::Error;

/// Configuration and call-time failures of the multimodal models
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("{what}: expected {expected} modalities, found {found}")]
    ModalityCountMismatch {
        what: String,
        expected: usize,
        found: usize,
    },

    #[error("{context}: at least one modality must be present")]
    AllModalitiesAbsent { context: String },

    #[error("{operation} only supports {expected} modalities, found {found}")]
    UnsupportedArity {
        operation: String,
        expected: usize,
        found: usize,
    },

    #[error("{operation}: {reason}")]
    Unsupported { operation: String, reason: String },

    #[error("unknown {kind} `{key}`")]
    UnknownRegistryKey { kind: String, key: String },
}

impl From<ModelError> for candle_core::Error {
    fn from(err: ModelError) -> Self {
        candle_core::Error::wrap(err)
    }
}
