use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("File not found or could not be read: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse configuration JSON: {0}")]
    DeserializationError(#[from] serde_json::Error),

    #[error("Failed to read or write checkpoint: {0}")]
    CheckpointError(#[from] bincode::Error),

    #[error("Failed to write statistics: {0}")]
    StatisticsError(#[from] csv::Error),

    #[error("Failed to encode or decode a model record: {0}")]
    RecordError(String),

    #[error("Failed to read tensor data: {0}")]
    TensorData(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Checkpoint does not match the configured model: expected {expected}, found {found}")]
    CheckpointMismatch { expected: String, found: String },

    #[error("Observation has {found} features but the model expects {expected}")]
    ObservationShape { expected: usize, found: usize },

    #[error("Batch layout mismatch: expected {expected} entries, found {found}")]
    BatchShape { expected: usize, found: usize },

    #[error("Rollout buffer is full (capacity {0})")]
    BufferFull(usize),

    #[error("Rollout buffer holds no transitions")]
    EmptyBuffer,
}

pub type Result<T> = std::result::Result<T, Error>;
