use thiserror::Error;
use trdesign_core::StructureError;

#[derive(Debug, Error)]
pub enum DesignError {
    /// Protocol and arguments disagree, or the session is not prepared.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Shape mismatch for {what}: expected {expected}, found {found}")]
    Shape {
        what: String,
        expected: String,
        found: String,
    },

    #[error(transparent)]
    Data(#[from] StructureError),

    #[error("Tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    #[error("Invalid options file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DesignError>;
