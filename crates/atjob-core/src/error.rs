use thiserror::Error;

#[derive(Debug, Error)]
pub enum AtjobError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid object key: {0:?} (expected namespace/name)")]
    InvalidKey(String),

    #[error("Invalid manifest: {0}")]
    Manifest(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AtjobError {
    /// Short, stable error code for CLI output and logs.
    pub fn code(&self) -> &'static str {
        match self {
            AtjobError::Config(_) => "CONFIG_ERROR",
            AtjobError::InvalidKey(_) => "INVALID_KEY",
            AtjobError::Manifest(_) => "INVALID_MANIFEST",
            AtjobError::Serialization(_) => "SERIALIZATION_ERROR",
            AtjobError::Io(_) => "IO_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, AtjobError>;
