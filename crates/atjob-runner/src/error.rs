use atjob_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl RunnerError {
    pub fn code(&self) -> &'static str {
        match self {
            RunnerError::Store(_) => "STORE_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, RunnerError>;
