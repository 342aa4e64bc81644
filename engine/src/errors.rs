use thiserror::Error;

/// Why an index operation was refused.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexError {
    #[error("Vector dimension mismatch: index expects {expected}, got {actual}")]
    SchemaMismatch { expected: usize, actual: usize },
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Storage error: {0}")]
    Persist(#[from] resona_storage::errors::Error),
    #[error("Index error: {0}")]
    Index(#[from] IndexError),
    #[error("Analysis error: {0}")]
    Analysis(#[from] resona_analysis::errors::AnalysisError),
    #[error("Deadline exceeded")]
    Timeout,
    #[error("Catalog error: {0}")]
    Catalog(String),
    #[error("Missing catalog credentials: {0}")]
    Auth(String),
    #[error("Background task failed: {0}")]
    Task(String),
}

pub type EngineResult<T> = Result<T, EngineError>;
