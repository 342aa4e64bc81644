use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("SurrealDB error: {0}")]
    DbError(#[from] Box<surrealdb::Error>),
    #[error("Failed to set database path to {0}")]
    DbPathSetError(PathBuf),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Item not found.")]
    NotFound,
    #[error("Item not created.")]
    NotCreated,
}

impl From<surrealdb::Error> for Error {
    #[inline]
    fn from(err: surrealdb::Error) -> Self {
        Self::DbError(Box::new(err))
    }
}

pub type StorageResult<T> = std::result::Result<T, Error>;
