use sea_orm::DbErr;
use thiserror::Error;
use tokio::task::JoinError;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] DbErr),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Storage task failed: {0}")]
    Task(#[from] JoinError),
}

pub type StoreResult<T> = Result<T, StoreError>;
