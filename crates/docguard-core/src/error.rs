use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Job not found: {0}")]
    JobNotFound(uuid::Uuid),

    #[error("No dead job for document: {0}")]
    DeadJobNotFound(String),

    #[error("Invalid job state: {0}")]
    InvalidJobState(String),

    #[error("Invalid file type: {0}")]
    InvalidFileType(String),

    #[error("Queue has not been initialized")]
    QueueNotInitialized,

    #[error("Queue is closed")]
    QueueClosed,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
