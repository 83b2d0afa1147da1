use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Entity '{0}' not found")]
    NotFound(String),

    #[error("Decode error: {0}")]
    DecodeError(String),

    #[error("Transaction aborted: {0}")]
    TransactionAborted(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Snapshot contention: no consistent read after {0} attempts")]
    SnapshotContention(usize),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Execution error: {0}")]
    ExecutionError(String),
}

impl StoreError {
    /// `true` for the failures an optimistic retry can resolve.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::TransactionAborted(_))
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

impl From<tokio::time::error::Elapsed> for StoreError {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        Self::StoreUnavailable(format!("operation deadline exceeded ({err})"))
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        Self::StoreUnavailable(err.to_string())
    }
}
