use lastmile_storage::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// The sample failed validation and was not stored.
    #[error("invalid position sample: {0}")]
    InvalidSample(String),

    /// The sample could not be persisted.
    #[error("position not persisted: {0}")]
    Persistence(#[from] StorageError),
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("pub/sub transport unavailable")]
    Unavailable,

    #[error("pub/sub transport error: {0}")]
    Backend(String),
}
