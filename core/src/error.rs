use crate::storage::RecordId;
use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("Record format error: {0}")]
    RecordFormat(String),

    #[error("Record {0} not found")]
    RecordNotFound(RecordId),

    #[error("Security violation: {0}")]
    Security(String),

    #[error("Invalid value for field '{field}': {reason}")]
    FieldValidation { field: String, reason: String },

    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    #[error("Lock wait on record {0} was interrupted")]
    Interrupted(RecordId),

    #[error("Record numbers exhausted at {0}")]
    IdsExhausted(u64),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl StoreError {
    pub(crate) fn field(field: &str, reason: impl Into<String>) -> Self {
        StoreError::FieldValidation {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    /// Errors that can only come out of loading and leave no usable store.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StoreError::SchemaMismatch(_) | StoreError::RecordFormat(_)
        )
    }
}
