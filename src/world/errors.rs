use thiserror::Error;

/// Errors that can arise while interacting with the world store and catalog.
#[derive(Debug, Error)]
pub enum WorldError {
    /// Wrapper around sled's error type.
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    /// Wrapper around bincode serialization and deserialization errors.
    #[error("serialization error: {0}")]
    Bincode(#[from] bincode::Error),

    /// Wrapper around IO errors (directory creation, catalog files).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Catalog JSON could not be parsed.
    #[error("catalog parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed UUID bytes or text.
    #[error("uuid error: {0}")]
    Uuid(#[from] uuid::Error),

    /// UTF-8 encoding error
    #[error("utf-8 error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    /// Returned when fetching a record that is not present.
    #[error("record not found: {0}")]
    NotFound(String),

    /// A record references a catalog id that is not loaded.
    #[error("unknown {kind} in catalog: {id}")]
    UnknownCatalogEntry { kind: &'static str, id: String },

    /// A fixed-width value had the wrong length.
    #[error("corrupt {entity} value: expected {expected} bytes, got {found}")]
    Corrupt {
        entity: &'static str,
        expected: usize,
        found: usize,
    },

    /// A multi-tree transaction aborted or conflicted.
    #[error("transaction failed: {0}")]
    Transaction(String),
}

impl From<sled::transaction::TransactionError<WorldError>> for WorldError {
    fn from(err: sled::transaction::TransactionError<WorldError>) -> Self {
        match err {
            sled::transaction::TransactionError::Abort(inner) => inner,
            sled::transaction::TransactionError::Storage(e) => WorldError::Sled(e),
        }
    }
}
