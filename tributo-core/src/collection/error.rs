use thiserror::Error;

/// Errors raised by vector collection operations.
///
/// All of them are local failures of the call that raised them; nothing is
/// retried by the collection itself.
#[derive(Debug, Error)]
pub enum CollectionError {
    /// The requested schema conflicts with the stored one, or a document
    /// does not conform to the collection schema.
    #[error("Schema mismatch for collection '{collection}': {reason}")]
    SchemaMismatch { collection: String, reason: String },

    /// A vector does not have the collection's declared dimension.
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// A filter expression is malformed or references an unknown column.
    #[error("Invalid predicate: {0}")]
    InvalidPredicate(String),

    /// An index build was requested on a collection with no documents.
    #[error("Collection '{0}' is empty, nothing to index")]
    EmptyCollection(String),

    /// A caller-supplied document id is already taken.
    #[error("Duplicate document id: {0}")]
    DuplicateId(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The storage backend failed.
    #[error("Storage error: {0:#}")]
    Storage(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, CollectionError>;
