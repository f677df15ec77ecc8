//! Error types and result types for document store operations.
//!
//! Parse-time problems (bad paths, bad join descriptors, bad patches) are reported
//! as client errors and are raised before any backend round-trip. Use
//! [`DocumentStoreResult<T>`] as the return type for fallible operations.

use bson::error::Error as BsonError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

/// Represents all possible errors that can occur when interacting with a document store.
#[derive(Error, Debug)]
pub enum DocumentStoreError {
    /// The logical path could not be parsed into `/{collection}[/{id}[/{pointer}]]`.
    #[error("INVALID_PATH: {0}")]
    InvalidPath(String),
    /// A `lookup` or `lookup_match` descriptor is malformed.
    #[error("INVALID_LOOKUP_PARAMS: {0}")]
    InvalidLookupParams(String),
    /// A create call supplied an id that is already stored.
    /// The first argument is the document ID, the second is the collection name.
    #[error("CANNOT_POST_OVER_EXISTING_DOCUMENT: {0} in collection {1}")]
    CannotPostOverExistingDocument(String, String),
    /// A collection's id type conflicts with the id type already observed for it.
    #[error("Id type mismatch in collection {collection}: expected {expected}, found {found}")]
    IdTypeMismatch {
        collection: String,
        expected: String,
        found: String,
    },
    /// A patch is structurally invalid (bad pointer, missing value).
    #[error("Invalid patch: {0}")]
    InvalidPatch(String),
    /// A query directive could not be interpreted.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),
    /// One or more "changing" trigger handlers rejected the mutation.
    #[error("Change rejected: {}", .0.join("; "))]
    ChangeRejected(Vec<String>),
    /// Serialization/deserialization error when converting between document formats (BSON, JSON).
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// Error during store initialization or connection setup.
    #[error("Initialization error: {0}")]
    Initialization(String),
    /// The requested document was not found in the collection.
    /// The first argument is the document ID, the second is the collection name.
    #[error("Document not found {0} in collection {1}")]
    DocumentNotFound(String, String),
    /// The document violates structural constraints.
    #[error("Invalid document: {0}")]
    InvalidDocument(String),
    /// An error occurred in the underlying storage backend.
    #[error("Backend error: {0}")]
    Backend(String),
}

impl DocumentStoreError {
    /// Whether the error was caused by the caller's input and should be surfaced
    /// as a 400-class response by the transport layer.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            DocumentStoreError::InvalidPath(_)
                | DocumentStoreError::InvalidLookupParams(_)
                | DocumentStoreError::CannotPostOverExistingDocument(..)
                | DocumentStoreError::InvalidPatch(_)
                | DocumentStoreError::InvalidQuery(_)
                | DocumentStoreError::ChangeRejected(_)
        )
    }
}

/// A specialized `Result` type for document store operations.
pub type DocumentStoreResult<T> = Result<T, DocumentStoreError>;

impl From<BsonError> for DocumentStoreError {
    fn from(err: BsonError) -> Self {
        DocumentStoreError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for DocumentStoreError {
    fn from(err: SerdeJsonError) -> Self {
        DocumentStoreError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(DocumentStoreError::InvalidPath("".into()), true)]
    #[case(DocumentStoreError::InvalidLookupParams("a:b".into()), true)]
    #[case(DocumentStoreError::CannotPostOverExistingDocument("1".into(), "items".into()), true)]
    #[case(DocumentStoreError::Backend("down".into()), false)]
    #[case(DocumentStoreError::IdTypeMismatch { collection: "items".into(), expected: "number".into(), found: "string".into() }, false)]
    fn test_client_error_classification(#[case] err: DocumentStoreError, #[case] expected: bool) {
        assert_eq!(err.is_client_error(), expected);
    }

    #[rstest]
    fn test_change_rejected_message_joins_errors() {
        let err = DocumentStoreError::ChangeRejected(vec!["a".into(), "b".into()]);

        assert_eq!(err.to_string(), "Change rejected: a; b");
    }
}
