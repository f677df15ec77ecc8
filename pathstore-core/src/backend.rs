//! Storage backend abstraction for the document store.
//!
//! The document store never talks to a database directly. It builds
//! MongoDB-shaped filter, update and aggregation documents and hands them to a
//! [`StoreBackend`], which executes them verbatim.
//!
//! # Traits
//!
//! - [`StoreBackend`]: The core trait for storage backends
//! - [`StoreBackendBuilder`]: Factory trait for creating backend instances
//!
//! # Examples
//!
//! ```ignore
//! use pathstore_core::backend::{FindOptions, StoreBackend};
//! use bson::doc;
//!
//! let backend = MyBackendImpl::new();
//!
//! backend.insert_one("users", doc! { "_id": 1, "name": "Alice" }).await?;
//! let adults = backend
//!     .find("users", doc! { "age": { "$gte": 18 } }, FindOptions::default())
//!     .await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use async_trait::async_trait;
use bson::Document;
use std::fmt::Debug;

use crate::error::DocumentStoreResult;

/// Options for [`StoreBackend::find`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    /// Projection document (`{ field: 1 }` / `{ field: 0 }`).
    pub projection: Option<Document>,
    /// Sort document (`{ field: 1 | -1 }`).
    pub sort: Option<Document>,
    /// Number of documents to skip.
    pub skip: Option<u64>,
    /// Maximum number of documents to return.
    pub limit: Option<u64>,
}

/// Result of a single-document update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOutcome {
    /// Number of documents matched by the filter.
    pub matched: u64,
    /// Number of documents actually changed.
    pub modified: u64,
}

/// Abstract interface for document storage backends.
///
/// Implementers execute native MongoDB-compatible commands. The store relies on
/// the following semantics:
///
/// - filters support the query operators emitted by [`crate::query::FilterRenderer`],
/// - updates are applied atomically per document (`$set`, `$unset`, `$push`),
/// - aggregation pipelines run as one unit, stages in order.
///
/// # Thread Safety
///
/// All implementations must be thread-safe and support concurrent access from
/// multiple async tasks. No locking is performed by the store itself; concurrent
/// writers to the same document race at the backend.
///
/// # Error Handling
///
/// Backend failures are reported as
/// [`DocumentStoreError::Backend`](crate::error::DocumentStoreError::Backend) and
/// are not translated further.
#[async_trait]
pub trait StoreBackend: Send + Sync + Debug {
    /// Returns the documents of `collection` matching `filter`.
    ///
    /// # Arguments
    ///
    /// * `collection` - The collection to read
    /// * `filter` - MongoDB filter document; empty matches everything
    /// * `options` - Projection, sort and pagination
    async fn find(
        &self,
        collection: &str,
        filter: Document,
        options: FindOptions,
    ) -> DocumentStoreResult<Vec<Document>>;

    /// Returns the first document matching `filter`, if any.
    async fn find_one(
        &self,
        collection: &str,
        filter: Document,
        projection: Option<Document>,
    ) -> DocumentStoreResult<Option<Document>> {
        Ok(self
            .find(
                collection,
                filter,
                FindOptions { projection, limit: Some(1), ..Default::default() },
            )
            .await?
            .into_iter()
            .next())
    }

    /// Runs an aggregation pipeline against `collection`.
    async fn aggregate(
        &self,
        collection: &str,
        pipeline: Vec<Document>,
    ) -> DocumentStoreResult<Vec<Document>>;

    /// Inserts one document. The document carries its own `_id`.
    ///
    /// Implementations must fail when a document with the same `_id` exists.
    async fn insert_one(&self, collection: &str, document: Document) -> DocumentStoreResult<()>;

    /// Applies an update command to the first document matching `filter`.
    async fn update_one(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> DocumentStoreResult<UpdateOutcome>;

    /// Deletes the first document matching `filter`, returning how many were removed.
    async fn delete_one(&self, collection: &str, filter: Document) -> DocumentStoreResult<u64>;

    /// Cleanly shuts down the backend, releasing all resources.
    ///
    /// The default implementation is a no-op.
    async fn shutdown(self) -> DocumentStoreResult<()>
    where
        Self: Sized,
    {
        Ok(())
    }
}

#[async_trait]
impl<B> StoreBackend for &B
where
    B: StoreBackend,
{
    async fn find(
        &self,
        collection: &str,
        filter: Document,
        options: FindOptions,
    ) -> DocumentStoreResult<Vec<Document>> {
        (*self)
            .find(collection, filter, options)
            .await
    }

    async fn find_one(
        &self,
        collection: &str,
        filter: Document,
        projection: Option<Document>,
    ) -> DocumentStoreResult<Option<Document>> {
        (*self)
            .find_one(collection, filter, projection)
            .await
    }

    async fn aggregate(
        &self,
        collection: &str,
        pipeline: Vec<Document>,
    ) -> DocumentStoreResult<Vec<Document>> {
        (*self)
            .aggregate(collection, pipeline)
            .await
    }

    async fn insert_one(&self, collection: &str, document: Document) -> DocumentStoreResult<()> {
        (*self)
            .insert_one(collection, document)
            .await
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> DocumentStoreResult<UpdateOutcome> {
        (*self)
            .update_one(collection, filter, update)
            .await
    }

    async fn delete_one(&self, collection: &str, filter: Document) -> DocumentStoreResult<u64> {
        (*self)
            .delete_one(collection, filter)
            .await
    }
}

#[async_trait]
pub trait StoreBackendBuilder {
    type Backend: StoreBackend;

    async fn build(self) -> DocumentStoreResult<Self::Backend>;
}
