//! In-memory storage implementation for document stores.
//!
//! This module provides a simple backend that keeps every collection as an
//! insertion-ordered list of BSON documents behind an async-safe read-write
//! lock, and interprets filters, updates and pipelines itself.

use std::sync::Arc;

use async_trait::async_trait;
use bson::{Bson, Document};
use mea::rwlock::RwLock;
use tracing::trace;

use pathstore_core::{
    backend::{FindOptions, StoreBackend, StoreBackendBuilder, UpdateOutcome},
    error::{DocumentStoreError, DocumentStoreResult},
};

use crate::{
    evaluator::DocumentEvaluator,
    expression::Variables,
    pipeline::{Collections, PipelineExecutor},
    projection, update,
    value::equals,
};

/// Thread-safe in-memory document storage backend.
///
/// This struct implements the [`StoreBackend`] trait to provide a fully functional
/// document store that operates entirely in memory. Documents are kept in
/// insertion order, which is the natural order `find` and `aggregate` return
/// them in when no sort is given.
///
/// # Thread Safety
///
/// `InMemoryStore` is cloneable and uses an `Arc`-wrapped internal state, allowing
/// it to be safely shared across async tasks. Multiple clones of the same instance
/// share the same underlying data. Each update runs under the write lock, so it
/// is atomic per document.
///
/// # Performance
///
/// Queries scan all documents in a collection (no indexing). For small to medium
/// datasets this is typically acceptable. For larger datasets, use the MongoDB
/// backend.
///
/// # Example
///
/// ```ignore
/// use pathstore_memory::InMemoryStore;
/// use pathstore_core::backend::{FindOptions, StoreBackend};
/// use bson::doc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = InMemoryStore::new();
///
///     store.insert_one("users", doc! { "_id": 1, "name": "Alice", "age": 30 }).await?;
///
///     let adults = store
///         .find("users", doc! { "age": { "$gte": 18 } }, FindOptions::default())
///         .await?;
///     assert_eq!(adults.len(), 1);
///
///     Ok(())
/// }
/// ```
#[derive(Default, Clone, Debug)]
pub struct InMemoryStore {
    /// collection name -> documents in insertion order
    store: Arc<RwLock<Collections>>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory document store.
    pub fn new() -> Self {
        Self { store: Arc::new(RwLock::new(Collections::new())) }
    }

    /// Creates a builder for constructing an `InMemoryStore`.
    ///
    /// # Example
    ///
    /// ```ignore
    /// use pathstore_memory::InMemoryStore;
    ///
    /// let store = InMemoryStore::builder()
    ///     .seed("users", vec![doc! { "_id": 1, "name": "Alice" }])
    ///     .build()
    ///     .await?;
    /// ```
    pub fn builder() -> InMemoryStoreBuilder {
        InMemoryStoreBuilder::default()
    }

    /// Names of the collections holding at least one document.
    pub async fn collections(&self) -> Vec<String> {
        let store = self.store.read().await;
        let mut names = store
            .iter()
            .filter(|(_, documents)| !documents.is_empty())
            .map(|(name, _)| name.clone())
            .collect::<Vec<_>>();
        names.sort();
        names
    }
}

/// Index of the first document in `documents` matching `filter`.
fn position(documents: &[Document], filter: &Document) -> DocumentStoreResult<Option<usize>> {
    let variables = Variables::new();
    for (index, document) in documents.iter().enumerate() {
        if DocumentEvaluator::new(document, &variables).evaluate(filter)? {
            return Ok(Some(index));
        }
    }

    Ok(None)
}

#[async_trait]
impl StoreBackend for InMemoryStore {
    async fn find(
        &self,
        collection: &str,
        filter: Document,
        options: FindOptions,
    ) -> DocumentStoreResult<Vec<Document>> {
        let mut pipeline = vec![bson::doc! { "$match": filter }];
        if let Some(sort) = options.sort {
            pipeline.push(bson::doc! { "$sort": sort });
        }
        if let Some(skip) = options.skip {
            pipeline.push(bson::doc! { "$skip": skip as i64 });
        }
        if let Some(limit) = options.limit {
            pipeline.push(bson::doc! { "$limit": limit as i64 });
        }

        let store = self.store.read().await;
        let documents = store.get(collection).cloned().unwrap_or_default();
        let found = PipelineExecutor::new(&store).run(documents, &pipeline, &Variables::new())?;

        match options.projection {
            Some(spec) => found
                .iter()
                .map(|document| projection::project(document, &spec, &Variables::new()))
                .collect(),
            None => Ok(found),
        }
    }

    async fn aggregate(
        &self,
        collection: &str,
        pipeline: Vec<Document>,
    ) -> DocumentStoreResult<Vec<Document>> {
        trace!(collection, stages = pipeline.len(), "running aggregation");

        let store = self.store.read().await;
        let documents = store.get(collection).cloned().unwrap_or_default();

        PipelineExecutor::new(&store).run(documents, &pipeline, &Variables::new())
    }

    async fn insert_one(&self, collection: &str, document: Document) -> DocumentStoreResult<()> {
        let id = document
            .get("_id")
            .cloned()
            .ok_or_else(|| DocumentStoreError::InvalidDocument("document has no `_id`".into()))?;

        let mut store = self.store.write().await;
        let documents = store.entry(collection.to_string()).or_default();

        if documents
            .iter()
            .any(|existing| existing.get("_id").is_some_and(|other| equals(other, &id)))
        {
            return Err(DocumentStoreError::Backend(format!(
                "E11000 duplicate key error collection: {} dup key: {{ _id: {} }}",
                collection,
                Bson::to_string(&id),
            )));
        }

        documents.push(document);
        Ok(())
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> DocumentStoreResult<UpdateOutcome> {
        let mut store = self.store.write().await;
        let Some(documents) = store.get_mut(collection) else {
            return Ok(UpdateOutcome::default());
        };
        let Some(index) = position(documents, &filter)? else {
            return Ok(UpdateOutcome::default());
        };

        let modified = update::apply(&mut documents[index], &update)?;

        Ok(UpdateOutcome { matched: 1, modified: u64::from(modified) })
    }

    async fn delete_one(&self, collection: &str, filter: Document) -> DocumentStoreResult<u64> {
        let mut store = self.store.write().await;
        let Some(documents) = store.get_mut(collection) else {
            return Ok(0);
        };

        match position(documents, &filter)? {
            Some(index) => {
                documents.remove(index);
                Ok(1)
            }
            None => Ok(0),
        }
    }
}

/// Builder for constructing [`InMemoryStore`] instances, optionally seeded
/// with documents.
///
/// # Example
///
/// ```ignore
/// use pathstore_memory::InMemoryStore;
/// use pathstore_core::backend::StoreBackendBuilder;
///
/// #[tokio::main]
/// async fn main() {
///     let store = InMemoryStore::builder().build().await.unwrap();
/// }
/// ```
#[derive(Default)]
pub struct InMemoryStoreBuilder {
    seed: Collections,
}

impl InMemoryStoreBuilder {
    /// Pre-populates `collection`. Seeded documents are not checked for
    /// duplicate ids.
    pub fn seed(mut self, collection: impl Into<String>, documents: Vec<Document>) -> Self {
        self.seed
            .entry(collection.into())
            .or_default()
            .extend(documents);
        self
    }
}

#[async_trait]
impl StoreBackendBuilder for InMemoryStoreBuilder {
    type Backend = InMemoryStore;

    /// Builds and returns a new [`InMemoryStore`] holding the seeded documents.
    async fn build(self) -> DocumentStoreResult<Self::Backend> {
        Ok(InMemoryStore { store: Arc::new(RwLock::new(self.seed)) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use rstest::{fixture, rstest};

    #[fixture]
    async fn store() -> InMemoryStore {
        InMemoryStore::builder()
            .seed(
                "users",
                vec![
                    doc! { "_id": 1, "name": "Alice", "age": 30 },
                    doc! { "_id": 2, "name": "Bob", "age": 17 },
                    doc! { "_id": 3, "name": "Carol", "age": 45 },
                ],
            )
            .build()
            .await
            .unwrap()
    }

    #[rstest]
    #[tokio::test]
    async fn test_find_with_options(#[future] store: InMemoryStore) {
        let store = store.await;

        let found = store
            .find(
                "users",
                doc! { "age": { "$gte": 18 } },
                FindOptions {
                    projection: Some(doc! { "name": 1, "_id": 0 }),
                    sort: Some(doc! { "age": -1 }),
                    skip: Some(0),
                    limit: Some(1),
                },
            )
            .await
            .unwrap();

        assert_eq!(found, vec![doc! { "name": "Carol" }]);
        assert!(store.find("missing", doc! {}, FindOptions::default()).await.unwrap().is_empty());
    }

    #[rstest]
    #[tokio::test]
    async fn test_find_one_uses_default(#[future] store: InMemoryStore) {
        let store = store.await;

        let found = store
            .find_one("users", doc! { "name": "Bob" }, Some(doc! { "_id": 1 }))
            .await
            .unwrap();

        assert_eq!(found, Some(doc! { "_id": 2 }));
    }

    #[rstest]
    #[tokio::test]
    async fn test_insert_rejects_duplicate_id(#[future] store: InMemoryStore) {
        let store = store.await;

        store.insert_one("users", doc! { "_id": 4, "name": "Dan" }).await.unwrap();
        let duplicate = store.insert_one("users", doc! { "_id": 4_i64 }).await;

        assert!(matches!(duplicate, Err(DocumentStoreError::Backend(_))));
        assert!(store.insert_one("users", doc! { "name": "no id" }).await.is_err());
    }

    #[rstest]
    #[tokio::test]
    async fn test_update_and_delete_one(#[future] store: InMemoryStore) {
        let store = store.await;

        let outcome = store
            .update_one("users", doc! { "_id": 2 }, doc! { "$set": { "age": 18 } })
            .await
            .unwrap();
        assert_eq!(outcome, UpdateOutcome { matched: 1, modified: 1 });

        let unchanged = store
            .update_one("users", doc! { "_id": 2 }, doc! { "$set": { "age": 18 } })
            .await
            .unwrap();
        assert_eq!(unchanged, UpdateOutcome { matched: 1, modified: 0 });

        let missing = store
            .update_one("users", doc! { "_id": 99 }, doc! { "$set": { "age": 1 } })
            .await
            .unwrap();
        assert_eq!(missing.matched, 0);

        assert_eq!(store.delete_one("users", doc! { "_id": 1 }).await.unwrap(), 1);
        assert_eq!(store.delete_one("users", doc! { "_id": 1 }).await.unwrap(), 0);
        assert_eq!(store.collections().await, vec!["users".to_string()]);
    }

    #[rstest]
    #[tokio::test]
    async fn test_clones_share_state(#[future] store: InMemoryStore) {
        let store = store.await;
        let clone = store.clone();

        clone.insert_one("audit", doc! { "_id": "x" }).await.unwrap();

        assert_eq!(store.collections().await, vec!["audit".to_string(), "users".to_string()]);
    }
}
