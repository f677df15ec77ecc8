use async_trait::async_trait;
use bson::Document;
use futures::TryStreamExt;
use mongodb::{Client, Collection as MongoCollection, options::ClientOptions};
use tracing::{debug, trace};

use pathstore_core::{
    backend::{FindOptions, StoreBackend, StoreBackendBuilder, UpdateOutcome},
    error::{DocumentStoreError, DocumentStoreResult},
};

fn backend_error(e: mongodb::error::Error) -> DocumentStoreError {
    DocumentStoreError::Backend(e.to_string())
}

/// MongoDB-backed [`StoreBackend`]. Commands built by the store are passed to
/// the driver unchanged.
#[derive(Debug)]
pub struct MongoDbStore {
    client: Client,
    database: String,
}

impl MongoDbStore {
    pub fn new(client: Client, database: String) -> Self {
        Self { client, database }
    }

    pub fn builder(dsn: &str, database: &str) -> MongoDbStoreBuilder {
        MongoDbStoreBuilder::new(dsn, database)
    }

    fn get_collection(&self, collection_name: &str) -> MongoCollection<Document> {
        self.client
            .database(&self.database)
            .collection(collection_name)
    }
}

#[async_trait]
impl StoreBackend for MongoDbStore {
    async fn find(
        &self,
        collection: &str,
        filter: Document,
        options: FindOptions,
    ) -> DocumentStoreResult<Vec<Document>> {
        let mut driver_options = mongodb::options::FindOptions::default();
        driver_options.projection = options.projection;
        driver_options.sort = options.sort;
        driver_options.skip = options.skip;
        driver_options.limit = options.limit.map(|limit| limit as i64);

        self.get_collection(collection)
            .find(filter)
            .with_options(driver_options)
            .await
            .map_err(backend_error)?
            .try_collect::<Vec<Document>>()
            .await
            .map_err(backend_error)
    }

    async fn find_one(
        &self,
        collection: &str,
        filter: Document,
        projection: Option<Document>,
    ) -> DocumentStoreResult<Option<Document>> {
        let mut driver_options = mongodb::options::FindOneOptions::default();
        driver_options.projection = projection;

        self.get_collection(collection)
            .find_one(filter)
            .with_options(driver_options)
            .await
            .map_err(backend_error)
    }

    async fn aggregate(
        &self,
        collection: &str,
        pipeline: Vec<Document>,
    ) -> DocumentStoreResult<Vec<Document>> {
        trace!(collection, ?pipeline, "running aggregation");

        self.get_collection(collection)
            .aggregate(pipeline)
            .await
            .map_err(backend_error)?
            .try_collect::<Vec<Document>>()
            .await
            .map_err(backend_error)
    }

    async fn insert_one(&self, collection: &str, document: Document) -> DocumentStoreResult<()> {
        self.get_collection(collection)
            .insert_one(document)
            .await
            .map_err(backend_error)?;

        Ok(())
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> DocumentStoreResult<UpdateOutcome> {
        let result = self
            .get_collection(collection)
            .update_one(filter, update)
            .await
            .map_err(backend_error)?;

        Ok(UpdateOutcome {
            matched: result.matched_count,
            modified: result.modified_count,
        })
    }

    async fn delete_one(&self, collection: &str, filter: Document) -> DocumentStoreResult<u64> {
        Ok(self
            .get_collection(collection)
            .delete_one(filter)
            .await
            .map_err(backend_error)?
            .deleted_count)
    }

    async fn shutdown(self) -> DocumentStoreResult<()> {
        debug!(database = %self.database, "shutting down MongoDB client");
        self.client.shutdown().await;

        Ok(())
    }
}

pub struct MongoDbStoreBuilder {
    dsn: String,
    database: String,
    app_name: Option<String>,
}

impl MongoDbStoreBuilder {
    pub fn new(dsn: &str, database: &str) -> Self {
        Self {
            dsn: dsn.to_string(),
            database: database.to_string(),
            app_name: None,
        }
    }

    /// Application name reported to the server in the connection handshake.
    pub fn app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = Some(app_name.into());
        self
    }
}

#[async_trait]
impl StoreBackendBuilder for MongoDbStoreBuilder {
    type Backend = MongoDbStore;

    async fn build(self) -> DocumentStoreResult<Self::Backend> {
        let mut options = ClientOptions::parse(&self.dsn)
            .await
            .map_err(|e| DocumentStoreError::Initialization(e.to_string()))?;
        if self.app_name.is_some() {
            options.app_name = self.app_name;
        }

        Ok(MongoDbStore::new(
            Client::with_options(options).map_err(|e| DocumentStoreError::Initialization(e.to_string()))?,
            self.database,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[tokio::test]
    async fn test_builder_rejects_malformed_dsn() {
        let built = MongoDbStore::builder("not-a-dsn", "pathstore").build().await;

        assert!(matches!(built, Err(DocumentStoreError::Initialization(_))));
    }
}
