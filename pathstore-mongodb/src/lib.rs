//! MongoDB backend implementation for pathstore.
//!
//! This crate provides a MongoDB-based implementation of the `StoreBackend` trait.
//! The store already speaks MongoDB's command language, so filters, updates
//! and aggregation pipelines are handed to the driver as they are.
//!
//! To use this backend, include the `mongodb` feature in your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! pathstore = { version = "x.y.z", features = ["mongodb"] }
//! ```
//!
//! # Example
//!
//! ```ignore
//! use pathstore::{DocumentStore, backend::StoreBackendBuilder, mongodb::MongoDbStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = MongoDbStore::builder("mongodb://localhost:27017", "my_database")
//!         .build()
//!         .await?;
//!     let store = DocumentStore::new(backend);
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as pathstore_mongodb;

pub mod store;

pub use store::{MongoDbStore, MongoDbStoreBuilder};
