//! In-memory document storage backend for pathstore.
//!
//! This crate provides a thread-safe, in-memory implementation of the `StoreBackend` trait.
//! It interprets the MongoDB command documents the store emits, which makes it
//! suitable for development, testing, and small-scale deployments.
//!
//! # Features
//!
//! - **Thread-safe access** - Concurrent reads and writes using async-aware RwLock
//! - **Filters** - Comparison, set, regex, `$elemMatch`, `$geoWithin` and `$expr` conditions
//! - **Updates** - `$set`, `$unset` and `$push` applied atomically per document
//! - **Aggregation** - `$match`, `$sort`, `$skip`, `$limit`, `$project`, `$addFields`,
//!   `$lookup`, `$unwind` and `$group`
//!
//! # Quick Start
//!
//! ```ignore
//! use pathstore::{DocumentStore, memory::InMemoryStore};
//! use bson::bson;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = DocumentStore::new(InMemoryStore::new());
//!
//!     let created = store.post("/users", bson!({ "name": "Alice" }), None).await?;
//!     let user = store.get(&created.path, &[]).await?;
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as pathstore_memory;

mod evaluator;
mod expression;
mod pipeline;
mod projection;
pub mod store;
mod update;
mod value;

pub use store::{InMemoryStore, InMemoryStoreBuilder};
