//! Main pathstore crate providing a unified interface for path-addressed
//! document storage.
//!
//! This crate is the primary entry point for users of the pathstore framework.
//! It re-exports the core types and functionality from the sub-crates and provides
//! convenient access to the storage backends.
//!
//! # Features
//!
//! - **Path addressing** - Read and write whole collections, documents or nested
//!   values through `/{collection}[/{id}[/{pointer}]]` paths
//! - **Ordered patches** - `replace`, `add` and `remove` patches applied as one atomic update
//! - **Query string DSL** - Filters, sorting, paging, joins, computed fields and grouping
//!   from flat key/value pairs
//! - **Triggers** - Pre-commit validation and post-commit handlers bound to path patterns
//! - **Multiple backends** - In-memory and MongoDB storage behind one trait
//!
//! # Quick Start
//!
//! ```ignore
//! use pathstore::{prelude::*, memory::InMemoryStore};
//! use bson::bson;
//!
//! #[tokio::main]
//! async fn main() -> DocumentStoreResult<()> {
//!     let store = DocumentStore::new(InMemoryStore::builder().build().await?);
//!
//!     store
//!         .on_change("/users/:id/email", |event: TriggerEvent| async move {
//!             println!("{} changed by {:?}", event.path, event.user);
//!         })
//!         .await;
//!
//!     let created = store
//!         .post("/users", bson!({ "name": "Alice", "email": "a@example.com" }), Some("admin"))
//!         .await?
//!         .expect("collection exists");
//!
//!     store
//!         .patch(&created.path, vec![Patch::replace("/email", "alice@example.com")], None)
//!         .await?;
//!
//!     let adults = store
//!         .get("/users", &[QueryPair::new("age", "{gte}18"), QueryPair::new("sort_by", "-name")])
//!         .await?;
//!
//!     store.shutdown().await
//! }
//! ```
//!
//! # Backends
//!
//! - [`memory`] - In-memory storage for development and testing
//! - [`mongodb`] - Persistent MongoDB backend (requires `mongodb` feature)

pub mod prelude;

pub use pathstore_core::{
    backend, change, compiler, config, error, field, inflate, model, notifier, patch, path, query, store, trigger,
};

// Re-export BSON types for convenience
pub use bson;

/// In-memory storage backend implementations.
pub mod memory {
    pub use pathstore_memory::{InMemoryStore, InMemoryStoreBuilder};
}

/// MongoDB storage backend implementations.
///
/// This module is only available when the `mongodb` feature is enabled.
#[cfg(feature = "mongodb")]
pub mod mongodb {
    pub use pathstore_mongodb::{MongoDbStore, MongoDbStoreBuilder};
}
