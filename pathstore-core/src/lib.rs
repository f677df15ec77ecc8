//! A schema-less document access layer over MongoDB-compatible backends.
//!
//! This crate is the core of the pathstore project and provides:
//!
//! - **Logical paths** ([`path`]) - `/{collection}[/{id}[/{pointer}]]` addressing and JSON-pointer helpers
//! - **Patches** ([`patch`]) - Ordered patch lists and their translation into update commands
//! - **Field typing** ([`field`]) - Declared field types and type-directed coercion
//! - **Query compiler** ([`compiler`]) - The query-string DSL, compiled into filters and aggregation pipelines
//! - **Dynamic models** ([`model`]) - Per-collection schemas resolved at runtime
//! - **Store backend abstraction** ([`backend`]) - Traits for implementing storage backends
//! - **Change triggers** ([`trigger`]) - Pre- and post-commit handlers bound to path patterns
//! - **Document store** ([`store`]) - Reads, writes, aggregation and change propagation
//! - **Error handling** ([`error`]) - Error and result types
//!
//! # Example
//!
//! ```ignore
//! use pathstore_core::{compiler::{self, QueryPair}, field::FieldType};
//! use std::collections::HashMap;
//!
//! let types = HashMap::from([("age".to_string(), FieldType::Number)]);
//! let spec = compiler::parse(&[QueryPair::new("age", "{gte}18")], Some(&types))?;
//!
//! assert_eq!(spec.filter_document(), bson::doc! { "$and": [{ "age": { "$gte": 18_i64 } }] });
//! ```

#[allow(unused_extern_crates)]
extern crate self as pathstore_core;

pub mod backend;
pub mod change;
pub mod compiler;
pub mod config;
pub mod dates;
pub mod error;
pub mod field;
pub mod inflate;
pub mod model;
pub mod notifier;
pub mod patch;
pub mod path;
pub mod query;
pub mod store;
pub mod trigger;
