//! Convenient re-exports of commonly used types from pathstore.
//!
//! ```ignore
//! use pathstore::prelude::*;
//! ```

pub use pathstore_core::{
    backend::{FindOptions, StoreBackend, StoreBackendBuilder, UpdateOutcome},
    change::{DataChange, DataChangedEvent},
    compiler::{LookupSpec, QueryPair, QuerySpec},
    config::StoreConfig,
    error::{DocumentStoreError, DocumentStoreResult},
    field::FieldType,
    inflate::Inflated,
    model::{IdHint, IdType, SchemaDescriptor},
    notifier::{BroadcastNotifier, ChangeNotifier, NoopNotifier},
    patch::{Patch, PatchOp},
    path::DocPath,
    query::{Expr, FieldOp, Filter, FilterRenderer, QueryVisitor, Sort, SortDirection},
    store::{DocumentStore, DocumentStoreBuilder, WriteResult},
    trigger::{PathMatcher, SegmentMatcher, TriggerEngine, TriggerEvent},
};
