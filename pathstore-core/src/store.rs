//! Main document store interface.
//!
//! [`DocumentStore`] addresses documents by logical path
//! (`/{collection}[/{id}[/{pointer}]]`), compiles query pairs into backend
//! commands, and runs every mutation through the same sequence:
//!
//! 1. normalize the patches and coerce their values by the collection's model,
//! 2. run the "changing" triggers and abort with
//!    [`DocumentStoreError::ChangeRejected`] if any of them objects,
//! 3. issue one atomic write,
//! 4. persist a [`DataChange`], publish a [`DataChangedEvent`] and spawn the
//!    "change" triggers without awaiting them.
//!
//! # Example
//!
//! ```ignore
//! use pathstore::prelude::*;
//!
//! let store = DocumentStore::new(InMemoryStore::new());
//!
//! let created = store.post("/items", bson!({ "name": "desk" }), Some("ada")).await?;
//! store.patch("/items/1", vec![Patch::replace("/price", "120")], None).await?;
//! let page = store.agg("/items", false, &[QueryPair::new("price", "{gte}100")]).await?;
//! ```

use std::{collections::HashMap, sync::Arc};

use bson::{Bson, Document, doc};
use tracing::{debug, error, warn};

use crate::{
    backend::{FindOptions, StoreBackend},
    change::{DataChange, DataChangedEvent},
    compiler::{self, QueryPair, QuerySpec},
    config::StoreConfig,
    error::{DocumentStoreError, DocumentStoreResult},
    field::{self, FieldTypeLookup},
    model::{DynamicModel, IdHint, IdType, ModelRegistry, SchemaDescriptor},
    notifier::{self, ChangeNotifier, NoopNotifier},
    patch::{self, Patch},
    path::{self, DocPath},
    query::Filter,
    trigger::{PathMatcher, TriggerEngine, TriggerEvent, TriggerRegistry},
};

/// Outcome of a mutating call.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteResult {
    /// Path of the mutated document, `/{collection}/{id}`.
    pub path: String,
    pub id: Bson,
    /// Patches describing the write, absolute from the document root.
    pub patches: Vec<Patch>,
    /// Whether the backend reported a change. Change events are emitted only
    /// for applied writes.
    pub applied: bool,
}

struct Resolved {
    model: Arc<DynamicModel>,
    id: Option<Bson>,
}

/// A document store bound to a specific backend implementation.
///
/// # Type Parameters
///
/// * `B` - The backend implementation type
///
/// # Error Handling
///
/// Malformed paths, directives and patches fail before the backend is called.
/// Model problems (an id that does not fit the collection's id type, a
/// conflicting id type) are logged and degrade to `Ok(None)`.
#[derive(Debug)]
pub struct DocumentStore<B: StoreBackend> {
    backend: B,
    config: StoreConfig,
    models: ModelRegistry,
    triggers: TriggerEngine,
    notifier: Arc<dyn ChangeNotifier>,
}

impl<B: StoreBackend> DocumentStore<B> {
    /// Creates a store with the default configuration and no notifier.
    pub fn new(backend: B) -> Self {
        Self::builder(backend).build()
    }

    pub fn builder(backend: B) -> DocumentStoreBuilder<B> {
        DocumentStoreBuilder::new(backend)
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn models(&self) -> &ModelRegistry {
        &self.models
    }

    /// Handle over the store's triggers. Cloning it shares the registry.
    pub fn triggers(&self) -> &TriggerEngine {
        &self.triggers
    }

    /// Registers a post-commit handler for `pattern`.
    pub async fn on_change<F, Fut>(&self, pattern: &str, handler: F)
    where
        F: Fn(TriggerEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.triggers.on_change(pattern, handler).await
    }

    /// Registers a pre-commit handler for `pattern`.
    pub async fn on_changing<F, Fut>(&self, pattern: &str, handler: F)
    where
        F: Fn(TriggerEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), String>> + Send + 'static,
    {
        self.triggers.on_changing(pattern, handler).await
    }

    /// Reads a document, a field inside it, or a page of a collection.
    ///
    /// A path with an id returns the document (or the value at its pointer);
    /// `select` is the only directive that applies. A collection path returns
    /// an array of the documents matching the filter, sorted and paginated,
    /// bounded by [`StoreConfig::default_per_page`].
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::InvalidPath`] or a directive error for
    /// malformed input, and backend errors unchanged.
    pub async fn get(&self, path: &str, pairs: &[QueryPair]) -> DocumentStoreResult<Option<Bson>> {
        let path = DocPath::parse(path)?;
        compiler::validate(pairs)?;

        let Some(Resolved { model, id }) = self.resolve(&path, IdHint::None).await? else {
            return Ok(None);
        };
        let spec = self.compile(&model, pairs)?;

        match id {
            Some(id) => {
                let found = self
                    .backend
                    .find_one(&path.collection, doc! { "_id": id }, spec.select.clone())
                    .await?
                    .map(Bson::Document);

                Ok(match &path.pointer {
                    Some(pointer) => found.and_then(|document| path::get(&document, pointer).cloned()),
                    None => found,
                })
            }
            None => {
                let (skip, limit) = spec.skip_limit(Some(self.default_per_page()));
                let found = self
                    .backend
                    .find(
                        &path.collection,
                        spec.filter_document(),
                        FindOptions {
                            projection: spec.select.clone(),
                            sort: spec.sort_document(),
                            skip,
                            limit,
                        },
                    )
                    .await?;

                Ok(Some(Bson::Array(found.into_iter().map(Bson::Document).collect())))
            }
        }
    }

    /// Creates a document, or appends to an array inside one.
    ///
    /// Without an id in `path`, `data` must be an object; its `_id` is used when
    /// present and generated otherwise. With an id, `data` is pushed onto the
    /// array at the path's pointer.
    ///
    /// # Errors
    ///
    /// - [`DocumentStoreError::CannotPostOverExistingDocument`] when the supplied id is taken
    /// - [`DocumentStoreError::InvalidPath`] when an id is given without a pointer
    /// - [`DocumentStoreError::ChangeRejected`] when a "changing" trigger objects
    pub async fn post(&self, path: &str, data: Bson, user: Option<&str>) -> DocumentStoreResult<Option<WriteResult>> {
        let path = DocPath::parse(path)?;

        match path.id {
            None => self.create(&path, data, user).await,
            Some(_) => self.append(&path, data, user).await,
        }
    }

    async fn create(&self, path: &DocPath, data: Bson, user: Option<&str>) -> DocumentStoreResult<Option<WriteResult>> {
        let Bson::Document(mut document) = data else {
            return Err(DocumentStoreError::InvalidDocument(format!(
                "cannot create a document in {} from a non-object value",
                path.collection
            )));
        };

        // A string id may be a path segment for any id type.
        let hint = match document.get("_id") {
            None => IdHint::None,
            Some(Bson::String(_)) => IdHint::Fallback(IdType::String),
            Some(id) => IdType::of(id).map_or(IdHint::None, IdHint::Strict),
        };
        let Some(Resolved { model, .. }) = self.resolve(path, hint).await? else {
            return Ok(None);
        };

        let id = match document.remove("_id") {
            Some(Bson::String(raw)) => match model.coerce_id(&raw) {
                Some(id) => id,
                None => {
                    warn!(collection = %path.collection, id = %raw, id_type = %model.id_type, "id does not fit collection");
                    return Ok(None);
                }
            },
            Some(id) => id,
            None => model.generate_id(&self.backend).await?,
        };

        let exists = self
            .backend
            .find_one(&path.collection, doc! { "_id": id.clone() }, Some(doc! { "_id": 1 }))
            .await?
            .is_some();
        if exists {
            return Err(DocumentStoreError::CannotPostOverExistingDocument(
                id_segment(&id),
                path.collection.clone(),
            ));
        }

        let mut stored = doc! { "_id": id.clone() };
        if let Bson::Document(fields) = coerce_tree(&model, "/", Bson::Document(document)) {
            for (key, value) in fields {
                stored.insert(key, value);
            }
        }

        let base = DocPath::document(&path.collection, id_segment(&id)).base();
        let patches = vec![Patch::add("/", stored.clone())];

        self.check_changing(&base, None, &patches, user).await?;
        self.backend.insert_one(&path.collection, stored).await?;

        self.committed(&path.collection, &id, base, patches, user).await
    }

    async fn append(&self, path: &DocPath, data: Bson, user: Option<&str>) -> DocumentStoreResult<Option<WriteResult>> {
        let Some(pointer) = path.pointer.as_deref() else {
            return Err(DocumentStoreError::InvalidPath(format!("{} names no array to post into", path)));
        };
        let Some(Resolved { model, id: Some(id) }) = self.resolve(path, IdHint::None).await? else {
            return Ok(None);
        };

        let current = self.current(&path.collection, &id).await?;
        let length = match path::get(&current, pointer) {
            None | Some(Bson::Null) => 0,
            Some(Bson::Array(items)) => items.len(),
            Some(_) => {
                return Err(DocumentStoreError::InvalidPatch(format!("{} is not an array", pointer)));
            }
        };

        let element = path::push(pointer, &length.to_string());
        let value = coerce_tree(&model, &element, data);
        let update = patch::to_update(&[Patch::add(path::push(pointer, "-"), value.clone())])?;
        let patches = vec![Patch::add(element, value)];

        self.check_changing(&path.base(), Some(&current), &patches, user).await?;

        let outcome = self
            .backend
            .update_one(&path.collection, doc! { "_id": id.clone() }, update)
            .await?;
        if outcome.matched == 0 {
            return Err(not_found(&path.collection, &id));
        }

        self.committed(&path.collection, &id, path.base(), patches, user).await
    }

    /// Applies an ordered patch list to the document at `path`.
    ///
    /// Patch paths are relative to the path's pointer. The last patch addressed
    /// at `/` replaces everything issued before it and is expanded into leaf
    /// patches; string values are coerced by the collection's field types.
    ///
    /// # Errors
    ///
    /// - [`DocumentStoreError::InvalidPath`] when `path` has no id
    /// - [`DocumentStoreError::InvalidPatch`] for an empty or malformed patch list
    /// - [`DocumentStoreError::DocumentNotFound`] when the document does not exist
    /// - [`DocumentStoreError::ChangeRejected`] when a "changing" trigger objects
    pub async fn patch(&self, path: &str, patches: Vec<Patch>, user: Option<&str>) -> DocumentStoreResult<Option<WriteResult>> {
        let path = DocPath::parse(path)?;
        self.apply(&path, patches, user).await
    }

    /// Replaces the document, or the value at the path's pointer.
    pub async fn put(&self, path: &str, value: Bson, user: Option<&str>) -> DocumentStoreResult<Option<WriteResult>> {
        let path = DocPath::parse(path)?;
        self.apply(&path, vec![Patch::replace("/", value)], user).await
    }

    async fn apply(&self, path: &DocPath, patches: Vec<Patch>, user: Option<&str>) -> DocumentStoreResult<Option<WriteResult>> {
        if path.id.is_none() {
            return Err(DocumentStoreError::InvalidPath(format!("{} does not address a document", path)));
        }
        let patches = patch::normalize(path.pointer_or_root(), patches)?;
        if patches.is_empty() {
            return Err(DocumentStoreError::InvalidPatch("no patches to apply".into()));
        }
        patch::to_update(&patches)?;

        let Some(Resolved { model, id: Some(id) }) = self.resolve(path, IdHint::None).await? else {
            return Ok(None);
        };

        let patches = patches
            .into_iter()
            .map(|mut patch| {
                if let Some(value) = patch.value.take() {
                    patch.value = Some(coerce_tree(&model, &patch.path, value));
                }
                patch
            })
            .collect::<Vec<_>>();
        let update = patch::to_update(&patches)?;

        let current = self.current(&path.collection, &id).await?;
        self.check_changing(&path.base(), Some(&current), &patches, user).await?;

        let outcome = self
            .backend
            .update_one(&path.collection, doc! { "_id": id.clone() }, update)
            .await?;
        if outcome.matched == 0 {
            return Err(not_found(&path.collection, &id));
        }
        if outcome.modified == 0 {
            debug!(path = %path, "patch left the document unchanged");
            return Ok(Some(WriteResult { path: path.base(), id, patches, applied: false }));
        }

        self.committed(&path.collection, &id, path.base(), patches, user).await
    }

    /// Removes the field at the path's pointer, or the whole document.
    ///
    /// # Errors
    ///
    /// - [`DocumentStoreError::InvalidPath`] when `path` has no id
    /// - [`DocumentStoreError::DocumentNotFound`] when the document does not exist
    /// - [`DocumentStoreError::ChangeRejected`] when a "changing" trigger objects
    pub async fn delete(&self, path: &str, user: Option<&str>) -> DocumentStoreResult<Option<WriteResult>> {
        let path = DocPath::parse(path)?;
        if path.id.is_none() {
            return Err(DocumentStoreError::InvalidPath(format!("{} does not address a document", path)));
        }
        let Some(Resolved { id: Some(id), .. }) = self.resolve(&path, IdHint::None).await? else {
            return Ok(None);
        };

        let current = self.current(&path.collection, &id).await?;
        let filter = doc! { "_id": id.clone() };

        match path.pointer.as_deref() {
            Some(pointer) => {
                let patches = vec![Patch::remove(pointer)];
                self.check_changing(&path.base(), Some(&current), &patches, user).await?;

                let outcome = self
                    .backend
                    .update_one(&path.collection, filter, patch::to_update(&patches)?)
                    .await?;
                if outcome.modified == 0 {
                    return Ok(Some(WriteResult { path: path.base(), id, patches, applied: false }));
                }

                self.committed(&path.collection, &id, path.base(), patches, user).await
            }
            None => {
                let patches = vec![Patch::remove("/")];
                self.check_changing(&path.base(), Some(&current), &patches, user).await?;

                if self.backend.delete_one(&path.collection, filter).await? == 0 {
                    return Err(not_found(&path.collection, &id));
                }

                self.committed(&path.collection, &id, path.base(), patches, user).await
            }
        }
    }

    /// Runs the aggregation pipeline compiled from `pairs`.
    ///
    /// A path with an id restricts the pipeline to that document. Unless
    /// `allow_unbounded` is set, a query without `per_page` is bounded by
    /// [`StoreConfig::default_per_page`].
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::InvalidLookupParams`] or
    /// [`DocumentStoreError::InvalidQuery`] for malformed directives, before any
    /// backend call.
    pub async fn agg(&self, path: &str, allow_unbounded: bool, pairs: &[QueryPair]) -> DocumentStoreResult<Vec<Document>> {
        let path = DocPath::parse(path)?;
        compiler::validate(pairs)?;

        let Some(Resolved { model, id }) = self.resolve(&path, IdHint::None).await? else {
            return Ok(Vec::new());
        };

        let mut spec = self.compile(&model, pairs)?;
        spec.resolve_auto_lookups(&model.lookups);
        if let Some(id) = id {
            spec.filter.insert(0, Filter::eq("_id", id));
        }

        let default_per_page = (!allow_unbounded).then(|| self.default_per_page());
        let pipeline = spec.pipeline(default_per_page);
        debug!(collection = %path.collection, stages = pipeline.len(), "running aggregation");

        self.backend
            .aggregate(&path.collection, pipeline)
            .await
    }

    pub(crate) async fn resolve_model(&self, collection: &str) -> DocumentStoreResult<Option<Arc<DynamicModel>>> {
        match self.models.model(&self.backend, collection, IdHint::None).await {
            Ok(model) => Ok(Some(model)),
            Err(err @ DocumentStoreError::IdTypeMismatch { .. }) => {
                warn!(collection, error = %err, "no usable model for collection");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    async fn resolve(&self, path: &DocPath, hint: IdHint) -> DocumentStoreResult<Option<Resolved>> {
        let model = match self.models.model(&self.backend, &path.collection, hint).await {
            Ok(model) => model,
            Err(err @ DocumentStoreError::IdTypeMismatch { .. }) => {
                warn!(path = %path, error = %err, "no usable model for collection");
                return Ok(None);
            }
            Err(err) => return Err(err),
        };

        let id = match &path.id {
            None => None,
            Some(raw) => match model.coerce_id(raw) {
                Some(id) => Some(id),
                None => {
                    warn!(path = %path, id_type = %model.id_type, "id does not fit collection");
                    return Ok(None);
                }
            },
        };

        Ok(Some(Resolved { model, id }))
    }

    fn compile(&self, model: &DynamicModel, pairs: &[QueryPair]) -> DocumentStoreResult<QuerySpec> {
        let types: &dyn FieldTypeLookup = model;
        let mut spec = compiler::parse(pairs, Some(types))?;
        spec.per_page = spec.per_page.map(|per_page| per_page.min(self.config.per_page_cap()));
        Ok(spec)
    }

    fn default_per_page(&self) -> u64 {
        self.config
            .default_per_page
            .clamp(1, self.config.per_page_cap())
    }

    async fn current(&self, collection: &str, id: &Bson) -> DocumentStoreResult<Bson> {
        self.backend
            .find_one(collection, doc! { "_id": id.clone() }, None)
            .await?
            .map(Bson::Document)
            .ok_or_else(|| not_found(collection, id))
    }

    async fn check_changing(
        &self,
        path: &str,
        document: Option<&Bson>,
        patches: &[Patch],
        user: Option<&str>,
    ) -> DocumentStoreResult<()> {
        let errors = self
            .triggers
            .data_changing(path, document, patches, user)
            .await;

        if errors.is_empty() {
            return Ok(());
        }

        warn!(path, ?errors, "change rejected by triggers");
        Err(DocumentStoreError::ChangeRejected(errors))
    }

    /// Records, publishes and hands an applied write to the "change" triggers.
    async fn committed(
        &self,
        collection: &str,
        id: &Bson,
        path: String,
        patches: Vec<Patch>,
        user: Option<&str>,
    ) -> DocumentStoreResult<Option<WriteResult>> {
        debug!(path = %path, patches = patches.len(), "applied write");

        let document = self
            .backend
            .find_one(collection, doc! { "_id": id.clone() }, None)
            .await?
            .map(Bson::Document);

        // The write is applied; a lost record must not fail the call.
        if self.config.persist_data_changes {
            if let Err(err) = self.record(&path, &patches, user).await {
                error!(path = %path, error = %err, "failed to record data change");
            }
        }

        let topic = notifier::topic(&self.config.topic_prefix, collection, &id_segment(id));
        let event = DataChangedEvent {
            path: path.clone(),
            data: document.clone(),
            patches: patches.clone(),
            user: user.map(str::to_string),
        };
        if let Err(err) = self.notifier.publish(&topic, event).await {
            warn!(topic = %topic, error = %err, "failed to publish change event");
        }

        let triggers = self.triggers.clone();
        let (trigger_path, trigger_patches, trigger_user) = (path.clone(), patches.clone(), user.map(str::to_string));
        let handlers = tokio::spawn(async move {
            triggers
                .data_change(&trigger_path, document.as_ref(), &trigger_patches, trigger_user.as_deref())
                .await
        });
        let watched = path.clone();
        tokio::spawn(async move {
            if let Err(err) = handlers.await {
                error!(path = %watched, error = %err, "change handlers failed");
            }
        });

        Ok(Some(WriteResult { path, id: id.clone(), patches, applied: true }))
    }

    async fn record(&self, path: &str, patches: &[Patch], user: Option<&str>) -> DocumentStoreResult<()> {
        let collection = &self.config.data_change_collection;

        let last_change = self
            .backend
            .find(
                collection,
                doc! { "path": path },
                FindOptions {
                    projection: Some(doc! { "date": 1 }),
                    sort: Some(doc! { "date": -1 }),
                    limit: Some(1),
                    ..Default::default()
                },
            )
            .await?
            .into_iter()
            .next()
            .and_then(|previous| previous.get_datetime("date").ok().copied());

        let change = DataChange {
            last_change,
            ..DataChange::new(path, patches.to_vec(), user.map(str::to_string))
        };

        self.backend
            .insert_one(collection, bson::serialize_to_document(&change)?)
            .await
    }

    /// Shuts down the store and releases backend resources.
    pub async fn shutdown(self) -> DocumentStoreResult<()> {
        self.backend.shutdown().await?;

        Ok(())
    }
}

/// Builder for [`DocumentStore`].
pub struct DocumentStoreBuilder<B: StoreBackend> {
    backend: B,
    config: StoreConfig,
    notifier: Arc<dyn ChangeNotifier>,
    schemas: HashMap<String, SchemaDescriptor>,
    triggers: Option<TriggerRegistry>,
}

impl<B: StoreBackend> DocumentStoreBuilder<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            config: StoreConfig::default(),
            notifier: Arc::new(NoopNotifier),
            schemas: HashMap::new(),
            triggers: None,
        }
    }

    pub fn config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    pub fn notifier(mut self, notifier: impl ChangeNotifier + 'static) -> Self {
        self.notifier = Arc::new(notifier);
        self
    }

    /// Declares the schema of a collection.
    pub fn schema(mut self, collection: impl Into<String>, descriptor: SchemaDescriptor) -> Self {
        self.schemas.insert(collection.into(), descriptor);
        self
    }

    /// Replaces the path matcher used to resolve triggers.
    pub fn matcher(mut self, matcher: impl PathMatcher<usize> + 'static) -> Self {
        self.triggers = Some(TriggerRegistry::with_matcher(matcher));
        self
    }

    pub fn build(self) -> DocumentStore<B> {
        DocumentStore {
            backend: self.backend,
            config: self.config,
            models: ModelRegistry::with_descriptors(self.schemas),
            triggers: TriggerEngine::new(self.triggers.unwrap_or_default()),
            notifier: self.notifier,
        }
    }
}

/// Coerces string leaves of `value` by the field types declared under `at`.
fn coerce_tree(model: &DynamicModel, at: &str, value: Bson) -> Bson {
    match value {
        Bson::Document(fields) => Bson::Document(
            fields
                .into_iter()
                .map(|(key, child)| {
                    let child = coerce_tree(model, &path::push(at, &key), child);
                    (key, child)
                })
                .collect(),
        ),
        value => field::coerce(value, model.field_type(at).as_ref()),
    }
}

/// Renders an id as a path segment.
pub(crate) fn id_segment(id: &Bson) -> String {
    match id {
        Bson::String(id) => id.clone(),
        Bson::ObjectId(oid) => oid.to_hex(),
        Bson::Int32(id) => id.to_string(),
        Bson::Int64(id) => id.to_string(),
        other => other.to_string(),
    }
}

fn not_found(collection: &str, id: &Bson) -> DocumentStoreError {
    DocumentStoreError::DocumentNotFound(id_segment(id), collection.to_string())
}
