//! Dynamic, per-collection models.
//!
//! Collections carry no compiled schema. A [`DynamicModel`] is created the first
//! time a collection is accessed, from an optional caller-registered
//! [`SchemaDescriptor`] and from what is already stored. Once a collection's id
//! type is fixed, any later attempt to use it with another id type fails with
//! [`DocumentStoreError::IdTypeMismatch`].

use std::{collections::HashMap, fmt, sync::Arc};

use bson::{Bson, doc, oid::ObjectId};
use mea::rwlock::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    backend::{FindOptions, StoreBackend},
    compiler::LookupSpec,
    error::{DocumentStoreError, DocumentStoreResult},
    field::{self, FieldType, FieldTypeLookup},
};

/// Type of a collection's `_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdType {
    String,
    Number,
    ObjectId,
}

impl IdType {
    /// Infers the id type of a stored `_id` value.
    pub fn of(value: &Bson) -> Option<Self> {
        match value {
            Bson::String(_) => Some(IdType::String),
            Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) => Some(IdType::Number),
            Bson::ObjectId(_) => Some(IdType::ObjectId),
            _ => None,
        }
    }

    /// Converts a raw path segment into a typed id, `None` when it does not fit.
    pub fn coerce(&self, raw: &str) -> Option<Bson> {
        match self {
            IdType::String => Some(Bson::String(raw.to_string())),
            IdType::Number => field::parse_number(raw),
            IdType::ObjectId => ObjectId::parse_str(raw).ok().map(Bson::ObjectId),
        }
    }
}

impl fmt::Display for IdType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IdType::String => "string",
            IdType::Number => "number",
            IdType::ObjectId => "objectid",
        };
        f.write_str(name)
    }
}

/// What a caller's id says about a collection's id type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IdHint {
    #[default]
    None,
    /// The id has this type; a collection fixed to another type is a mismatch.
    Strict(IdType),
    /// Used only while nothing stored or declared fixes the id type.
    Fallback(IdType),
}

/// Caller-supplied description of a collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SchemaDescriptor {
    /// Id type to use when nothing is stored yet.
    pub id_type: Option<IdType>,
    /// Declared field types, keyed by dotted path.
    pub fields: HashMap<String, FieldType>,
    /// Joins resolved by `lookup=auto` and `lookup=<collection>`.
    pub lookups: Vec<LookupSpec>,
}

impl SchemaDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id_type(mut self, id_type: IdType) -> Self {
        self.id_type = Some(id_type);
        self
    }

    pub fn field(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.fields.insert(name.into(), field_type);
        self
    }

    pub fn lookup(mut self, lookup: LookupSpec) -> Self {
        self.lookups.push(lookup);
        self
    }
}

/// Schema of one collection, as resolved at runtime.
#[derive(Debug, Clone, PartialEq)]
pub struct DynamicModel {
    pub collection: String,
    pub id_type: IdType,
    pub fields: HashMap<String, FieldType>,
    pub lookups: Vec<LookupSpec>,
}

impl DynamicModel {
    /// Converts a raw path id into the collection's id type.
    pub fn coerce_id(&self, raw: &str) -> Option<Bson> {
        self.id_type.coerce(raw)
    }

    /// Generates an id for a new document.
    ///
    /// Numeric collections continue from the highest stored id.
    pub async fn generate_id<B: StoreBackend>(&self, backend: &B) -> DocumentStoreResult<Bson> {
        match self.id_type {
            IdType::ObjectId => Ok(Bson::ObjectId(ObjectId::new())),
            IdType::String => Ok(Bson::String(uuid::Uuid::new_v4().to_string())),
            IdType::Number => {
                let highest = backend
                    .find(
                        &self.collection,
                        doc! {},
                        FindOptions {
                            projection: Some(doc! { "_id": 1 }),
                            sort: Some(doc! { "_id": -1 }),
                            limit: Some(1),
                            ..Default::default()
                        },
                    )
                    .await?
                    .into_iter()
                    .next()
                    .and_then(|stored| match stored.get("_id") {
                        Some(Bson::Int32(id)) => Some(i64::from(*id)),
                        Some(Bson::Int64(id)) => Some(*id),
                        Some(Bson::Double(id)) => Some(id.floor() as i64),
                        _ => None,
                    })
                    .unwrap_or(0);

                Ok(Bson::Int64(highest + 1))
            }
        }
    }
}

impl FieldTypeLookup for DynamicModel {
    fn field_type(&self, field: &str) -> Option<FieldType> {
        if field == "_id" {
            return Some(match self.id_type {
                IdType::String => FieldType::String,
                IdType::Number => FieldType::Number,
                IdType::ObjectId => FieldType::ObjectId,
            });
        }
        field::resolve(&self.fields, field)
    }
}

/// Resolves collection names to [`DynamicModel`]s, creating them lazily.
#[derive(Debug, Default)]
pub struct ModelRegistry {
    descriptors: RwLock<HashMap<String, SchemaDescriptor>>,
    models: RwLock<HashMap<String, Arc<DynamicModel>>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with descriptors known up front.
    pub fn with_descriptors(descriptors: HashMap<String, SchemaDescriptor>) -> Self {
        Self {
            descriptors: RwLock::new(descriptors),
            models: RwLock::default(),
        }
    }

    /// Registers the descriptor of a collection.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::IdTypeMismatch`] when the collection's model
    /// was already created with another id type.
    pub async fn define(&self, collection: &str, descriptor: SchemaDescriptor) -> DocumentStoreResult<()> {
        let mut models = self.models.write().await;

        if let Some(existing) = models.get(collection) {
            if let Some(declared) = descriptor.id_type {
                check_id_type(collection, existing.id_type, declared)?;
            }

            let refreshed = DynamicModel {
                collection: collection.to_string(),
                id_type: existing.id_type,
                fields: descriptor.fields.clone(),
                lookups: descriptor.lookups.clone(),
            };
            models.insert(collection.to_string(), Arc::new(refreshed));
        }

        self.descriptors
            .write()
            .await
            .insert(collection.to_string(), descriptor);

        Ok(())
    }

    /// Returns the model of `collection`, creating it on first access.
    ///
    /// The id type is taken from a stored document when there is one,
    /// otherwise from the registered descriptor. Only a model fixed by one of
    /// those is cached. While a collection has neither, each call builds a
    /// transient model from `hint`, or with [`IdType::ObjectId`] when there is
    /// no hint, so the first stored document decides.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::IdTypeMismatch`] when the declared id type
    /// or a [`IdHint::Strict`] hint conflicts with the collection's.
    pub async fn model<B: StoreBackend>(
        &self,
        backend: &B,
        collection: &str,
        hint: IdHint,
    ) -> DocumentStoreResult<Arc<DynamicModel>> {
        if let Some(model) = self.models.read().await.get(collection) {
            if let IdHint::Strict(hint) = hint {
                check_id_type(collection, model.id_type, hint)?;
            }
            return Ok(model.clone());
        }

        let descriptor = self
            .descriptors
            .read()
            .await
            .get(collection)
            .cloned()
            .unwrap_or_default();

        let stored = backend
            .find_one(collection, doc! {}, Some(doc! { "_id": 1 }))
            .await?
            .and_then(|stored| stored.get("_id").and_then(IdType::of));

        let fixed = match (stored, descriptor.id_type) {
            (Some(stored), Some(declared)) => {
                check_id_type(collection, stored, declared)?;
                Some(stored)
            }
            (stored, declared) => stored.or(declared),
        };

        let Some(id_type) = fixed else {
            let id_type = match hint {
                IdHint::Strict(id_type) | IdHint::Fallback(id_type) => id_type,
                IdHint::None => IdType::ObjectId,
            };
            return Ok(Arc::new(DynamicModel {
                collection: collection.to_string(),
                id_type,
                fields: descriptor.fields,
                lookups: descriptor.lookups,
            }));
        };

        if let IdHint::Strict(hint) = hint {
            check_id_type(collection, id_type, hint)?;
        }

        let mut models = self.models.write().await;
        let model = models
            .entry(collection.to_string())
            .or_insert_with(|| {
                debug!(collection, %id_type, "created dynamic model");
                Arc::new(DynamicModel {
                    collection: collection.to_string(),
                    id_type,
                    fields: descriptor.fields,
                    lookups: descriptor.lookups,
                })
            })
            .clone();

        Ok(model)
    }
}

fn check_id_type(collection: &str, expected: IdType, found: IdType) -> DocumentStoreResult<()> {
    if expected == found {
        return Ok(());
    }

    Err(DocumentStoreError::IdTypeMismatch {
        collection: collection.to_string(),
        expected: expected.to_string(),
        found: found.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(IdType::Number, "42", Some(Bson::Int64(42)))]
    #[case(IdType::Number, "abc", None)]
    #[case(IdType::String, "abc", Some(Bson::String("abc".into())))]
    #[case(IdType::ObjectId, "nope", None)]
    fn test_coerce_id(#[case] id_type: IdType, #[case] raw: &str, #[case] expected: Option<Bson>) {
        assert_eq!(id_type.coerce(raw), expected);
    }

    #[rstest]
    fn test_object_id_round_trips() {
        let oid = ObjectId::new();

        assert_eq!(IdType::ObjectId.coerce(&oid.to_hex()), Some(Bson::ObjectId(oid)));
        assert_eq!(IdType::of(&Bson::ObjectId(oid)), Some(IdType::ObjectId));
    }

    #[rstest]
    fn test_model_resolves_field_types() {
        let model = DynamicModel {
            collection: "items".into(),
            id_type: IdType::Number,
            fields: HashMap::from([("tags".to_string(), FieldType::Array(Box::new(FieldType::String)))]),
            lookups: Vec::new(),
        };

        assert_eq!(model.field_type("_id"), Some(FieldType::Number));
        assert_eq!(model.field_type("tags.2"), Some(FieldType::String));
        assert_eq!(model.field_type("missing"), None);
    }

    #[rstest]
    fn test_descriptor_deserializes_from_json() {
        let descriptor: SchemaDescriptor = serde_json::from_str(
            r#"{
                "idType": "number",
                "fields": { "age": "number", "born": "date" },
                "lookups": [{ "from": "orders", "foreignField": "customer", "localField": "_id", "as": "orders" }]
            }"#,
        )
        .unwrap();

        assert_eq!(descriptor.id_type, Some(IdType::Number));
        assert_eq!(descriptor.fields.get("born"), Some(&FieldType::Date));
        assert_eq!(descriptor.lookups[0].as_field, "orders");
        assert!(!descriptor.lookups[0].unwind);
    }
}
