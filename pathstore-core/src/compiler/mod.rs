//! Query string DSL compiler.
//!
//! [`parse`] turns flat `key=value` pairs into a [`QuerySpec`]. Reserved keys
//! carry directives; every other pair becomes one AND-ed filter clause:
//!
//! | key | meaning |
//! |---|---|
//! | `page`, `per_page` | 1-based pagination, `per_page` capped at [`MAX_PER_PAGE`] |
//! | `sort_by` | `field,asc\|desc` or `-field` |
//! | `select` | `a,b,!c` projection |
//! | `fields1`..`fields3` | computed fields, applied in numeric order |
//! | `lookup` | `from:foreignField:localField:as[:unwind]`, a collection name or `auto` |
//! | `lookup_match` | `from:foreignField:localField:as[:unwind];field=value;...` |
//! | `group_by` | `field[,{project}name={op}arg,...]` |
//!
//! Filter values may carry an operator prefix (`{gte}5`, `{in}a,b`), use `*`
//! wildcards, or combine alternatives with `|`.

mod clause;
mod directives;
mod pipeline;

use bson::{Bson, Document, doc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    error::DocumentStoreResult,
    field::FieldTypeLookup,
    query::{Expr, FilterRenderer, Sort},
};

pub use clause::wildcard_pattern;

/// Hard cap applied to `per_page` whatever the client sends.
pub const MAX_PER_PAGE: u64 = 500;

/// Name of the per-group array holding full member documents.
pub const GROUP_MEMBERS_FIELD: &str = "items";

/// One decoded query-string pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryPair {
    pub key: String,
    pub value: String,
}

impl QueryPair {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self { key: key.into(), value: value.into() }
    }
}

impl<K: Into<String>, V: Into<String>> From<(K, V)> for QueryPair {
    fn from((key, value): (K, V)) -> Self {
        QueryPair::new(key, value)
    }
}

/// A computed field: output name and aggregation expression.
#[derive(Debug, Clone, PartialEq)]
pub struct ComputedField {
    pub name: String,
    pub expr: Bson,
}

/// Explicit join descriptor. Also used to annotate dynamic models for
/// auto-lookup discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupSpec {
    pub from: String,
    pub foreign_field: String,
    pub local_field: String,
    #[serde(rename = "as")]
    pub as_field: String,
    #[serde(default)]
    pub unwind: bool,
}

/// A `lookup` entry before schema resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupRequest {
    Explicit(LookupSpec),
    /// Resolved from model annotations; `None` selects every annotated join.
    Auto(Option<String>),
}

/// A join whose joined documents are filtered before being attached.
#[derive(Debug, Clone, PartialEq)]
pub struct LookupMatch {
    pub lookup: LookupSpec,
    pub filter: Vec<Expr>,
}

/// Grouping descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupSpec {
    pub fields: Vec<String>,
    pub computed: Vec<ComputedField>,
    /// Whether each group carries its full member documents.
    pub members: bool,
}

/// Compiled query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuerySpec {
    /// AND-list of clauses; a clause may itself be an OR group.
    pub filter: Vec<Expr>,
    pub sort: Option<Sort>,
    pub page: Option<u64>,
    pub per_page: Option<u64>,
    pub select: Option<Document>,
    /// `fields1`, `fields2`, `fields3`.
    pub fields: [Vec<ComputedField>; 3],
    pub lookups: Vec<LookupRequest>,
    pub lookups_match: Vec<LookupMatch>,
    pub group: Option<GroupSpec>,
}

/// Checks `pairs` for the errors [`parse`] reports, without any field types.
///
/// Directive errors do not depend on the collection's model, so callers can
/// reject a malformed query before resolving the model from the backend.
pub fn validate(pairs: &[QueryPair]) -> DocumentStoreResult<()> {
    parse(pairs, None).map(|_| ())
}

/// Compiles query pairs into a [`QuerySpec`].
///
/// # Errors
///
/// Returns [`DocumentStoreError::InvalidLookupParams`](crate::error::DocumentStoreError::InvalidLookupParams)
/// for malformed join descriptors and
/// [`DocumentStoreError::InvalidQuery`](crate::error::DocumentStoreError::InvalidQuery)
/// for malformed computed fields.
pub fn parse(pairs: &[QueryPair], types: Option<&dyn FieldTypeLookup>) -> DocumentStoreResult<QuerySpec> {
    let mut spec = QuerySpec::default();

    for QueryPair { key, value } in pairs {
        match key.as_str() {
            "page" => spec.page = directives::parse_page(value),
            "per_page" => spec.per_page = directives::parse_per_page(value),
            "sort_by" => spec.sort = directives::parse_sort(value),
            "select" => spec.select = directives::parse_select(value),
            "fields1" => spec.fields[0].extend(directives::parse_computed(value)?),
            "fields2" => spec.fields[1].extend(directives::parse_computed(value)?),
            "fields3" => spec.fields[2].extend(directives::parse_computed(value)?),
            "lookup" => spec.lookups.extend(directives::parse_lookups(value)?),
            "lookup_match" => spec.lookups_match.push(directives::parse_lookup_match(value)?),
            "group_by" => spec.group = Some(directives::parse_group(value)?),
            _ => {
                if let Some(expr) = clause::parse_pair(key, value, types) {
                    spec.filter.push(expr);
                }
            }
        }
    }

    Ok(spec)
}

impl QuerySpec {
    /// The primary filter as a MongoDB document; empty when there are no clauses.
    pub fn filter_document(&self) -> Document {
        FilterRenderer.render_all(&self.filter)
    }

    /// Resolves pagination into `(skip, limit)`. `default_per_page` applies when
    /// the client sent no `per_page`; `None` leaves the query unbounded.
    pub fn skip_limit(&self, default_per_page: Option<u64>) -> (Option<u64>, Option<u64>) {
        match self.per_page.or(default_per_page) {
            Some(per_page) => {
                let per_page = per_page.min(MAX_PER_PAGE);
                // Backends take a signed skip.
                let skip = (self.page.unwrap_or(1).max(1) - 1)
                    .saturating_mul(per_page)
                    .min(i64::MAX as u64);
                ((skip > 0).then_some(skip), Some(per_page))
            }
            None => (None, None),
        }
    }

    /// Replaces [`LookupRequest::Auto`] entries with the joins annotated on the
    /// collection's model.
    pub fn resolve_auto_lookups(&mut self, annotated: &[LookupSpec]) {
        self.lookups = std::mem::take(&mut self.lookups)
            .into_iter()
            .flat_map(|request| match request {
                LookupRequest::Explicit(spec) => vec![LookupRequest::Explicit(spec)],
                LookupRequest::Auto(from) => {
                    let resolved = annotated
                        .iter()
                        .filter(|spec| from.as_ref().is_none_or(|from| &spec.from == from))
                        .cloned()
                        .map(LookupRequest::Explicit)
                        .collect::<Vec<_>>();

                    if resolved.is_empty() {
                        warn!(lookup = ?from, "no annotated join matches auto lookup");
                    }
                    resolved
                }
            })
            .collect();
    }

    /// The `$sort` document, if any.
    pub fn sort_document(&self) -> Option<Document> {
        self.sort.as_ref().map(Sort::to_document)
    }
}

pub(crate) fn computed_document(fields: &[ComputedField]) -> Document {
    fields
        .iter()
        .map(|field| (field.name.clone(), field.expr.clone()))
        .collect()
}

pub(crate) fn group_id(fields: &[String]) -> Bson {
    match fields {
        [single] => Bson::String(format!("${}", single)),
        fields => Bson::Document(
            fields
                .iter()
                .map(|field| (field.replace('.', "_"), Bson::String(format!("${}", field))))
                .collect(),
        ),
    }
}

pub(crate) fn exists_stage(field: &str) -> Document {
    doc! { "$match": { format!("{}.0", field): { "$exists": true } } }
}
