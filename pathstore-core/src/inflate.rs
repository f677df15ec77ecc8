//! Batch completion of partially populated documents.

use std::collections::HashMap;

use bson::{Bson, Document, doc};
use tracing::debug;

use crate::{
    backend::{FindOptions, StoreBackend},
    error::DocumentStoreResult,
    store::{DocumentStore, id_segment},
};

/// Items split by whether they could be completed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Inflated {
    pub inflated: Vec<Document>,
    pub not_inflated: Vec<Document>,
}

impl<B: StoreBackend> DocumentStore<B> {
    /// Completes `items` with the fields they lack by re-reading them from
    /// `collection`.
    ///
    /// Items already carrying every `required` field pass through untouched.
    /// The `inflate_by` fields are tried in order: each key is fetched with one
    /// `$in` query over the items that carry it and are not yet resolved, so an
    /// item whose first key finds nothing falls back to the next one. Fetched
    /// `required` and `optional` fields fill the gaps; fields present on the
    /// item are kept. Items still missing a required field afterwards end up
    /// in `not_inflated`. Both lists keep the input order.
    pub async fn inflate(
        &self,
        collection: &str,
        items: Vec<Document>,
        required: &[&str],
        optional: &[&str],
        inflate_by: &[&str],
    ) -> DocumentStoreResult<Inflated> {
        let complete = |item: &Document| required.iter().all(|field| item.contains_key(*field));

        let mut projection = doc! {};
        for field in required.iter().chain(optional).chain(inflate_by) {
            projection.insert(*field, 1);
        }

        let mut sources: Vec<Option<Document>> = vec![None; items.len()];
        for &key in inflate_by {
            let pending = items
                .iter()
                .enumerate()
                .filter(|(index, item)| sources[*index].is_none() && !complete(item))
                .filter_map(|(index, item)| item.get(key).map(|value| (index, value.clone())))
                .collect::<Vec<_>>();
            if pending.is_empty() {
                continue;
            }

            let values = pending.iter().map(|(_, value)| value.clone()).collect::<Vec<Bson>>();
            let found = self
                .backend()
                .find(
                    collection,
                    doc! { key: { "$in": values } },
                    FindOptions { projection: Some(projection.clone()), ..Default::default() },
                )
                .await?;
            debug!(collection, key, found = found.len(), "fetched documents to inflate");

            let by_value = found
                .into_iter()
                .filter_map(|document| Some((id_segment(document.get(key)?), document)))
                .collect::<HashMap<_, _>>();
            for (index, value) in pending {
                if let Some(document) = by_value.get(&id_segment(&value)) {
                    sources[index] = Some(document.clone());
                }
            }
        }

        let mut result = Inflated::default();
        for (mut item, source) in items.into_iter().zip(sources) {
            if let Some(source) = source.filter(|_| !complete(&item)) {
                for field in required.iter().chain(optional) {
                    if item.contains_key(*field) {
                        continue;
                    }
                    if let Some(value) = source.get(*field) {
                        item.insert(*field, value.clone());
                    }
                }
            }

            match complete(&item) {
                true => result.inflated.push(item),
                false => result.not_inflated.push(item),
            }
        }

        Ok(result)
    }
}
