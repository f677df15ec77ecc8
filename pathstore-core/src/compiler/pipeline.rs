//! Aggregation pipeline assembly.
//!
//! Stage order: computed fields (`fields1`, `fields2`, `fields3`), joins,
//! post-join matches, primary filter, sort, projection, then pagination and
//! grouping. Pagination runs before `$group` when groups carry their member
//! documents, since grouping would otherwise collapse the rows being paged,
//! and after it otherwise.

use bson::{Bson, Document, doc};
use tracing::warn;

use crate::query::FilterRenderer;

use super::{
    GROUP_MEMBERS_FIELD, GroupSpec, LookupMatch, LookupRequest, LookupSpec, QuerySpec, computed_document, exists_stage,
    group_id,
};

impl QuerySpec {
    /// Builds the aggregation pipeline. `default_per_page` bounds the result when
    /// the client sent no `per_page`; `None` allows an unbounded result.
    pub fn pipeline(&self, default_per_page: Option<u64>) -> Vec<Document> {
        let mut stages = Vec::new();

        for computed in self.fields.iter().filter(|computed| !computed.is_empty()) {
            stages.push(doc! { "$addFields": computed_document(computed) });
        }

        for request in &self.lookups {
            match request {
                LookupRequest::Explicit(spec) => stages.extend(lookup_stages(spec)),
                LookupRequest::Auto(from) => {
                    warn!(lookup = ?from, "skipping unresolved auto lookup");
                }
            }
        }

        for matched in &self.lookups_match {
            stages.push(lookup_match_stage(matched));
        }
        for matched in &self.lookups_match {
            stages.push(exists_stage(&matched.lookup.as_field));
            if matched.lookup.unwind {
                stages.push(unwind_stage(&matched.lookup.as_field));
            }
        }

        if !self.filter.is_empty() {
            stages.push(doc! { "$match": self.filter_document() });
        }
        if let Some(sort) = self.sort_document() {
            stages.push(doc! { "$sort": sort });
        }
        if let Some(select) = &self.select {
            stages.push(doc! { "$project": select.clone() });
        }

        let (skip, limit) = self.skip_limit(default_per_page);
        let mut paging = Vec::new();
        if let Some(skip) = skip {
            paging.push(doc! { "$skip": skip as i64 });
        }
        if let Some(limit) = limit {
            paging.push(doc! { "$limit": limit as i64 });
        }

        match &self.group {
            Some(group) if group.members => {
                stages.extend(paging);
                stages.push(group_stage(group));
            }
            Some(group) => {
                stages.push(group_stage(group));
                stages.extend(paging);
            }
            None => stages.extend(paging),
        }

        stages
    }
}

fn lookup_stages(spec: &LookupSpec) -> Vec<Document> {
    let mut stages = vec![doc! {
        "$lookup": {
            "from": spec.from.clone(),
            "localField": spec.local_field.clone(),
            "foreignField": spec.foreign_field.clone(),
            "as": spec.as_field.clone(),
        }
    }];

    if spec.unwind {
        stages.push(unwind_stage(&spec.as_field));
    }

    stages
}

/// Join whose candidates must have their foreign field contained in the local
/// array before the declared match expressions apply.
fn lookup_match_stage(matched: &LookupMatch) -> Document {
    let spec = &matched.lookup;
    let mut pipeline = vec![doc! {
        "$match": {
            "$expr": {
                "$in": [
                    format!("${}", spec.foreign_field),
                    { "$ifNull": ["$$local", []] },
                ]
            }
        }
    }];

    if !matched.filter.is_empty() {
        pipeline.push(doc! { "$match": FilterRenderer.render_all(&matched.filter) });
    }

    doc! {
        "$lookup": {
            "from": spec.from.clone(),
            "let": { "local": format!("${}", spec.local_field) },
            "pipeline": pipeline,
            "as": spec.as_field.clone(),
        }
    }
}

fn unwind_stage(field: &str) -> Document {
    doc! { "$unwind": { "path": format!("${}", field), "preserveNullAndEmptyArrays": true } }
}

/// The member array is inserted last so it is the final key of the stage.
fn group_stage(group: &GroupSpec) -> Document {
    let mut stage = doc! { "_id": group_id(&group.fields) };
    for field in &group.computed {
        stage.insert(field.name.clone(), field.expr.clone());
    }

    if group.members {
        stage.insert(GROUP_MEMBERS_FIELD, doc! { "$push": "$$ROOT" });
    }

    doc! { "$group": Bson::Document(stage) }
}
