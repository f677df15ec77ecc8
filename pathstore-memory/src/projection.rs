//! Field projection shared by `find` and the `$project` stage.

use bson::{Bson, Document};

use pathstore_core::error::DocumentStoreResult;

use crate::{
    expression::{self, Variables},
    value::{remove_path, set_path},
};

enum Rule<'p> {
    Include,
    Exclude,
    Compute(&'p Bson),
}

fn rule(value: &Bson) -> Rule<'_> {
    match value {
        Bson::Boolean(true) => Rule::Include,
        Bson::Boolean(false) => Rule::Exclude,
        Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) => match expression::truthy(value) {
            true => Rule::Include,
            false => Rule::Exclude,
        },
        expr => Rule::Compute(expr),
    }
}

/// Projects `document`. With any field to keep or compute, only those (and
/// `_id`, unless excluded) survive and exclusions carve paths out of them;
/// otherwise the listed fields are dropped.
pub(crate) fn project(document: &Document, projection: &Document, variables: &Variables) -> DocumentStoreResult<Document> {
    let mut included = Vec::new();
    let mut excluded = Vec::new();
    let mut computed = Vec::new();

    for (field, value) in projection {
        match rule(value) {
            Rule::Include => included.push(field.as_str()),
            Rule::Exclude => excluded.push(field.as_str()),
            Rule::Compute(expr) => computed.push((field.as_str(), expr)),
        }
    }

    if included.is_empty() && computed.is_empty() {
        let mut projected = document.clone();
        for field in excluded {
            remove_path(&mut projected, field);
        }
        return Ok(projected);
    }

    if !excluded.contains(&"_id") && !included.contains(&"_id") {
        included.push("_id");
    }

    let mut projected = include(document, &included);
    for field in excluded.iter().filter(|field| **field != "_id") {
        remove_path(&mut projected, field);
    }
    for (field, expr) in computed {
        set_path(&mut projected, field, expression::evaluate(expr, document, variables)?)?;
    }

    Ok(projected)
}

/// Keeps the listed dotted paths, in document order.
fn include(document: &Document, paths: &[&str]) -> Document {
    let mut kept = Document::new();

    for (key, value) in document {
        if paths.contains(&key.as_str()) {
            kept.insert(key.clone(), value.clone());
            continue;
        }

        let nested = paths
            .iter()
            .filter_map(|path| path.strip_prefix(key.as_str())?.strip_prefix('.'))
            .collect::<Vec<_>>();
        if nested.is_empty() {
            continue;
        }

        match value {
            Bson::Document(inner) => {
                kept.insert(key.clone(), include(inner, &nested));
            }
            Bson::Array(items) => {
                let items = items
                    .iter()
                    .filter_map(|item| match item {
                        Bson::Document(inner) => Some(Bson::Document(include(inner, &nested))),
                        _ => None,
                    })
                    .collect::<Vec<_>>();
                kept.insert(key.clone(), items);
            }
            _ => {}
        }
    }

    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use rstest::rstest;

    fn account() -> Document {
        doc! {
            "_id": 1,
            "name": "Ada",
            "email": "ada@example.com",
            "address": { "city": "London", "zip": "N1" },
            "orders": [{ "sku": "a", "qty": 1 }, { "sku": "b", "qty": 2 }],
        }
    }

    #[rstest]
    #[case(doc! { "name": 1 }, doc! { "_id": 1, "name": "Ada" })]
    #[case(doc! { "name": 1, "_id": 0 }, doc! { "name": "Ada" })]
    #[case(doc! { "email": 0, "orders": 0, "address.zip": 0 }, doc! { "_id": 1, "name": "Ada", "address": { "city": "London" } })]
    #[case(doc! { "address.city": 1 }, doc! { "_id": 1, "address": { "city": "London" } })]
    #[case(doc! { "orders.sku": true }, doc! { "_id": 1, "orders": [{ "sku": "a" }, { "sku": "b" }] })]
    #[case(doc! { "name": 1, "label": { "$toUpper": "$name" } }, doc! { "_id": 1, "name": "Ada", "label": "ADA" })]
    fn test_project(#[case] projection: Document, #[case] expected: Document) {
        assert_eq!(project(&account(), &projection, &Variables::new()).unwrap(), expected);
    }

    #[rstest]
    fn test_merges_mixed_projection() {
        let projected = project(&account(), &doc! { "address": 1, "address.zip": 0, "email": 0 }, &Variables::new());

        assert_eq!(projected.unwrap(), doc! { "_id": 1, "address": { "city": "London" } });
    }
}
