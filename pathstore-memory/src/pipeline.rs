//! Aggregation pipeline execution over in-memory collections.

use std::{cmp::Ordering, collections::HashMap};

use bson::{Bson, Document};

use pathstore_core::error::{DocumentStoreError, DocumentStoreResult};

use crate::{
    evaluator::DocumentEvaluator,
    expression::{self, Variables},
    projection,
    value::{as_f64, candidates, compare, equals, get_path, remove_path, set_path},
};

pub(crate) type Collections = HashMap<String, Vec<Document>>;

/// Runs pipelines against a snapshot of every collection, so `$lookup` can
/// join across them.
pub(crate) struct PipelineExecutor<'a> {
    collections: &'a Collections,
}

impl<'a> PipelineExecutor<'a> {
    pub fn new(collections: &'a Collections) -> Self {
        Self { collections }
    }

    pub fn run(
        &self,
        mut documents: Vec<Document>,
        pipeline: &[Document],
        variables: &Variables,
    ) -> DocumentStoreResult<Vec<Document>> {
        for stage in pipeline {
            let Some((name, argument)) = stage.iter().next().filter(|_| stage.len() == 1) else {
                return Err(DocumentStoreError::Backend(
                    "a pipeline stage specification object must contain exactly one field".into(),
                ));
            };

            documents = match name.as_str() {
                "$match" => DocumentEvaluator::filter_documents(&documents, as_document(name, argument)?, variables)?,
                "$sort" => {
                    sort(&mut documents, as_document(name, argument)?);
                    documents
                }
                "$skip" => documents.into_iter().skip(as_count(name, argument)?).collect(),
                "$limit" => documents.into_iter().take(as_count(name, argument)?).collect(),
                "$project" => {
                    let spec = as_document(name, argument)?;
                    documents
                        .iter()
                        .map(|document| projection::project(document, spec, variables))
                        .collect::<DocumentStoreResult<_>>()?
                }
                "$addFields" | "$set" => {
                    let fields = as_document(name, argument)?;
                    let mut updated = Vec::with_capacity(documents.len());
                    for mut document in documents {
                        for (field, expr) in fields {
                            let value = expression::evaluate(expr, &document, variables)?;
                            set_path(&mut document, field, value)?;
                        }
                        updated.push(document);
                    }
                    updated
                }
                "$lookup" => self.lookup(documents, as_document(name, argument)?)?,
                "$unwind" => unwind(documents, argument)?,
                "$group" => group(&documents, as_document(name, argument)?, variables)?,
                other => {
                    return Err(DocumentStoreError::Backend(format!("unrecognized pipeline stage name: `{}`", other)));
                }
            };
        }

        Ok(documents)
    }

    fn lookup(&self, documents: Vec<Document>, spec: &Document) -> DocumentStoreResult<Vec<Document>> {
        let from = spec
            .get_str("from")
            .map_err(|_| DocumentStoreError::Backend("`$lookup` requires `from`".into()))?;
        let as_field = spec
            .get_str("as")
            .map_err(|_| DocumentStoreError::Backend("`$lookup` requires `as`".into()))?;
        let foreign = self
            .collections
            .get(from)
            .map(Vec::as_slice)
            .unwrap_or_default();

        let mut joined = Vec::with_capacity(documents.len());
        for mut document in documents {
            let matches = match (spec.get_str("localField"), spec.get_str("foreignField"), spec.get_array("pipeline")) {
                (Ok(local), Ok(foreign_field), _) => {
                    let local = candidates(&document, local);
                    foreign
                        .iter()
                        .filter(|candidate| {
                            let remote = candidates(candidate, foreign_field);
                            match local.is_empty() {
                                true => remote.is_empty() || remote.iter().any(|value| matches!(value, Bson::Null)),
                                false => local.iter().any(|value| remote.iter().any(|other| equals(value, other))),
                            }
                        })
                        .cloned()
                        .map(Bson::Document)
                        .collect::<Vec<_>>()
                }
                (_, _, Ok(pipeline)) => {
                    let mut variables = Variables::new();
                    if let Ok(bindings) = spec.get_document("let") {
                        for (name, expr) in bindings {
                            variables.insert(name.clone(), expression::evaluate(expr, &document, &Variables::new())?);
                        }
                    }
                    let stages = pipeline
                        .iter()
                        .map(|stage| as_document("$lookup.pipeline", stage).cloned())
                        .collect::<DocumentStoreResult<Vec<_>>>()?;

                    self.run(foreign.to_vec(), &stages, &variables)?
                        .into_iter()
                        .map(Bson::Document)
                        .collect()
                }
                _ => {
                    return Err(DocumentStoreError::Backend(
                        "`$lookup` requires either `localField`/`foreignField` or `pipeline`".into(),
                    ));
                }
            };

            set_path(&mut document, as_field, Bson::Array(matches))?;
            joined.push(document);
        }

        Ok(joined)
    }
}

fn as_document<'b>(stage: &str, argument: &'b Bson) -> DocumentStoreResult<&'b Document> {
    match argument {
        Bson::Document(document) => Ok(document),
        _ => Err(DocumentStoreError::Backend(format!("the `{}` stage specification must be an object", stage))),
    }
}

fn as_count(stage: &str, argument: &Bson) -> DocumentStoreResult<usize> {
    match as_f64(argument) {
        Some(count) if count >= 0.0 => Ok(count as usize),
        _ => Err(DocumentStoreError::Backend(format!("`{}` needs a non-negative number", stage))),
    }
}

/// Stable multi-key sort; missing fields sort as null.
fn sort(documents: &mut [Document], spec: &Document) {
    let keys = spec
        .iter()
        .map(|(field, direction)| (field.as_str(), as_f64(direction).is_some_and(|direction| direction < 0.0)))
        .collect::<Vec<_>>();

    documents.sort_by(|a, b| {
        keys.iter()
            .map(|(field, descending)| {
                let ordering = compare(
                    get_path(a, field).unwrap_or(&Bson::Null),
                    get_path(b, field).unwrap_or(&Bson::Null),
                );
                match descending {
                    true => ordering.reverse(),
                    false => ordering,
                }
            })
            .find(|ordering| *ordering != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    });
}

fn unwind(documents: Vec<Document>, argument: &Bson) -> DocumentStoreResult<Vec<Document>> {
    let (path, preserve) = match argument {
        Bson::String(path) => (path.as_str(), false),
        Bson::Document(spec) => (
            spec.get_str("path")
                .map_err(|_| DocumentStoreError::Backend("`$unwind` requires a path".into()))?,
            spec.get_bool("preserveNullAndEmptyArrays").unwrap_or(false),
        ),
        _ => return Err(DocumentStoreError::Backend("`$unwind` needs a path".into())),
    };
    let field = path
        .strip_prefix('$')
        .ok_or_else(|| DocumentStoreError::Backend("`$unwind` path must start with `$`".into()))?;

    let mut unwound = Vec::new();
    for mut document in documents {
        match get_path(&document, field).cloned() {
            Some(Bson::Array(items)) if !items.is_empty() => {
                for item in items {
                    let mut copy = document.clone();
                    set_path(&mut copy, field, item)?;
                    unwound.push(copy);
                }
            }
            Some(Bson::Array(_)) => {
                if preserve {
                    remove_path(&mut document, field);
                    unwound.push(document);
                }
            }
            None | Some(Bson::Null) => {
                if preserve {
                    unwound.push(document);
                }
            }
            Some(_) => unwound.push(document),
        }
    }

    Ok(unwound)
}

/// Groups in first-seen order. Output fields keep the stage's key order.
fn group(documents: &[Document], spec: &Document, variables: &Variables) -> DocumentStoreResult<Vec<Document>> {
    let key_expr = spec
        .get("_id")
        .ok_or_else(|| DocumentStoreError::Backend("a group specification must include an `_id`".into()))?;

    let mut groups: Vec<(Bson, Vec<&Document>)> = Vec::new();
    for document in documents {
        let key = expression::evaluate(key_expr, document, variables)?;
        match groups.iter_mut().find(|(existing, _)| equals(existing, &key)) {
            Some((_, members)) => members.push(document),
            None => groups.push((key, vec![document])),
        }
    }

    let mut output = Vec::with_capacity(groups.len());
    for (key, members) in groups {
        let mut grouped = Document::new();
        grouped.insert("_id", key);

        for (field, accumulator) in spec.iter().filter(|(field, _)| field.as_str() != "_id") {
            let Some((operator, expr)) = accumulator
                .as_document()
                .filter(|accumulator| accumulator.len() == 1)
                .and_then(|accumulator| accumulator.iter().next())
            else {
                return Err(DocumentStoreError::Backend(format!("the field `{}` must be an accumulator object", field)));
            };

            let values = members
                .iter()
                .map(|member| expression::evaluate(expr, member, variables))
                .collect::<DocumentStoreResult<Vec<_>>>()?;
            let values = match operator.as_str() {
                "$sum" | "$avg" => values
                    .into_iter()
                    .flat_map(|value| match value {
                        Bson::Array(_) => Vec::new(),
                        value => vec![value],
                    })
                    .collect(),
                _ => values,
            };

            grouped.insert(field.clone(), expression::accumulate(operator, &values)?);
        }

        output.push(grouped);
    }

    Ok(output)
}
