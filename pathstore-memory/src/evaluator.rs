//! Filter document evaluation for in-memory document filtering.
//!
//! Interprets the MongoDB filter language produced by the query compiler:
//! logical combinators, field conditions with implicit array traversal,
//! `$expr` and the handful of special operators the DSL emits.

use bson::{Bson, Document};
use regex::{Regex, RegexBuilder};

use pathstore_core::error::{DocumentStoreError, DocumentStoreResult};

use crate::{
    expression::{self, Variables, truthy},
    value::{Comparable, as_f64, candidates, equals, values_at},
};

pub(crate) struct DocumentEvaluator<'a> {
    document: &'a Document,
    variables: &'a Variables,
}

impl<'a> DocumentEvaluator<'a> {
    pub fn new(document: &'a Document, variables: &'a Variables) -> Self {
        Self { document, variables }
    }

    /// Whether the document satisfies every top-level clause of `filter`.
    pub fn evaluate(&self, filter: &Document) -> DocumentStoreResult<bool> {
        for (key, condition) in filter {
            let matched = match key.as_str() {
                "$and" => {
                    let mut all = true;
                    for clause in clauses(key, condition)? {
                        if !self.evaluate(clause)? {
                            all = false;
                            break;
                        }
                    }
                    all
                }
                "$or" | "$nor" => {
                    let mut any = false;
                    for clause in clauses(key, condition)? {
                        if self.evaluate(clause)? {
                            any = true;
                            break;
                        }
                    }
                    any == (key == "$or")
                }
                "$expr" => truthy(&expression::evaluate(condition, self.document, self.variables)?),
                other if other.starts_with('$') => {
                    return Err(DocumentStoreError::Backend(format!("unknown top level operator `{}`", other)));
                }
                field => self.field(field, condition)?,
            };

            if !matched {
                return Ok(false);
            }
        }

        Ok(true)
    }

    pub fn filter_documents(
        documents: impl IntoIterator<Item = &'a Document>,
        filter: &Document,
        variables: &'a Variables,
    ) -> DocumentStoreResult<Vec<Document>> {
        let mut matched = Vec::new();
        for document in documents {
            if DocumentEvaluator::new(document, variables).evaluate(filter)? {
                matched.push(document.clone());
            }
        }

        Ok(matched)
    }

    fn field(&self, field: &str, condition: &Bson) -> DocumentStoreResult<bool> {
        match condition {
            Bson::Document(operators) if is_operator_document(operators) => {
                self.condition(field, &candidates(self.document, field), operators)
            }
            condition => matches_value(&candidates(self.document, field), condition),
        }
    }

    /// Applies an operator document to the values found at `field`.
    fn condition(&self, field: &str, values: &[&Bson], operators: &Document) -> DocumentStoreResult<bool> {
        for (operator, argument) in operators {
            let matched = match operator.as_str() {
                "$eq" => matches_value(values, argument)?,
                "$ne" => !matches_value(values, argument)?,
                "$gt" | "$gte" | "$lt" | "$lte" => values.iter().any(|value| {
                    let (value, argument) = (Comparable(*value), Comparable(argument));
                    value.same_bracket(&argument)
                        && match operator.as_str() {
                            "$gt" => value > argument,
                            "$gte" => value >= argument,
                            "$lt" => value < argument,
                            _ => value <= argument,
                        }
                }),
                "$in" | "$nin" => {
                    let mut any = false;
                    for option in array_argument(operator, argument)? {
                        if matches_value(values, option)? {
                            any = true;
                            break;
                        }
                    }
                    any == (operator == "$in")
                }
                "$all" => {
                    let required = array_argument(operator, argument)?;
                    let mut all = !required.is_empty();
                    for option in required {
                        if !matches_value(values, option)? {
                            all = false;
                            break;
                        }
                    }
                    all
                }
                "$exists" => values.is_empty() != truthy(argument),
                "$regex" => {
                    let pattern = match argument {
                        Bson::String(pattern) => pattern.as_str(),
                        Bson::RegularExpression(regex) => regex.pattern.as_str(),
                        _ => return Err(DocumentStoreError::Backend("`$regex` has to be a string".into())),
                    };
                    let options = match (operators.get("$options"), argument) {
                        (Some(Bson::String(options)), _) => options.as_str(),
                        (_, Bson::RegularExpression(regex)) => regex.options.as_str(),
                        _ => "",
                    };
                    let regex = compile(pattern, options)?;
                    values.iter().any(|value| matches!(value, Bson::String(text) if regex.is_match(text)))
                }
                "$options" => true,
                "$elemMatch" => self.elem_match(values_at(self.document, field), argument)?,
                "$size" => {
                    let size = as_f64(argument)
                        .ok_or_else(|| DocumentStoreError::Backend("`$size` needs a number".into()))?;
                    values_at(self.document, field)
                        .into_iter()
                        .any(|value| matches!(value, Bson::Array(items) if items.len() as f64 == size))
                }
                "$geoWithin" => within(values_at(self.document, field), argument)?,
                "$not" => match argument {
                    Bson::Document(inner) if is_operator_document(inner) => !self.condition(field, values, inner)?,
                    Bson::RegularExpression(_) => !matches_value(values, argument)?,
                    _ => return Err(DocumentStoreError::Backend("`$not` needs a regex or a document".into())),
                },
                other => {
                    return Err(DocumentStoreError::Backend(format!("unknown operator `{}`", other)));
                }
            };

            if !matched {
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn elem_match(&self, values: Vec<&Bson>, argument: &Bson) -> DocumentStoreResult<bool> {
        let Bson::Document(condition) = argument else {
            return Err(DocumentStoreError::Backend("`$elemMatch` needs an object".into()));
        };

        for value in values {
            let Bson::Array(items) = value else {
                continue;
            };

            for item in items {
                let matched = match item {
                    _ if is_operator_document(condition) => self.element_condition(item, condition)?,
                    Bson::Document(inner) => DocumentEvaluator::new(inner, self.variables).evaluate(condition)?,
                    _ => false,
                };
                if matched {
                    return Ok(true);
                }
            }
        }

        Ok(false)
    }

    /// Operator conditions against a single array element. The element is
    /// wrapped so nested `$elemMatch` sees it at a field path.
    fn element_condition(&self, item: &Bson, condition: &Document) -> DocumentStoreResult<bool> {
        const ELEMENT: &str = "element";

        let holder = bson::doc! { ELEMENT: item.clone() };
        let evaluator = DocumentEvaluator::new(&holder, self.variables);
        evaluator.condition(ELEMENT, &[item], condition)
    }
}

fn clauses<'b>(operator: &str, condition: &'b Bson) -> DocumentStoreResult<Vec<&'b Document>> {
    let Bson::Array(items) = condition else {
        return Err(DocumentStoreError::Backend(format!("`{}` must be an array", operator)));
    };

    items
        .iter()
        .map(|item| match item {
            Bson::Document(clause) => Ok(clause),
            _ => Err(DocumentStoreError::Backend(format!("`{}` entries must be objects", operator))),
        })
        .collect()
}

fn array_argument<'b>(operator: &str, argument: &'b Bson) -> DocumentStoreResult<&'b Vec<Bson>> {
    match argument {
        Bson::Array(items) => Ok(items),
        _ => Err(DocumentStoreError::Backend(format!("`{}` needs an array", operator))),
    }
}

fn is_operator_document(document: &Document) -> bool {
    document.keys().next().is_some_and(|key| key.starts_with('$'))
}

/// Equality the way a bare `{ field: value }` condition matches: a null
/// value also matches a missing field, a regex matches string values.
fn matches_value(values: &[&Bson], expected: &Bson) -> DocumentStoreResult<bool> {
    match expected {
        Bson::Null => Ok(values.is_empty() || values.iter().any(|value| matches!(value, Bson::Null))),
        Bson::RegularExpression(regex) => {
            let regex = compile(regex.pattern.as_str(), regex.options.as_str())?;
            Ok(values.iter().any(|value| matches!(value, Bson::String(text) if regex.is_match(text))))
        }
        expected => Ok(values.iter().any(|value| equals(value, expected))),
    }
}

fn compile(pattern: &str, options: &str) -> DocumentStoreResult<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(options.contains('i'))
        .multi_line(options.contains('m'))
        .dot_matches_new_line(options.contains('s'))
        .ignore_whitespace(options.contains('x'))
        .build()
        .map_err(|e| DocumentStoreError::Backend(format!("invalid regex `{}`: {}", pattern, e)))
}

/// `$geoWithin` with a flat `$center` circle. Points are `[long, lat]` pairs or
/// GeoJSON points.
fn within(values: Vec<&Bson>, argument: &Bson) -> DocumentStoreResult<bool> {
    let circle = match argument {
        Bson::Document(shape) => shape.get_array("$center").ok(),
        _ => None,
    };
    let Some([center, radius]) = circle.map(Vec::as_slice) else {
        return Err(DocumentStoreError::Backend("`$geoWithin` supports `$center` only".into()));
    };
    let (Some((x, y)), Some(radius)) = (point(center), as_f64(radius)) else {
        return Err(DocumentStoreError::Backend("malformed `$center`".into()));
    };

    Ok(values
        .into_iter()
        .filter_map(point)
        .any(|(px, py)| (px - x).hypot(py - y) <= radius))
}

fn point(value: &Bson) -> Option<(f64, f64)> {
    let coordinates = match value {
        Bson::Array(items) => items,
        Bson::Document(geo) => geo.get_array("coordinates").ok()?,
        _ => return None,
    };

    match coordinates.as_slice() {
        [x, y] => Some((as_f64(x)?, as_f64(y)?)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use rstest::{fixture, rstest};

    #[fixture]
    fn invoice() -> Document {
        doc! {
            "_id": 7,
            "name": "John Smith",
            "total": 250.5,
            "status": "open",
            "note": null,
            "tags": ["urgent", "vip"],
            "grid": [["a", "b"], ["c"]],
            "lines": [{ "sku": "A1", "qty": 2 }, { "sku": "B2", "qty": 9 }],
            "loc": [1.0, 2.0],
        }
    }

    #[rstest]
    #[case(doc! { "status": "open" }, true)]
    #[case(doc! { "total": 250.5, "_id": 7_i64 }, true)]
    #[case(doc! { "tags": "vip" }, true)]
    #[case(doc! { "tags": ["urgent", "vip"] }, true)]
    #[case(doc! { "lines.sku": "B2" }, true)]
    #[case(doc! { "note": null, "missing": null }, true)]
    #[case(doc! { "total": { "$gte": 200, "$lte": 300 } }, true)]
    #[case(doc! { "total": { "$gt": "100" } }, false)]
    #[case(doc! { "status": { "$ne": "open" } }, false)]
    #[case(doc! { "status": { "$in": ["closed", "open"] } }, true)]
    #[case(doc! { "tags": { "$nin": ["spam"] } }, true)]
    #[case(doc! { "tags": { "$all": ["vip", "urgent"] } }, true)]
    #[case(doc! { "missing": { "$exists": false }, "note": { "$exists": true } }, true)]
    #[case(doc! { "name": { "$regex": "^jo.*h$", "$options": "i" } }, true)]
    #[case(doc! { "name": { "$regex": "^jo" } }, false)]
    #[case(doc! { "lines": { "$elemMatch": { "sku": "A1", "qty": { "$gt": 5 } } } }, false)]
    #[case(doc! { "lines": { "$elemMatch": { "sku": "B2", "qty": { "$gt": 5 } } } }, true)]
    #[case(doc! { "grid": { "$elemMatch": { "$elemMatch": { "$eq": "c" } } } }, true)]
    #[case(doc! { "tags": { "$elemMatch": { "$elemMatch": { "$eq": "vip" } } } }, false)]
    #[case(doc! { "tags": { "$size": 2 } }, true)]
    #[case(doc! { "loc": { "$geoWithin": { "$center": [[1.0, 2.1], 0.2] } } }, true)]
    #[case(doc! { "loc": { "$geoWithin": { "$center": [[5.0, 5.0], 0.2] } } }, false)]
    #[case(doc! { "status": { "$not": { "$eq": "closed" } } }, true)]
    #[case(doc! { "$or": [{ "status": "closed" }, { "tags": "vip" }] }, true)]
    #[case(doc! { "$and": [{ "status": "open" }, { "total": { "$lt": 10 } }] }, false)]
    #[case(doc! { "$nor": [{ "status": "closed" }] }, true)]
    #[case(doc! { "$expr": { "$gt": ["$total", 100] } }, true)]
    fn test_evaluate(invoice: Document, #[case] filter: Document, #[case] expected: bool) {
        let variables = Variables::new();

        assert_eq!(DocumentEvaluator::new(&invoice, &variables).evaluate(&filter).unwrap(), expected);
    }

    #[rstest]
    fn test_expr_sees_variables(invoice: Document) {
        let variables = Variables::from([("local".to_string(), Bson::Array(vec![Bson::Int32(7)]))]);
        let filter = doc! { "$expr": { "$in": ["$_id", { "$ifNull": ["$$local", []] }] } };

        assert!(DocumentEvaluator::new(&invoice, &variables).evaluate(&filter).unwrap());
        assert!(!DocumentEvaluator::new(&invoice, &Variables::new()).evaluate(&filter).unwrap());
    }

    #[rstest]
    #[case(doc! { "$where": "true" })]
    #[case(doc! { "status": { "$type": "string" } })]
    #[case(doc! { "name": { "$regex": "(" } })]
    fn test_rejects_unsupported_filters(invoice: Document, #[case] filter: Document) {
        let variables = Variables::new();

        assert!(DocumentEvaluator::new(&invoice, &variables).evaluate(&filter).is_err());
    }

    #[rstest]
    fn test_filter_documents_keeps_order() {
        let documents = vec![doc! { "n": 3 }, doc! { "n": 1 }, doc! { "n": 2 }];
        let variables = Variables::new();

        let matched =
            DocumentEvaluator::filter_documents(&documents, &doc! { "n": { "$gte": 2 } }, &variables).unwrap();

        assert_eq!(matched, vec![doc! { "n": 3 }, doc! { "n": 2 }]);
    }
}
