//! Aggregation expression evaluation.
//!
//! Supports field references (`$a.b`), variables (`$$ROOT`, `$$CURRENT`,
//! `$$name` bound by `$lookup`'s `let`), object and array literals, and the
//! operators the query compiler emits for computed fields.

use std::{cmp::Ordering, collections::HashMap};

use bson::{Bson, DateTime, Document};

use pathstore_core::error::{DocumentStoreError, DocumentStoreResult};

use crate::value::{as_f64, compare, equals, get_path};

pub(crate) type Variables = HashMap<String, Bson>;

/// Evaluates `expr` against `document`. Missing fields evaluate to `Null`.
pub(crate) fn evaluate(expr: &Bson, document: &Document, variables: &Variables) -> DocumentStoreResult<Bson> {
    match expr {
        Bson::String(reference) if reference.starts_with("$$") => Ok(variable(&reference[2..], document, variables)),
        Bson::String(reference) if reference.starts_with('$') => {
            Ok(field(document, &reference[1..]).unwrap_or(Bson::Null))
        }
        Bson::Document(operation) if is_operator(operation) => {
            let Some((operator, argument)) = operation.iter().next() else {
                return Ok(Bson::Null);
            };
            operator_value(operator, argument, document, variables)
        }
        Bson::Document(fields) => fields
            .iter()
            .map(|(key, value)| Ok((key.clone(), evaluate(value, document, variables)?)))
            .collect::<DocumentStoreResult<Document>>()
            .map(Bson::Document),
        Bson::Array(items) => items
            .iter()
            .map(|item| evaluate(item, document, variables))
            .collect::<DocumentStoreResult<Vec<_>>>()
            .map(Bson::Array),
        literal => Ok(literal.clone()),
    }
}

/// Truthiness as `$cond` and `$expr` see it.
pub(crate) fn truthy(value: &Bson) -> bool {
    match value {
        Bson::Null | Bson::Undefined => false,
        Bson::Boolean(value) => *value,
        value => as_f64(value).is_none_or(|number| number != 0.0),
    }
}

fn is_operator(document: &Document) -> bool {
    document.len() == 1 && document.keys().all(|key| key.starts_with('$'))
}

fn variable(reference: &str, document: &Document, variables: &Variables) -> Bson {
    let (name, rest) = match reference.split_once('.') {
        Some((name, rest)) => (name, Some(rest)),
        None => (reference, None),
    };

    let root = match name {
        "ROOT" | "CURRENT" => Some(Bson::Document(document.clone())),
        name => variables.get(name).cloned(),
    };

    match (root, rest) {
        (Some(Bson::Document(root)), Some(rest)) => field(&root, rest).unwrap_or(Bson::Null),
        (Some(root), None) => root,
        _ => Bson::Null,
    }
}

/// Resolves a field reference, projecting through arrays of documents the
/// way MongoDB does (`$lines.price` yields every line's price).
fn field(document: &Document, dotted: &str) -> Option<Bson> {
    if let Some(found) = get_path(document, dotted) {
        return Some(found.clone());
    }

    let (head, rest) = dotted.split_once('.')?;
    match document.get(head)? {
        Bson::Array(items) => Some(Bson::Array(
            items
                .iter()
                .filter_map(|item| match item {
                    Bson::Document(inner) => field(inner, rest),
                    _ => None,
                })
                .collect(),
        )),
        Bson::Document(inner) => field(inner, rest),
        _ => None,
    }
}

fn arguments(argument: &Bson, document: &Document, variables: &Variables) -> DocumentStoreResult<Vec<Bson>> {
    match argument {
        Bson::Array(items) => items
            .iter()
            .map(|item| evaluate(item, document, variables))
            .collect(),
        single => Ok(vec![evaluate(single, document, variables)?]),
    }
}

fn operator_value(operator: &str, argument: &Bson, document: &Document, variables: &Variables) -> DocumentStoreResult<Bson> {
    if operator == "$literal" {
        return Ok(argument.clone());
    }
    if operator == "$cond" {
        return cond(argument, document, variables);
    }

    let args = arguments(argument, document, variables)?;

    let value = match operator {
        "$add" => add(&args),
        "$subtract" => match args.as_slice() {
            [Bson::DateTime(a), Bson::DateTime(b)] => Bson::Int64(a.timestamp_millis() - b.timestamp_millis()),
            [Bson::DateTime(a), b] => match as_f64(b) {
                Some(millis) => Bson::DateTime(DateTime::from_millis(a.timestamp_millis() - millis as i64)),
                None => Bson::Null,
            },
            [a, b] => arithmetic(a, b, |a, b| a - b, |a, b| a.checked_sub(b)),
            _ => return Err(arity(operator)),
        },
        "$multiply" => args
            .iter()
            .try_fold(Bson::Int64(1), |product, value| match arithmetic(&product, value, |a, b| a * b, |a, b| a.checked_mul(b)) {
                Bson::Null => None,
                product => Some(product),
            })
            .unwrap_or(Bson::Null),
        "$divide" => match args.as_slice() {
            [a, b] => match (as_f64(a), as_f64(b)) {
                (Some(_), Some(divisor)) if divisor == 0.0 => {
                    return Err(DocumentStoreError::Backend("can't $divide by zero".into()));
                }
                (Some(a), Some(b)) => Bson::Double(a / b),
                _ => Bson::Null,
            },
            _ => return Err(arity(operator)),
        },
        "$mod" => match args.as_slice() {
            [a, b] => arithmetic(a, b, |a, b| a % b, |a, b| a.checked_rem(b)),
            _ => return Err(arity(operator)),
        },
        "$concat" => {
            let mut joined = String::new();
            for value in &args {
                match value {
                    Bson::String(part) => joined.push_str(part),
                    _ => return Ok(Bson::Null),
                }
            }
            Bson::String(joined)
        }
        "$toLower" | "$toUpper" => match args.first() {
            Some(Bson::String(text)) if operator == "$toLower" => Bson::String(text.to_lowercase()),
            Some(Bson::String(text)) => Bson::String(text.to_uppercase()),
            _ => Bson::String(String::new()),
        },
        "$size" => match args.first() {
            Some(Bson::Array(items)) => Bson::Int64(items.len() as i64),
            _ => return Err(DocumentStoreError::Backend("$size expects an array".into())),
        },
        "$ifNull" => args
            .iter()
            .find(|value| !matches!(value, Bson::Null | Bson::Undefined))
            .cloned()
            .unwrap_or(Bson::Null),
        "$in" => match args.as_slice() {
            [needle, Bson::Array(haystack)] => Bson::Boolean(haystack.iter().any(|item| equals(item, needle))),
            [_, _] => return Err(DocumentStoreError::Backend("$in requires an array as a second argument".into())),
            _ => return Err(arity(operator)),
        },
        "$arrayElemAt" => match args.as_slice() {
            [Bson::Array(items), index] => as_f64(index)
                .map(|index| index as i64)
                .and_then(|index| match index {
                    index if index < 0 => items.len().checked_sub(index.unsigned_abs() as usize),
                    index => Some(index as usize),
                })
                .and_then(|index| items.get(index).cloned())
                .unwrap_or(Bson::Null),
            _ => Bson::Null,
        },
        "$eq" | "$ne" | "$gt" | "$gte" | "$lt" | "$lte" => match args.as_slice() {
            [a, b] => {
                let ordering = compare(a, b);
                Bson::Boolean(match operator {
                    "$eq" => ordering == Ordering::Equal,
                    "$ne" => ordering != Ordering::Equal,
                    "$gt" => ordering == Ordering::Greater,
                    "$gte" => ordering != Ordering::Less,
                    "$lt" => ordering == Ordering::Less,
                    _ => ordering != Ordering::Greater,
                })
            }
            _ => return Err(arity(operator)),
        },
        "$and" => Bson::Boolean(args.iter().all(truthy)),
        "$or" => Bson::Boolean(args.iter().any(truthy)),
        "$not" => Bson::Boolean(!args.first().is_some_and(truthy)),
        "$sum" | "$avg" | "$min" | "$max" | "$first" | "$last" => {
            let values = match args.as_slice() {
                [Bson::Array(items)] => items.clone(),
                _ => args,
            };
            accumulate(operator, &values)?
        }
        other => {
            return Err(DocumentStoreError::Backend(format!("unsupported expression operator `{}`", other)));
        }
    };

    Ok(value)
}

fn cond(argument: &Bson, document: &Document, variables: &Variables) -> DocumentStoreResult<Bson> {
    let (condition, then, otherwise) = match argument {
        Bson::Array(items) if items.len() == 3 => (&items[0], &items[1], &items[2]),
        Bson::Document(branches) => match (branches.get("if"), branches.get("then"), branches.get("else")) {
            (Some(condition), Some(then), Some(otherwise)) => (condition, then, otherwise),
            _ => return Err(arity("$cond")),
        },
        _ => return Err(arity("$cond")),
    };

    match truthy(&evaluate(condition, document, variables)?) {
        true => evaluate(then, document, variables),
        false => evaluate(otherwise, document, variables),
    }
}

fn add(args: &[Bson]) -> Bson {
    let date = args.iter().find_map(|value| match value {
        Bson::DateTime(date) => Some(*date),
        _ => None,
    });

    let numbers = args
        .iter()
        .filter(|value| !matches!(value, Bson::DateTime(_)))
        .try_fold(Bson::Int64(0), |sum, value| match arithmetic(&sum, value, |a, b| a + b, |a, b| a.checked_add(b)) {
            Bson::Null => None,
            sum => Some(sum),
        });

    match (date, numbers) {
        (_, None) => Bson::Null,
        (Some(date), Some(offset)) => {
            let offset = as_f64(&offset).unwrap_or_default() as i64;
            Bson::DateTime(DateTime::from_millis(date.timestamp_millis() + offset))
        }
        (None, Some(sum)) => sum,
    }
}

/// Integer arithmetic while both sides are integral and nothing overflows,
/// floating point otherwise. Non-numbers yield `Null`.
fn arithmetic(a: &Bson, b: &Bson, float: impl Fn(f64, f64) -> f64, int: impl Fn(i64, i64) -> Option<i64>) -> Bson {
    let integral = |value: &Bson| match value {
        Bson::Int32(value) => Some(i64::from(*value)),
        Bson::Int64(value) => Some(*value),
        _ => None,
    };

    if let (Some(a), Some(b)) = (integral(a), integral(b)) {
        if let Some(result) = int(a, b) {
            return Bson::Int64(result);
        }
    }

    match (as_f64(a), as_f64(b)) {
        (Some(a), Some(b)) => Bson::Double(float(a, b)),
        _ => Bson::Null,
    }
}

/// Folds values the way the group accumulator of the same name does.
pub(crate) fn accumulate(operator: &str, values: &[Bson]) -> DocumentStoreResult<Bson> {
    let numbers = || values.iter().filter(|value| as_f64(value).is_some());

    let value = match operator {
        "$sum" => numbers().fold(Bson::Int64(0), |sum, value| {
            arithmetic(&sum, value, |a, b| a + b, |a, b| a.checked_add(b))
        }),
        "$avg" => {
            let numbers = numbers().filter_map(as_f64).collect::<Vec<_>>();
            match numbers.is_empty() {
                true => Bson::Null,
                false => Bson::Double(numbers.iter().sum::<f64>() / numbers.len() as f64),
            }
        }
        "$min" | "$max" => {
            let present = values
                .iter()
                .filter(|value| !matches!(value, Bson::Null | Bson::Undefined));
            let found = match operator {
                "$min" => present.min_by(|a, b| compare(a, b)),
                _ => present.max_by(|a, b| compare(a, b)),
            };
            found.cloned().unwrap_or(Bson::Null)
        }
        "$first" => values.first().cloned().unwrap_or(Bson::Null),
        "$last" => values.last().cloned().unwrap_or(Bson::Null),
        "$push" => Bson::Array(values.to_vec()),
        "$addToSet" => {
            let mut unique: Vec<Bson> = Vec::new();
            for value in values {
                if !unique.iter().any(|seen| equals(seen, value)) {
                    unique.push(value.clone());
                }
            }
            Bson::Array(unique)
        }
        "$count" => Bson::Int64(values.len() as i64),
        other => {
            return Err(DocumentStoreError::Backend(format!("unsupported accumulator `{}`", other)));
        }
    };

    Ok(value)
}

fn arity(operator: &str) -> DocumentStoreError {
    DocumentStoreError::Backend(format!("wrong number of arguments to {}", operator))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::{bson, doc};
    use rstest::{fixture, rstest};

    #[fixture]
    fn order() -> Document {
        doc! {
            "price": 12,
            "qty": 3,
            "name": "Desk",
            "lines": [{ "price": 2 }, { "price": 5.5 }],
            "note": null,
        }
    }

    #[rstest]
    #[case(bson!({ "$multiply": ["$price", "$qty"] }), bson!(36_i64))]
    #[case(bson!({ "$add": ["$price", 0.5] }), bson!(12.5))]
    #[case(bson!({ "$subtract": ["$price", 2] }), bson!(10_i64))]
    #[case(bson!({ "$divide": ["$price", 8] }), bson!(1.5))]
    #[case(bson!({ "$concat": ["$name", "-", "A"] }), bson!("Desk-A"))]
    #[case(bson!({ "$toUpper": "$name" }), bson!("DESK"))]
    #[case(bson!({ "$sum": "$lines.price" }), bson!(7.5))]
    #[case(bson!({ "$size": "$lines" }), bson!(2_i64))]
    #[case(bson!({ "$ifNull": ["$note", "$missing", "fallback"] }), bson!("fallback"))]
    #[case(bson!({ "$in": ["$qty", [1, 3]] }), bson!(true))]
    #[case(bson!({ "$gte": ["$price", 12] }), bson!(true))]
    #[case(bson!({ "$cond": [{ "$gt": ["$qty", 5] }, "bulk", "retail"] }), bson!("retail"))]
    #[case(bson!({ "$literal": "$price" }), bson!("$price"))]
    #[case(bson!("$missing"), bson!(null))]
    fn test_evaluate(order: Document, #[case] expr: Bson, #[case] expected: Bson) {
        assert_eq!(evaluate(&expr, &order, &Variables::new()).unwrap(), expected);
    }

    #[rstest]
    fn test_variables(order: Document) {
        let variables = Variables::from([("local".to_string(), bson!([1, 2]))]);

        assert_eq!(evaluate(&bson!("$$local"), &order, &variables).unwrap(), bson!([1, 2]));
        assert_eq!(evaluate(&bson!("$$ROOT.name"), &order, &variables).unwrap(), bson!("Desk"));
        assert_eq!(evaluate(&bson!("$$unbound"), &order, &variables).unwrap(), bson!(null));
    }

    #[rstest]
    #[case("$sum", bson!(17_i64))]
    #[case("$avg", bson!(5.666666666666667))]
    #[case("$min", bson!(2))]
    #[case("$max", bson!(12))]
    #[case("$count", bson!(3_i64))]
    fn test_accumulate(#[case] operator: &str, #[case] expected: Bson) {
        let values = vec![bson!(12), bson!(3), bson!(2)];

        assert_eq!(accumulate(operator, &values).unwrap(), expected);
    }

    #[rstest]
    fn test_rejects_unknown_operator(order: Document) {
        assert!(evaluate(&bson!({ "$teleport": "$price" }), &order, &Variables::new()).is_err());
        assert!(evaluate(&bson!({ "$divide": ["$price", 0] }), &order, &Variables::new()).is_err());
    }
}
