//! Field typing and type-directed value coercion.
//!
//! Collections have no fixed schema. Coercion of string input (query values,
//! stringified patch values) is driven by the declared [`FieldType`] obtained
//! through a [`FieldTypeLookup`].

use std::collections::HashMap;

use bson::{Bson, DateTime as BsonDateTime, oid::ObjectId};
use serde::{Deserialize, Serialize};

use crate::{dates, path};

/// Declared type of a document field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Date,
    ObjectId,
    /// Array whose elements are of the boxed type.
    Array(Box<FieldType>),
    Mixed,
}

/// Resolves the declared type of a field within one collection.
///
/// Fields are addressed in dotted form (`a.b.0`); pointers (`/a/b/0`) are
/// accepted too.
pub trait FieldTypeLookup: Send + Sync {
    fn field_type(&self, field: &str) -> Option<FieldType>;
}

impl FieldTypeLookup for HashMap<String, FieldType> {
    fn field_type(&self, field: &str) -> Option<FieldType> {
        resolve(self, field)
    }
}

/// Looks up `field` in a flat map of dotted field names.
///
/// Numeric segments index into arrays: when `tags` is `Array(String)`, `tags.3`
/// resolves to `String`. As a last resort numeric segments are dropped, so
/// `lines.0.price` resolves through a declared `lines.price`.
pub fn resolve(fields: &HashMap<String, FieldType>, field: &str) -> Option<FieldType> {
    let dotted = if field.starts_with('/') { path::to_dotted(field) } else { field.to_string() };

    if let Some(found) = fields.get(&dotted) {
        return Some(found.clone());
    }

    let segments = dotted.split('.').collect::<Vec<_>>();

    for split in (1..segments.len()).rev() {
        let rest = &segments[split..];
        if !rest.iter().all(|segment| segment.parse::<usize>().is_ok()) {
            continue;
        }

        let mut current = match fields.get(&segments[..split].join(".")) {
            Some(found) => found.clone(),
            None => continue,
        };
        for _ in rest {
            current = match current {
                FieldType::Array(inner) => *inner,
                _ => return None,
            };
        }
        return Some(current);
    }

    let without_indexes = segments
        .iter()
        .filter(|segment| segment.parse::<usize>().is_err())
        .copied()
        .collect::<Vec<_>>()
        .join(".");

    fields.get(&without_indexes).cloned()
}

/// Parses a raw string into a typed value.
///
/// The literals `null`, `undefined`, `true` and `false` map to their typed
/// equivalents whatever the field type; the empty string stays a string.
/// Anything else is coerced according to `field_type`, falling back to the raw
/// string when coercion fails. Array fields accept `:`-delimited sub-values.
pub fn auto_parse(raw: &str, field_type: Option<&FieldType>) -> Bson {
    match raw {
        "" => return Bson::String(String::new()),
        "null" => return Bson::Null,
        "undefined" => return Bson::Undefined,
        "true" => return Bson::Boolean(true),
        "false" => return Bson::Boolean(false),
        _ => {}
    }

    match field_type {
        Some(FieldType::Number) => parse_number(raw).unwrap_or_else(|| Bson::String(raw.to_string())),
        Some(FieldType::Date) => parse_date(raw).unwrap_or_else(|| Bson::String(raw.to_string())),
        Some(FieldType::ObjectId) => ObjectId::parse_str(raw)
            .map(Bson::ObjectId)
            .unwrap_or_else(|_| Bson::String(raw.to_string())),
        Some(FieldType::Boolean) => match raw {
            "1" => Bson::Boolean(true),
            "0" => Bson::Boolean(false),
            _ => Bson::String(raw.to_string()),
        },
        Some(FieldType::Array(inner)) if raw.contains(':') => Bson::Array(
            raw.split(':')
                .map(|part| auto_parse(part, Some(inner)))
                .collect(),
        ),
        Some(FieldType::Array(inner)) => auto_parse(raw, Some(inner)),
        Some(FieldType::String) | Some(FieldType::Mixed) | None => Bson::String(raw.to_string()),
    }
}

/// Re-coerces an already decoded value. Only strings are re-parsed; values that
/// arrive typed are left alone, and so are strings with no declared type.
pub fn coerce(value: Bson, field_type: Option<&FieldType>) -> Bson {
    match (value, field_type) {
        (Bson::String(raw), Some(ty)) => auto_parse(&raw, Some(ty)),
        (Bson::Array(items), Some(FieldType::Array(inner))) => Bson::Array(
            items
                .into_iter()
                .map(|item| coerce(item, Some(inner)))
                .collect(),
        ),
        (value, _) => value,
    }
}

/// Parses an integer as `Int64` and anything else numeric as `Double`.
pub fn parse_number(raw: &str) -> Option<Bson> {
    if let Ok(int) = raw.parse::<i64>() {
        return Some(Bson::Int64(int));
    }

    raw.parse::<f64>()
        .ok()
        .filter(|float| float.is_finite())
        .map(Bson::Double)
}

/// Parses a date string (or epoch milliseconds) into a BSON date.
pub fn parse_date(raw: &str) -> Option<Bson> {
    if let Some(parsed) = dates::parse_datetime(raw) {
        return Some(Bson::DateTime(BsonDateTime::from_chrono(parsed)));
    }

    raw.parse::<i64>()
        .ok()
        .map(|millis| Bson::DateTime(BsonDateTime::from_millis(millis)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};

    #[fixture]
    fn fields() -> HashMap<String, FieldType> {
        HashMap::from([
            ("age".to_string(), FieldType::Number),
            ("born".to_string(), FieldType::Date),
            ("owner".to_string(), FieldType::ObjectId),
            ("tags".to_string(), FieldType::Array(Box::new(FieldType::String))),
            ("grid".to_string(), FieldType::Array(Box::new(FieldType::Array(Box::new(FieldType::Number))))),
            ("lines.price".to_string(), FieldType::Number),
        ])
    }

    #[rstest]
    #[case("age", Some(FieldType::Number))]
    #[case("/age", Some(FieldType::Number))]
    #[case("tags.2", Some(FieldType::String))]
    #[case("grid.0.1", Some(FieldType::Number))]
    #[case("lines.4.price", Some(FieldType::Number))]
    #[case("unknown", None)]
    fn test_resolve(fields: HashMap<String, FieldType>, #[case] field: &str, #[case] expected: Option<FieldType>) {
        assert_eq!(fields.field_type(field), expected);
    }

    #[rstest]
    #[case("null", Bson::Null)]
    #[case("undefined", Bson::Undefined)]
    #[case("true", Bson::Boolean(true))]
    #[case("false", Bson::Boolean(false))]
    #[case("", Bson::String(String::new()))]
    fn test_literals_ignore_type(#[case] raw: &str, #[case] expected: Bson) {
        assert_eq!(auto_parse(raw, Some(&FieldType::Number)), expected);
        assert_eq!(auto_parse(raw, None), expected);
    }

    #[rstest]
    #[case("18", Some(FieldType::Number), Bson::Int64(18))]
    #[case("1.5", Some(FieldType::Number), Bson::Double(1.5))]
    #[case("abc", Some(FieldType::Number), Bson::String("abc".into()))]
    #[case("18", None, Bson::String("18".into()))]
    #[case("18", Some(FieldType::String), Bson::String("18".into()))]
    #[case("1", Some(FieldType::Boolean), Bson::Boolean(true))]
    fn test_auto_parse_scalars(#[case] raw: &str, #[case] ty: Option<FieldType>, #[case] expected: Bson) {
        assert_eq!(auto_parse(raw, ty.as_ref()), expected);
    }

    #[rstest]
    fn test_auto_parse_object_id() {
        let raw = "507f1f77bcf86cd799439011";

        assert_eq!(
            auto_parse(raw, Some(&FieldType::ObjectId)),
            Bson::ObjectId(ObjectId::parse_str(raw).unwrap())
        );
    }

    #[rstest]
    fn test_auto_parse_date() {
        let parsed = auto_parse("1990-03-15", Some(&FieldType::Date));

        assert_eq!(
            parsed,
            Bson::DateTime(BsonDateTime::from_millis(637_459_200_000))
        );
    }

    #[rstest]
    fn test_auto_parse_array_splits_on_colon() {
        let ty = FieldType::Array(Box::new(FieldType::Number));

        assert_eq!(
            auto_parse("1:2:x", Some(&ty)),
            Bson::Array(vec![Bson::Int64(1), Bson::Int64(2), Bson::String("x".into())])
        );
        assert_eq!(auto_parse("7", Some(&ty)), Bson::Int64(7));
    }

    #[rstest]
    fn test_coerce_only_touches_strings() {
        assert_eq!(coerce(Bson::String("5".into()), Some(&FieldType::Number)), Bson::Int64(5));
        assert_eq!(coerce(Bson::Int32(5), Some(&FieldType::String)), Bson::Int32(5));
        assert_eq!(coerce(Bson::String("5".into()), None), Bson::String("5".into()));
    }
}
