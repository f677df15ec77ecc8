use std::{cmp::Ordering, sync::LazyLock};

use bson::{Bson, DateTime as BsonDateTime};
use regex::Regex;
use tracing::warn;

use crate::{
    dates::{self, DateUnit},
    field::{FieldType, FieldTypeLookup, auto_parse},
    query::{Expr, FieldOp, Filter},
};

static OPERATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^\{([a-z]+)(\d*)\}(.*)$").expect("valid operator pattern"));

static FIELD_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_$][\w.$-]*$").expect("valid field pattern"));

/// Compiles one filter pair, splitting `|` alternatives into an OR group.
///
/// An alternative of the form `other=value` targets another field; a bare
/// alternative reuses `key`.
pub(crate) fn parse_pair(key: &str, value: &str, types: Option<&dyn FieldTypeLookup>) -> Option<Expr> {
    if !value.contains('|') {
        return parse_clause(key, value, types);
    }

    let alternatives = value
        .split('|')
        .filter_map(|alternative| match alternative.split_once('=') {
            Some((other, rest)) if FIELD_NAME.is_match(other) => parse_clause(other, rest, types),
            _ => parse_clause(key, alternative, types),
        })
        .collect::<Vec<_>>();

    (!alternatives.is_empty()).then(|| Filter::or(alternatives))
}

/// Compiles a single clause. Returns `None` when the clause is dropped.
pub(crate) fn parse_clause(key: &str, value: &str, types: Option<&dyn FieldTypeLookup>) -> Option<Expr> {
    let field_type = types.and_then(|types| types.field_type(key));
    let ty = field_type.as_ref();

    let Some(captures) = OPERATOR.captures(value) else {
        return Some(bare(key, value, ty));
    };

    let op = &captures[1];
    let depth = &captures[2];
    let rest = &captures[3];

    let expr = match (op, depth) {
        ("eq", "") => Filter::eq(key, auto_parse(rest, ty)),
        ("ne" | "not", "") => Filter::cmp(key, FieldOp::Ne, auto_parse(rest, ty)),
        ("gt", "") => Filter::cmp(key, FieldOp::Gt, auto_parse(rest, ty)),
        ("gte", "") => Filter::cmp(key, FieldOp::Gte, auto_parse(rest, ty)),
        ("lt", "") => Filter::cmp(key, FieldOp::Lt, auto_parse(rest, ty)),
        ("lte", "") => Filter::cmp(key, FieldOp::Lte, auto_parse(rest, ty)),
        ("in", "") => Filter::cmp(key, FieldOp::In, list(rest, ty)),
        ("nin", "") => Filter::cmp(key, FieldOp::Nin, list(rest, ty)),
        ("all", "") => Filter::cmp(key, FieldOp::All, list(rest, ty)),
        ("in", depth) => {
            let depth = depth.parse::<usize>().ok()?;
            let first = rest.split(',').next().unwrap_or_default();
            Filter::elem_match(key, depth, auto_parse(first, ty))
        }
        ("btw", "") => return between(key, rest, ty),
        ("center", "") => return center(key, rest),
        ("exists", "") => Filter::exists(key, true),
        (unit, "") if DateUnit::from_operator(unit).is_some() => {
            return date_component(key, rest, DateUnit::from_operator(unit)?);
        }
        _ => {
            warn!(field = key, operator = op, "unknown filter operator, matching literally");
            bare(key, value, ty)
        }
    };

    Some(expr)
}

/// Equality on a bare value, a wildcard match when it contains `*`, or a
/// non-existence test when it parses to `undefined`.
fn bare(key: &str, value: &str, ty: Option<&FieldType>) -> Expr {
    if value.contains('*') {
        return Filter::regex(key, wildcard_pattern(value));
    }

    match auto_parse(value, ty) {
        Bson::Undefined => Filter::exists(key, false),
        parsed => Filter::eq(key, parsed),
    }
}

/// Builds an anchored regular expression from a `*` wildcard value. Runs of
/// `*` collapse into one wildcard; every other character matches literally.
pub fn wildcard_pattern(value: &str) -> String {
    let mut collapsed = String::with_capacity(value.len());
    for ch in value.chars() {
        if ch == '*' && collapsed.ends_with('*') {
            continue;
        }
        collapsed.push(ch);
    }

    let body = collapsed
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");

    format!("^{}$", body)
}

fn list(raw: &str, ty: Option<&FieldType>) -> Bson {
    Bson::Array(raw.split(',').map(|item| auto_parse(item, ty)).collect())
}

fn between(key: &str, raw: &str, ty: Option<&FieldType>) -> Option<Expr> {
    let (min, max) = raw.split_once(',')?;
    let (min, max) = (auto_parse(min, ty), auto_parse(max, ty));

    if compare(&min, &max) == Some(Ordering::Less) {
        return Some(Filter::range(key, min, max));
    }

    warn!(field = key, value = raw, "dropping range whose lower bound is not below its upper bound");
    None
}

fn center(key: &str, raw: &str) -> Option<Expr> {
    let parts = raw
        .split(',')
        .map(|part| part.trim().parse::<f64>())
        .collect::<Result<Vec<_>, _>>();

    match parts.as_deref() {
        Ok([long, lat, radius]) => Some(Filter::within_center(key, (*long, *lat), *radius)),
        _ => {
            warn!(field = key, value = raw, "dropping malformed center clause");
            None
        }
    }
}

fn date_component(key: &str, raw: &str, unit: DateUnit) -> Option<Expr> {
    let range = dates::parse_datetime(raw).and_then(|at| dates::unit_range(at, unit));

    match range {
        Some((start, end)) => Some(Filter::range(
            key,
            BsonDateTime::from_chrono(start),
            BsonDateTime::from_chrono(end),
        )),
        None => {
            warn!(field = key, value = raw, "dropping date clause with unparsable date");
            None
        }
    }
}

fn compare(left: &Bson, right: &Bson) -> Option<Ordering> {
    match (left, right) {
        (Bson::DateTime(a), Bson::DateTime(b)) => Some(a.cmp(b)),
        (Bson::String(a), Bson::String(b)) => match (a.trim().parse::<f64>(), b.trim().parse::<f64>()) {
            (Ok(a), Ok(b)) => a.partial_cmp(&b),
            _ => Some(a.cmp(b)),
        },
        (a, b) => as_f64(a)?.partial_cmp(&as_f64(b)?),
    }
}

fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(v) => Some(*v as f64),
        Bson::Int64(v) => Some(*v as f64),
        Bson::Double(v) => Some(*v),
        _ => None,
    }
}
