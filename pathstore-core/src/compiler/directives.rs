use bson::{Bson, Document, doc};
use tracing::warn;

use crate::{
    error::{DocumentStoreError, DocumentStoreResult},
    field::parse_number,
    query::{Sort, SortDirection},
};

use super::{ComputedField, GroupSpec, LookupMatch, LookupRequest, LookupSpec, MAX_PER_PAGE, clause};

pub(super) fn parse_page(raw: &str) -> Option<u64> {
    match raw.trim().parse::<u64>() {
        Ok(page) => Some(page.max(1)),
        Err(_) => {
            warn!(value = raw, "ignoring unparsable page");
            None
        }
    }
}

pub(super) fn parse_per_page(raw: &str) -> Option<u64> {
    match raw.trim().parse::<u64>() {
        Ok(per_page) => Some(per_page.clamp(1, MAX_PER_PAGE)),
        Err(_) => {
            warn!(value = raw, "ignoring unparsable per_page");
            None
        }
    }
}

/// `field,direction` or `-field`.
pub(super) fn parse_sort(raw: &str) -> Option<Sort> {
    let raw = raw.trim();

    let (field, direction) = match raw.split_once(',') {
        Some((field, direction)) => {
            let direction = match direction.trim().to_ascii_lowercase().as_str() {
                "desc" | "descending" | "-1" => SortDirection::Desc,
                _ => SortDirection::Asc,
            };
            (field.trim(), direction)
        }
        None => match raw.strip_prefix('-') {
            Some(field) => (field, SortDirection::Desc),
            None => (raw.strip_prefix('+').unwrap_or(raw), SortDirection::Asc),
        },
    };

    (!field.is_empty()).then(|| Sort { field: field.to_string(), direction })
}

/// `a,b,!c` becomes `{ a: 1, b: 1, c: 0 }`.
pub(super) fn parse_select(raw: &str) -> Option<Document> {
    let projection = raw
        .split(',')
        .map(str::trim)
        .filter(|field| !field.is_empty())
        .map(|field| match field.strip_prefix('!') {
            Some(excluded) => (excluded.to_string(), Bson::Int32(0)),
            None => (field.to_string(), Bson::Int32(1)),
        })
        .collect::<Document>();

    (!projection.is_empty()).then_some(projection)
}

/// Comma list of `name={op}arg[:arg...]`, `name=field` or `name='literal'`.
pub(super) fn parse_computed(raw: &str) -> DocumentStoreResult<Vec<ComputedField>> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| {
            let (name, expr) = item
                .split_once('=')
                .filter(|(name, expr)| !name.is_empty() && !expr.is_empty())
                .ok_or_else(|| DocumentStoreError::InvalidQuery(format!("computed field `{}`", item)))?;

            Ok(ComputedField { name: name.trim().to_string(), expr: computed_expr(expr.trim())? })
        })
        .collect()
}

fn computed_expr(raw: &str) -> DocumentStoreResult<Bson> {
    let Some(rest) = raw.strip_prefix('{') else {
        return Ok(operand(raw));
    };

    let (op, args) = rest
        .split_once('}')
        .filter(|(op, _)| !op.is_empty() && op.chars().all(char::is_alphanumeric))
        .ok_or_else(|| DocumentStoreError::InvalidQuery(format!("computed expression `{}`", raw)))?;

    let mut operands = args.split(':').map(operand).collect::<Vec<_>>();
    let operands = match operands.len() {
        1 => operands.remove(0),
        _ => Bson::Array(operands),
    };

    Ok(Bson::Document(doc! { format!("${}", op): operands }))
}

fn operand(raw: &str) -> Bson {
    if let Some(number) = parse_number(raw) {
        return number;
    }
    if let Some(literal) = raw.strip_prefix('\'').and_then(|r| r.strip_suffix('\'')) {
        return Bson::String(literal.to_string());
    }
    if raw.starts_with('$') {
        return Bson::String(raw.to_string());
    }
    Bson::String(format!("${}", raw))
}

pub(super) fn parse_lookups(raw: &str) -> DocumentStoreResult<Vec<LookupRequest>> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| {
            if item.contains(':') {
                parse_lookup_spec(item).map(LookupRequest::Explicit)
            } else if item == "auto" {
                Ok(LookupRequest::Auto(None))
            } else {
                Ok(LookupRequest::Auto(Some(item.to_string())))
            }
        })
        .collect()
}

/// `from:foreignField:localField:as[:unwind]`.
fn parse_lookup_spec(raw: &str) -> DocumentStoreResult<LookupSpec> {
    let parts = raw.split(':').map(str::trim).collect::<Vec<_>>();
    let invalid = || DocumentStoreError::InvalidLookupParams(raw.to_string());

    if parts.iter().any(|part| part.is_empty()) {
        return Err(invalid());
    }

    let unwind = match parts.get(4).copied() {
        None => false,
        Some("unwind" | "true" | "1") => true,
        Some("false" | "0") => false,
        Some(_) => return Err(invalid()),
    };

    match parts[..] {
        [from, foreign_field, local_field, as_field] | [from, foreign_field, local_field, as_field, _] => {
            Ok(LookupSpec {
                from: from.to_string(),
                foreign_field: foreign_field.to_string(),
                local_field: local_field.to_string(),
                as_field: as_field.to_string(),
                unwind,
            })
        }
        _ => Err(invalid()),
    }
}

/// `from:foreignField:localField:as[:unwind];field=value;...`.
pub(super) fn parse_lookup_match(raw: &str) -> DocumentStoreResult<LookupMatch> {
    let mut parts = raw.split(';');
    let lookup = parse_lookup_spec(parts.next().unwrap_or_default())?;

    let filter = parts
        .map(str::trim)
        .filter(|expr| !expr.is_empty())
        .map(|expr| {
            let (key, value) = expr
                .split_once('=')
                .ok_or_else(|| DocumentStoreError::InvalidLookupParams(raw.to_string()))?;
            Ok(clause::parse_pair(key.trim(), value, None))
        })
        .collect::<DocumentStoreResult<Vec<_>>>()?
        .into_iter()
        .flatten()
        .collect();

    Ok(LookupMatch { lookup, filter })
}

/// `field[,field...][,{project}name={op}arg,...]`.
pub(super) fn parse_group(raw: &str) -> DocumentStoreResult<GroupSpec> {
    let items = raw.split(',').map(str::trim).collect::<Vec<_>>();
    let project_at = items.iter().position(|item| item.starts_with("{project}"));

    let (fields, computed) = match project_at {
        Some(index) => {
            let computed = items[index..]
                .iter()
                .enumerate()
                .map(|(offset, item)| match offset {
                    0 => item.trim_start_matches("{project}"),
                    _ => *item,
                })
                .collect::<Vec<_>>()
                .join(",");
            (&items[..index], parse_computed(&computed)?)
        }
        None => (&items[..], Vec::new()),
    };

    let fields = fields
        .iter()
        .filter(|field| !field.is_empty())
        .map(|field| field.to_string())
        .collect::<Vec<_>>();

    if fields.is_empty() {
        return Err(DocumentStoreError::InvalidQuery(format!("group_by `{}` names no field", raw)));
    }

    Ok(GroupSpec { fields, computed, members: project_at.is_some() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{FieldOp, Filter};
    use rstest::rstest;

    #[rstest]
    #[case("name", Some(("name", SortDirection::Asc)))]
    #[case("-name", Some(("name", SortDirection::Desc)))]
    #[case("name,desc", Some(("name", SortDirection::Desc)))]
    #[case("name,-1", Some(("name", SortDirection::Desc)))]
    #[case("name,asc", Some(("name", SortDirection::Asc)))]
    #[case("", None)]
    fn test_parse_sort(#[case] raw: &str, #[case] expected: Option<(&str, SortDirection)>) {
        let expected = expected.map(|(field, direction)| Sort { field: field.into(), direction });

        assert_eq!(parse_sort(raw), expected);
    }

    #[rstest]
    fn test_parse_select_mixes_inclusion_and_exclusion() {
        assert_eq!(parse_select("a, !b,c"), Some(doc! { "a": 1, "b": 0, "c": 1 }));
        assert_eq!(parse_select(""), None);
    }

    #[rstest]
    #[case("total={sum}amount", "total", Bson::Document(doc! { "$sum": "$amount" }))]
    #[case("gross={multiply}price:qty", "gross", Bson::Document(doc! { "$multiply": ["$price", "$qty"] }))]
    #[case("plus={add}price:2", "plus", Bson::Document(doc! { "$add": ["$price", 2_i64] }))]
    #[case("alias=name", "alias", Bson::String("$name".into()))]
    #[case("kind='fixed'", "kind", Bson::String("fixed".into()))]
    fn test_parse_computed(#[case] raw: &str, #[case] name: &str, #[case] expr: Bson) {
        assert_eq!(parse_computed(raw).unwrap(), vec![ComputedField { name: name.into(), expr }]);
    }

    #[rstest]
    #[case("total")]
    #[case("total=")]
    #[case("total={}x")]
    fn test_parse_computed_rejects(#[case] raw: &str) {
        assert!(matches!(parse_computed(raw), Err(DocumentStoreError::InvalidQuery(_))));
    }

    #[rstest]
    fn test_parse_lookups() {
        let lookups = parse_lookups("orders:customer:_id:orders,owner:_id:ownerId:owner:unwind,auto,notes").unwrap();

        assert_eq!(
            lookups,
            vec![
                LookupRequest::Explicit(LookupSpec {
                    from: "orders".into(),
                    foreign_field: "customer".into(),
                    local_field: "_id".into(),
                    as_field: "orders".into(),
                    unwind: false,
                }),
                LookupRequest::Explicit(LookupSpec {
                    from: "owner".into(),
                    foreign_field: "_id".into(),
                    local_field: "ownerId".into(),
                    as_field: "owner".into(),
                    unwind: true,
                }),
                LookupRequest::Auto(None),
                LookupRequest::Auto(Some("notes".into())),
            ]
        );
    }

    #[rstest]
    #[case("orders:customer")]
    #[case("orders:customer:_id")]
    #[case("orders::_id:orders")]
    #[case("orders:customer:_id:orders:sideways")]
    #[case("a:b:c:d:e:f")]
    fn test_invalid_lookup_params(#[case] raw: &str) {
        assert!(matches!(
            parse_lookups(raw),
            Err(DocumentStoreError::InvalidLookupParams(_))
        ));
    }

    #[rstest]
    fn test_parse_lookup_match() {
        let parsed = parse_lookup_match("tags:_id:tagIds:tags;status=active;weight={gte}2").unwrap();

        assert_eq!(parsed.lookup.as_field, "tags");
        assert_eq!(
            parsed.filter,
            vec![
                Filter::eq("status", "active"),
                Filter::cmp("weight", FieldOp::Gte, "2"),
            ]
        );
        assert!(matches!(
            parse_lookup_match("tags:_id:tagIds:tags;status"),
            Err(DocumentStoreError::InvalidLookupParams(_))
        ));
    }

    #[rstest]
    fn test_parse_group_with_project() {
        let group = parse_group("account,{project}total={sum}amount,count={sum}1").unwrap();

        assert_eq!(group.fields, vec!["account".to_string()]);
        assert!(group.members);
        assert_eq!(
            group.computed,
            vec![
                ComputedField { name: "total".into(), expr: Bson::Document(doc! { "$sum": "$amount" }) },
                ComputedField { name: "count".into(), expr: Bson::Document(doc! { "$sum": 1_i64 }) },
            ]
        );
    }

    #[rstest]
    fn test_parse_group_plain() {
        let group = parse_group("account,currency").unwrap();

        assert_eq!(group.fields, vec!["account".to_string(), "currency".to_string()]);
        assert!(!group.members);
        assert!(group.computed.is_empty());
        assert!(parse_group("{project}total={sum}amount").is_err());
    }
}
