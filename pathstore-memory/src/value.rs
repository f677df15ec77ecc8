//! BSON ordering and dotted-path access.

use std::cmp::Ordering;

use bson::{Bson, Document};

use pathstore_core::error::{DocumentStoreError, DocumentStoreResult};

/// Wrapper giving BSON values MongoDB's cross-type ordering: values of
/// different types compare by type rank, numbers compare across widths.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Comparable<'a>(pub &'a Bson);

impl Comparable<'_> {
    fn rank(&self) -> u8 {
        match self.0 {
            Bson::MinKey => 0,
            Bson::Null | Bson::Undefined => 1,
            Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) => 2,
            Bson::String(_) | Bson::Symbol(_) => 3,
            Bson::Document(_) => 4,
            Bson::Array(_) => 5,
            Bson::Binary(_) => 6,
            Bson::ObjectId(_) => 7,
            Bson::Boolean(_) => 8,
            Bson::DateTime(_) => 9,
            Bson::Timestamp(_) => 10,
            Bson::RegularExpression(_) => 11,
            Bson::MaxKey => 13,
            _ => 12,
        }
    }

    /// Whether both values are in the same comparison bracket.
    pub fn same_bracket(&self, other: &Comparable<'_>) -> bool {
        self.rank() == other.rank()
    }
}

impl PartialEq for Comparable<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Comparable<'_> {}

impl PartialOrd for Comparable<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Comparable<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        let by_rank = self.rank().cmp(&other.rank());
        if by_rank != Ordering::Equal {
            return by_rank;
        }

        match (self.0, other.0) {
            (Bson::String(a), Bson::String(b)) => a.cmp(b),
            (Bson::Boolean(a), Bson::Boolean(b)) => a.cmp(b),
            (Bson::DateTime(a), Bson::DateTime(b)) => a.cmp(b),
            (Bson::ObjectId(a), Bson::ObjectId(b)) => a.cmp(b),
            (Bson::Array(a), Bson::Array(b)) => a
                .iter()
                .map(Comparable)
                .cmp(b.iter().map(Comparable)),
            (Bson::Document(a), Bson::Document(b)) => a
                .iter()
                .map(|(key, value)| (key.as_str(), Comparable(value)))
                .cmp(b.iter().map(|(key, value)| (key.as_str(), Comparable(value)))),
            (a, b) => match (as_f64(a), as_f64(b)) {
                (Some(a), Some(b)) => a.total_cmp(&b),
                _ => a.to_string().cmp(&b.to_string()),
            },
        }
    }
}

pub(crate) fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(value) => Some(f64::from(*value)),
        Bson::Int64(value) => Some(*value as f64),
        Bson::Double(value) => Some(*value),
        _ => None,
    }
}

pub(crate) fn equals(a: &Bson, b: &Bson) -> bool {
    Comparable(a) == Comparable(b)
}

pub(crate) fn compare(a: &Bson, b: &Bson) -> Ordering {
    Comparable(a).cmp(&Comparable(b))
}

/// Resolves a dotted path. Numeric segments index into arrays.
pub(crate) fn get_path<'a>(document: &'a Document, dotted: &str) -> Option<&'a Bson> {
    let mut segments = dotted.split('.');
    let mut current = document.get(segments.next()?)?;

    for segment in segments {
        current = match current {
            Bson::Document(inner) => inner.get(segment)?,
            Bson::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(current)
}

fn get_path_mut<'a>(document: &'a mut Document, dotted: &str) -> Option<&'a mut Bson> {
    let mut segments = dotted.split('.');
    let mut current = document.get_mut(segments.next()?)?;

    for segment in segments {
        current = match current {
            Bson::Document(inner) => inner.get_mut(segment)?,
            Bson::Array(items) => items.get_mut(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(current)
}

/// Values a query condition on `dotted` is tested against.
///
/// Arrays met along the path are traversed element-wise; an array at the end
/// of the path contributes itself and each of its elements.
pub(crate) fn candidates<'a>(document: &'a Document, dotted: &str) -> Vec<&'a Bson> {
    let mut out = Vec::new();

    for value in values_at(document, dotted) {
        out.push(value);
        if let Bson::Array(items) = value {
            out.extend(items.iter());
        }
    }

    out
}

/// Values found at `dotted`, traversing arrays met along the path but not
/// one found at its end.
pub(crate) fn values_at<'a>(document: &'a Document, dotted: &str) -> Vec<&'a Bson> {
    let segments = dotted.split('.').collect::<Vec<_>>();
    let mut out = Vec::new();

    if let Some(first) = document.get(segments[0]) {
        collect(first, &segments[1..], &mut out);
    }

    out
}

fn collect<'a>(current: &'a Bson, segments: &[&str], out: &mut Vec<&'a Bson>) {
    let Some((segment, rest)) = segments.split_first() else {
        out.push(current);
        return;
    };

    match current {
        Bson::Document(inner) => {
            if let Some(next) = inner.get(*segment) {
                collect(next, rest, out);
            }
        }
        Bson::Array(items) => match segment.parse::<usize>() {
            Ok(index) => {
                if let Some(next) = items.get(index) {
                    collect(next, rest, out);
                }
            }
            Err(_) => {
                for item in items.iter().filter(|item| matches!(item, Bson::Document(_))) {
                    collect(item, segments, out);
                }
            }
        },
        _ => {}
    }
}

/// Sets the value at a dotted path, creating intermediate documents.
pub(crate) fn set_path(document: &mut Document, dotted: &str, value: Bson) -> DocumentStoreResult<()> {
    match dotted.split_once('.') {
        None => {
            document.insert(dotted, value);
            Ok(())
        }
        Some((head, rest)) => {
            if matches!(document.get(head), None | Some(Bson::Null)) {
                document.insert(head, Document::new());
            }
            match document.get_mut(head) {
                Some(child) => set_in(child, dotted, rest, value),
                None => Err(unreachable_path(dotted)),
            }
        }
    }
}

fn set_in(target: &mut Bson, full: &str, dotted: &str, value: Bson) -> DocumentStoreResult<()> {
    match target {
        Bson::Document(inner) => set_path(inner, dotted, value),
        Bson::Array(items) => {
            let (head, rest) = match dotted.split_once('.') {
                Some((head, rest)) => (head, Some(rest)),
                None => (dotted, None),
            };
            let index = head
                .parse::<usize>()
                .map_err(|_| unreachable_path(full))?;

            while items.len() <= index {
                items.push(Bson::Null);
            }

            match rest {
                None => {
                    items[index] = value;
                    Ok(())
                }
                Some(rest) => {
                    if items[index] == Bson::Null {
                        items[index] = Bson::Document(Document::new());
                    }
                    set_in(&mut items[index], full, rest, value)
                }
            }
        }
        _ => Err(unreachable_path(full)),
    }
}

/// Removes the value at a dotted path. Array elements are nulled, not shifted.
pub(crate) fn remove_path(document: &mut Document, dotted: &str) -> Option<Bson> {
    let Some((parent, last)) = dotted.rsplit_once('.') else {
        return document.remove(dotted);
    };

    match get_path_mut(document, parent)? {
        Bson::Document(inner) => inner.remove(last),
        Bson::Array(items) => {
            let slot = items.get_mut(last.parse::<usize>().ok()?)?;
            Some(std::mem::replace(slot, Bson::Null))
        }
        _ => None,
    }
}

/// Appends values to the array at a dotted path, creating it when absent.
pub(crate) fn push_path(document: &mut Document, dotted: &str, values: Vec<Bson>) -> DocumentStoreResult<()> {
    let exists = match get_path(document, dotted) {
        Some(Bson::Array(_)) => true,
        Some(Bson::Null) | None => false,
        Some(_) => {
            return Err(DocumentStoreError::Backend(format!("cannot push to non-array field `{}`", dotted)));
        }
    };

    if !exists {
        return set_path(document, dotted, Bson::Array(values));
    }
    if let Some(Bson::Array(items)) = get_path_mut(document, dotted) {
        items.extend(values);
    }
    Ok(())
}

fn unreachable_path(dotted: &str) -> DocumentStoreError {
    DocumentStoreError::Backend(format!("cannot create field path `{}`", dotted))
}
