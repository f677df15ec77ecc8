//! Logical paths and JSON-pointer helpers.
//!
//! A logical path addresses a collection, optionally one document in it, and
//! optionally a field inside that document:
//!
//! ```text
//! /{collection}[/{id}[/{pointer/with/slashes}]]
//! ```
//!
//! Pointers follow JSON Pointer escaping (`~0` for `~`, `~1` for `/`) and are
//! always rooted at `/`.

use std::{fmt, str::FromStr};

use bson::Bson;

use crate::error::{DocumentStoreError, DocumentStoreResult};

/// A parsed logical path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocPath {
    /// Name of the dynamic collection.
    pub collection: String,
    /// Raw (uncoerced) document id.
    pub id: Option<String>,
    /// Pointer into the document, rooted at `/`.
    pub pointer: Option<String>,
}

impl DocPath {
    /// Parses a logical path.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::InvalidPath`] when the path is not rooted, has
    /// no collection or contains empty segments.
    pub fn parse(path: &str) -> DocumentStoreResult<Self> {
        let trimmed = path
            .strip_prefix('/')
            .ok_or_else(|| DocumentStoreError::InvalidPath(path.to_string()))?;
        let trimmed = trimmed.strip_suffix('/').unwrap_or(trimmed);
        let segments = trimmed.split('/').collect::<Vec<_>>();

        if segments.iter().any(|segment| segment.is_empty()) {
            return Err(DocumentStoreError::InvalidPath(path.to_string()));
        }

        Ok(Self {
            collection: segments[0].to_string(),
            id: segments.get(1).map(|id| id.to_string()),
            pointer: (segments.len() > 2).then(|| format!("/{}", segments[2..].join("/"))),
        })
    }

    /// Creates a path addressing a whole document.
    pub fn document(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: Some(id.into()),
            pointer: None,
        }
    }

    /// The path of the addressed document (or collection), without the pointer.
    pub fn base(&self) -> String {
        match &self.id {
            Some(id) => format!("/{}/{}", self.collection, id),
            None => format!("/{}", self.collection),
        }
    }

    /// The pointer, or `/` when the path addresses the whole document.
    pub fn pointer_or_root(&self) -> &str {
        self.pointer.as_deref().unwrap_or("/")
    }

    /// Returns the same path with a different pointer.
    pub fn with_pointer(&self, pointer: Option<String>) -> Self {
        Self {
            pointer: pointer.filter(|p| p != "/"),
            ..self.clone()
        }
    }
}

impl FromStr for DocPath {
    type Err = DocumentStoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DocPath::parse(s)
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.base())?;
        if let Some(pointer) = &self.pointer {
            write!(f, "{}", pointer)?;
        }
        Ok(())
    }
}

/// Escapes a single key for use as a pointer segment.
pub fn escape_segment(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

/// Reverses [`escape_segment`].
pub fn unescape_segment(segment: &str) -> String {
    segment.replace("~1", "/").replace("~0", "~")
}

/// Splits a pointer into unescaped segments. The root pointer has no segments.
pub fn segments(pointer: &str) -> Vec<String> {
    pointer
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(unescape_segment)
        .collect()
}

/// Appends a relative pointer to a base pointer, both rooted at `/`.
pub fn join(base: &str, relative: &str) -> String {
    let base = base.trim_end_matches('/');
    let relative = relative.trim_start_matches('/');

    match (base.is_empty(), relative.is_empty()) {
        (true, true) => "/".to_string(),
        (true, false) => format!("/{}", relative),
        (false, true) => base.to_string(),
        (false, false) => format!("{}/{}", base, relative),
    }
}

/// Appends one raw key to a pointer, escaping it.
pub fn push(base: &str, key: &str) -> String {
    join(base, &escape_segment(key))
}

/// Rebases `path` onto `prefix`, returning the remainder rooted at `/`.
///
/// Returns `None` when `prefix` is not a segment-aligned prefix of `path`.
pub fn strip_prefix(path: &str, prefix: &str) -> Option<String> {
    let prefix = prefix.trim_end_matches('/');
    let rest = path.strip_prefix(prefix)?;

    match rest {
        "" | "/" => Some("/".to_string()),
        rest if rest.starts_with('/') => Some(rest.to_string()),
        _ => None,
    }
}

/// Converts a pointer into a MongoDB dotted field path (`/a/0/b` becomes `a.0.b`).
pub fn to_dotted(pointer: &str) -> String {
    segments(pointer).join(".")
}

/// Converts a MongoDB dotted field path into a pointer.
pub fn from_dotted(dotted: &str) -> String {
    let mut pointer = String::from("/");
    for key in dotted.split('.').filter(|k| !k.is_empty()) {
        pointer = push(&pointer, key);
    }
    pointer
}

/// Resolves a pointer inside a value.
pub fn get<'a>(value: &'a Bson, pointer: &str) -> Option<&'a Bson> {
    segments(pointer)
        .iter()
        .try_fold(value, |current, segment| match current {
            Bson::Document(doc) => doc.get(segment),
            Bson::Array(items) => segment
                .parse::<usize>()
                .ok()
                .and_then(|index| items.get(index)),
            _ => None,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::bson;
    use rstest::rstest;

    #[rstest]
    #[case("/items", "items", None, None)]
    #[case("/items/", "items", None, None)]
    #[case("/items/42", "items", Some("42"), None)]
    #[case("/items/42/tags/0", "items", Some("42"), Some("/tags/0"))]
    fn test_parse_path(
        #[case] input: &str,
        #[case] collection: &str,
        #[case] id: Option<&str>,
        #[case] pointer: Option<&str>,
    ) {
        let path = DocPath::parse(input).unwrap();

        assert_eq!(path.collection, collection);
        assert_eq!(path.id.as_deref(), id);
        assert_eq!(path.pointer.as_deref(), pointer);
    }

    #[rstest]
    #[case("")]
    #[case("items")]
    #[case("/")]
    #[case("/items//x")]
    fn test_parse_invalid_path(#[case] input: &str) {
        assert!(matches!(
            DocPath::parse(input),
            Err(DocumentStoreError::InvalidPath(_))
        ));
    }

    #[rstest]
    fn test_display_round_trips() {
        let path = DocPath::parse("/items/42/a/b").unwrap();

        assert_eq!(path.to_string(), "/items/42/a/b");
        assert_eq!(path.base(), "/items/42");
    }

    #[rstest]
    #[case("/", "/", "/")]
    #[case("/a", "/", "/a")]
    #[case("/", "/b/c", "/b/c")]
    #[case("/a/", "/b", "/a/b")]
    fn test_join(#[case] base: &str, #[case] relative: &str, #[case] expected: &str) {
        assert_eq!(join(base, relative), expected);
    }

    #[rstest]
    #[case("/items/1/a", "/items/1", Some("/a"))]
    #[case("/items/1", "/items/1", Some("/"))]
    #[case("/items/10/a", "/items/1", None)]
    #[case("/other/1/a", "/items/1", None)]
    fn test_strip_prefix(#[case] path: &str, #[case] prefix: &str, #[case] expected: Option<&str>) {
        assert_eq!(strip_prefix(path, prefix).as_deref(), expected);
    }

    #[rstest]
    fn test_escaped_segments_convert_to_dotted() {
        assert_eq!(to_dotted("/a~1b/c~0d/0"), "a/b.c~d.0");
        assert_eq!(from_dotted("a.b"), "/a/b");
    }

    #[rstest]
    fn test_get_resolves_nested_values() {
        let value = bson!({ "a": { "b": [10, 20] } });

        assert_eq!(get(&value, "/a/b/1"), Some(&Bson::Int32(20)));
        assert_eq!(get(&value, "/"), Some(&value));
        assert_eq!(get(&value, "/a/c"), None);
    }
}
