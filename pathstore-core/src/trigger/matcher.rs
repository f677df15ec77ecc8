use std::collections::HashMap;

/// One pattern matching a path.
#[derive(Debug, Clone, PartialEq)]
pub struct PathMatch<'a, T> {
    pub item: &'a T,
    pub pattern: &'a str,
    /// Values captured by `:name` segments.
    pub params: HashMap<String, String>,
}

/// Route-like pattern matcher.
///
/// Implementations return matches in registration order.
pub trait PathMatcher<T>: Send + Sync {
    fn add(&mut self, pattern: &str, item: T);

    fn matches<'a>(&'a self, path: &str) -> Vec<PathMatch<'a, T>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
    Any,
}

impl Segment {
    fn parse(raw: &str) -> Self {
        match raw {
            "*" => Segment::Any,
            raw => match raw.strip_prefix(':') {
                Some(name) if !name.is_empty() => Segment::Param(name.to_string()),
                _ => Segment::Literal(raw.to_string()),
            },
        }
    }
}

/// Segment-wise matcher with prefix semantics: a pattern matches every path
/// whose leading segments it matches, so `/items/:id` matches `/items/1/a/b`.
///
/// `:name` captures one segment and `*` matches one segment without capturing.
#[derive(Debug)]
pub struct SegmentMatcher<T> {
    routes: Vec<(String, Vec<Segment>, T)>,
}

impl<T> Default for SegmentMatcher<T> {
    fn default() -> Self {
        Self { routes: Vec::new() }
    }
}

impl<T> SegmentMatcher<T> {
    pub fn new() -> Self {
        Self::default()
    }
}

fn split(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|segment| !segment.is_empty())
}

impl<T: Send + Sync> PathMatcher<T> for SegmentMatcher<T> {
    fn add(&mut self, pattern: &str, item: T) {
        let segments = split(pattern).map(Segment::parse).collect();
        self.routes.push((pattern.to_string(), segments, item));
    }

    fn matches<'a>(&'a self, path: &str) -> Vec<PathMatch<'a, T>> {
        let path = split(path).collect::<Vec<_>>();

        self.routes
            .iter()
            .filter(|(_, segments, _)| segments.len() <= path.len())
            .filter_map(|(pattern, segments, item)| {
                let mut params = HashMap::new();

                for (segment, actual) in segments.iter().zip(&path) {
                    match segment {
                        Segment::Literal(literal) if literal != actual => return None,
                        Segment::Param(name) => {
                            params.insert(name.clone(), actual.to_string());
                        }
                        _ => {}
                    }
                }

                Some(PathMatch { item, pattern, params })
            })
            .collect()
    }
}

/// Substitutes captured parameters into a pattern and takes `*` segments from
/// the matched `path`. Segments without a value are kept as written.
pub fn resolve(pattern: &str, params: &HashMap<String, String>, path: &str) -> String {
    let mut actual = split(path);

    let resolved = split(pattern)
        .map(|segment| {
            let concrete = actual.next();
            match segment {
                "*" => concrete.unwrap_or(segment),
                _ => segment
                    .strip_prefix(':')
                    .and_then(|name| params.get(name))
                    .map(String::as_str)
                    .unwrap_or(segment),
            }
        })
        .collect::<Vec<_>>()
        .join("/");

    format!("/{}", resolved)
}
