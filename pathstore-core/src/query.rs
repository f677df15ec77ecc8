//! Filter expression tree and its MongoDB rendering.
//!
//! The query compiler produces [`Expr`] clauses; [`FilterRenderer`] walks them
//! with the [`QueryVisitor`] pattern and emits the MongoDB-compatible filter
//! documents (`$and`, `$or`, `$gte`, `$in`, `$elemMatch`, ...) that backends
//! execute verbatim.
//!
//! ```ignore
//! use pathstore_core::query::{Filter, FieldOp, FilterRenderer};
//!
//! let expr = Filter::and([
//!     Filter::cmp("age", FieldOp::Gte, 18),
//!     Filter::exists("email", true),
//! ]);
//! let document = FilterRenderer.render(&expr);
//! ```

use bson::{Bson, Document, doc};

/// Sort direction for query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

/// Sort specification: one field and a direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sort {
    pub field: String,
    pub direction: SortDirection,
}

impl Sort {
    pub fn to_document(&self) -> Document {
        doc! {
            self.field.clone(): match self.direction {
                SortDirection::Asc => 1,
                SortDirection::Desc => -1,
            }
        }
    }
}

/// Field comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    /// Value is one of a list.
    In,
    /// Value is none of a list.
    Nin,
    /// Array field contains every listed value.
    All,
}

impl FieldOp {
    fn operator(&self) -> &'static str {
        match self {
            FieldOp::Eq => "$eq",
            FieldOp::Ne => "$ne",
            FieldOp::Gt => "$gt",
            FieldOp::Gte => "$gte",
            FieldOp::Lt => "$lt",
            FieldOp::Lte => "$lte",
            FieldOp::In => "$in",
            FieldOp::Nin => "$nin",
            FieldOp::All => "$all",
        }
    }
}

/// A filter expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// All expressions must match.
    And(Vec<Expr>),
    /// Any expression must match.
    Or(Vec<Expr>),
    /// Field presence test.
    Exists(String, bool),
    /// Field comparison.
    Field {
        field: String,
        op: FieldOp,
        value: Bson,
    },
    /// Regular expression match.
    Regex {
        field: String,
        pattern: String,
        options: String,
    },
    /// Element of an array nested `depth` levels deep equals `value`.
    ElemMatch {
        field: String,
        depth: usize,
        value: Bson,
    },
    /// Point lies within a circle of `radius` degrees around `center` (long, lat).
    WithinCenter {
        field: String,
        center: (f64, f64),
        radius: f64,
    },
    /// Inclusive range.
    Range {
        field: String,
        min: Bson,
        max: Bson,
    },
}

/// Helper for constructing filter expressions.
pub struct Filter;

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Filter::cmp(field, FieldOp::Eq, value)
    }

    pub fn cmp(field: impl Into<String>, op: FieldOp, value: impl Into<Bson>) -> Expr {
        Expr::Field { field: field.into(), op, value: value.into() }
    }

    pub fn exists(field: impl Into<String>, should_exist: bool) -> Expr {
        Expr::Exists(field.into(), should_exist)
    }

    /// Case-insensitive regular expression.
    pub fn regex(field: impl Into<String>, pattern: impl Into<String>) -> Expr {
        Expr::Regex { field: field.into(), pattern: pattern.into(), options: "i".into() }
    }

    pub fn range(field: impl Into<String>, min: impl Into<Bson>, max: impl Into<Bson>) -> Expr {
        Expr::Range { field: field.into(), min: min.into(), max: max.into() }
    }

    pub fn elem_match(field: impl Into<String>, depth: usize, value: impl Into<Bson>) -> Expr {
        Expr::ElemMatch { field: field.into(), depth, value: value.into() }
    }

    pub fn within_center(field: impl Into<String>, center: (f64, f64), radius: f64) -> Expr {
        Expr::WithinCenter { field: field.into(), center, radius }
    }

    pub fn and(exprs: impl IntoIterator<Item = Expr>) -> Expr {
        Expr::And(exprs.into_iter().collect())
    }

    pub fn or(exprs: impl IntoIterator<Item = Expr>) -> Expr {
        Expr::Or(exprs.into_iter().collect())
    }
}

pub trait QueryVisitor {
    type Output;

    fn visit_and(&mut self, exprs: &[Expr]) -> Self::Output;
    fn visit_or(&mut self, exprs: &[Expr]) -> Self::Output;
    fn visit_exists(&mut self, field: &str, should_exist: bool) -> Self::Output;
    fn visit_field(&mut self, field: &str, op: &FieldOp, value: &Bson) -> Self::Output;
    fn visit_regex(&mut self, field: &str, pattern: &str, options: &str) -> Self::Output;
    fn visit_elem_match(&mut self, field: &str, depth: usize, value: &Bson) -> Self::Output;
    fn visit_within_center(&mut self, field: &str, center: (f64, f64), radius: f64) -> Self::Output;
    fn visit_range(&mut self, field: &str, min: &Bson, max: &Bson) -> Self::Output;

    fn visit_expr(&mut self, expr: &Expr) -> Self::Output {
        match expr {
            Expr::And(exprs) => self.visit_and(exprs),
            Expr::Or(exprs) => self.visit_or(exprs),
            Expr::Exists(field, should_exist) => self.visit_exists(field, *should_exist),
            Expr::Field { field, op, value } => self.visit_field(field, op, value),
            Expr::Regex { field, pattern, options } => self.visit_regex(field, pattern, options),
            Expr::ElemMatch { field, depth, value } => self.visit_elem_match(field, *depth, value),
            Expr::WithinCenter { field, center, radius } => {
                self.visit_within_center(field, *center, *radius)
            }
            Expr::Range { field, min, max } => self.visit_range(field, min, max),
        }
    }
}

/// Renders expressions as MongoDB filter documents.
pub struct FilterRenderer;

impl FilterRenderer {
    pub fn render(&mut self, expr: &Expr) -> Document {
        self.visit_expr(expr)
    }

    /// Renders an AND-list. An empty list renders as the empty filter, since
    /// MongoDB rejects an empty `$and`.
    pub fn render_all(&mut self, exprs: &[Expr]) -> Document {
        if exprs.is_empty() {
            return Document::new();
        }
        self.visit_and(exprs)
    }
}

impl QueryVisitor for FilterRenderer {
    type Output = Document;

    fn visit_and(&mut self, exprs: &[Expr]) -> Document {
        doc! { "$and": exprs.iter().map(|expr| self.visit_expr(expr)).collect::<Vec<_>>() }
    }

    fn visit_or(&mut self, exprs: &[Expr]) -> Document {
        doc! { "$or": exprs.iter().map(|expr| self.visit_expr(expr)).collect::<Vec<_>>() }
    }

    fn visit_exists(&mut self, field: &str, should_exist: bool) -> Document {
        doc! { field: { "$exists": should_exist } }
    }

    fn visit_field(&mut self, field: &str, op: &FieldOp, value: &Bson) -> Document {
        match op {
            FieldOp::Eq => doc! { field: value.clone() },
            op => doc! { field: { op.operator(): value.clone() } },
        }
    }

    fn visit_regex(&mut self, field: &str, pattern: &str, options: &str) -> Document {
        doc! { field: { "$regex": pattern, "$options": options } }
    }

    fn visit_elem_match(&mut self, field: &str, depth: usize, value: &Bson) -> Document {
        let mut condition = doc! { "$eq": value.clone() };
        for _ in 0..depth.max(1) {
            condition = doc! { "$elemMatch": condition };
        }
        doc! { field: condition }
    }

    fn visit_within_center(&mut self, field: &str, center: (f64, f64), radius: f64) -> Document {
        let (long, lat) = center;
        doc! { field: { "$geoWithin": { "$center": [[long, lat], radius] } } }
    }

    fn visit_range(&mut self, field: &str, min: &Bson, max: &Bson) -> Document {
        doc! { field: { "$gte": min.clone(), "$lte": max.clone() } }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Filter::eq("a", 1), doc! { "a": 1 })]
    #[case(Filter::cmp("a", FieldOp::Gte, 1), doc! { "a": { "$gte": 1 } })]
    #[case(Filter::cmp("a", FieldOp::In, vec![1, 2]), doc! { "a": { "$in": [1, 2] } })]
    #[case(Filter::exists("a", false), doc! { "a": { "$exists": false } })]
    #[case(Filter::regex("a", "^x"), doc! { "a": { "$regex": "^x", "$options": "i" } })]
    #[case(Filter::range("a", 1, 5), doc! { "a": { "$gte": 1, "$lte": 5 } })]
    #[case(
        Filter::elem_match("a", 2, "x"),
        doc! { "a": { "$elemMatch": { "$elemMatch": { "$eq": "x" } } } }
    )]
    #[case(
        Filter::within_center("loc", (1.5, 2.5), 0.1),
        doc! { "loc": { "$geoWithin": { "$center": [[1.5, 2.5], 0.1] } } }
    )]
    fn test_render(#[case] expr: Expr, #[case] expected: Document) {
        assert_eq!(FilterRenderer.render(&expr), expected);
    }

    #[rstest]
    fn test_render_nested_groups() {
        let expr = Filter::and([Filter::or([Filter::eq("a", 1), Filter::eq("b", 2)]), Filter::eq("c", 3)]);

        assert_eq!(
            FilterRenderer.render(&expr),
            doc! { "$and": [{ "$or": [{ "a": 1 }, { "b": 2 }] }, { "c": 3 }] }
        );
    }

    #[rstest]
    fn test_empty_and_list_is_omitted() {
        assert_eq!(FilterRenderer.render_all(&[]), Document::new());
    }

    #[rstest]
    fn test_sort_document() {
        let sort = Sort { field: "name".into(), direction: SortDirection::Desc };

        assert_eq!(sort.to_document(), doc! { "name": -1 });
    }
}
