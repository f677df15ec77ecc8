//! Ordered patches and their translation into native update commands.
//!
//! A [`Patch`] targets one JSON pointer inside a document. Before a patch list
//! reaches the backend it is normalized:
//!
//! - paths are rebased so they are absolute from the document root,
//! - the last whole-document patch (path `/`) replaces everything issued before it
//!   and is expanded into per-leaf `replace` patches,
//! - the resulting list is folded into a single `$set`/`$unset`/`$push` command.

use bson::{Bson, Document, doc};
use serde::{Deserialize, Serialize};

use crate::{
    error::{DocumentStoreError, DocumentStoreResult},
    path,
};

/// Patch operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    Replace,
    Add,
    Remove,
}

/// One operation against one JSON pointer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    pub op: PatchOp,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Bson>,
}

impl Patch {
    pub fn replace(path: impl Into<String>, value: impl Into<Bson>) -> Self {
        Self { op: PatchOp::Replace, path: path.into(), value: Some(value.into()) }
    }

    pub fn add(path: impl Into<String>, value: impl Into<Bson>) -> Self {
        Self { op: PatchOp::Add, path: path.into(), value: Some(value.into()) }
    }

    pub fn remove(path: impl Into<String>) -> Self {
        Self { op: PatchOp::Remove, path: path.into(), value: None }
    }

    /// Whether the patch targets the root of whatever it was issued against.
    pub fn is_root(&self) -> bool {
        self.path.is_empty() || self.path == "/"
    }

    /// Returns the patch with its path prefixed by `base`.
    pub fn rebased(&self, base: &str) -> Self {
        Self { path: path::join(base, &self.path), ..self.clone() }
    }

    /// Whether the value is an object or array that [`leaves`] would split.
    pub fn is_composite(&self) -> bool {
        matches!(&self.value, Some(Bson::Document(doc)) if !doc.is_empty())
            || matches!(&self.value, Some(Bson::Array(items)) if !items.is_empty())
    }
}

/// Flattens a value into one patch per leaf, in key traversal order.
///
/// Empty objects and arrays are kept as a single patch so they still clear the
/// target field.
pub fn leaves(op: PatchOp, at: &str, value: &Bson) -> Vec<Patch> {
    let mut out = Vec::new();
    collect_leaves(op, at, value, &mut out);
    out
}

fn collect_leaves(op: PatchOp, at: &str, value: &Bson, out: &mut Vec<Patch>) {
    match value {
        Bson::Document(doc) if !doc.is_empty() => {
            for (key, child) in doc {
                collect_leaves(op, &path::push(at, key), child, out);
            }
        }
        Bson::Array(items) if !items.is_empty() => {
            for (index, child) in items.iter().enumerate() {
                collect_leaves(op, &path::push(at, &index.to_string()), child, out);
            }
        }
        _ => out.push(Patch { op, path: at.to_string(), value: Some(value.clone()) }),
    }
}

/// Expands a composite patch into leaf patches, keeping its op. Removals and
/// scalar patches are returned unchanged.
pub fn expand(patch: &Patch) -> Vec<Patch> {
    match (&patch.op, &patch.value) {
        (PatchOp::Remove, _) | (_, None) => vec![patch.clone()],
        (op, Some(value)) => leaves(*op, &patch.path, value),
    }
}

/// Rebases patches issued against `pointer` so they are absolute from the
/// document root, then resolves whole-target patches.
///
/// Only the last patch addressed at `/` survives, along with every patch after
/// it; that patch is expanded into `replace` leaves under `pointer`. The
/// top-level `_id` of a whole-document replacement is never patched.
///
/// # Errors
///
/// Returns [`DocumentStoreError::InvalidPatch`] when the whole-target patch is a
/// removal or carries no value.
pub fn normalize(pointer: &str, patches: Vec<Patch>) -> DocumentStoreResult<Vec<Patch>> {
    let last_root = patches.iter().rposition(Patch::is_root);

    let (head, tail) = match last_root {
        Some(index) => {
            let mut patches = patches;
            let tail = patches.split_off(index + 1);
            let root = patches
                .pop()
                .ok_or_else(|| DocumentStoreError::InvalidPatch("missing root patch".into()))?;
            (Some(root), tail)
        }
        None => (None, patches),
    };

    let mut normalized = Vec::with_capacity(tail.len());

    if let Some(root) = head {
        let value = match (root.op, root.value) {
            (PatchOp::Remove, _) => {
                return Err(DocumentStoreError::InvalidPatch(
                    "cannot remove the patch target itself".into(),
                ));
            }
            (_, None) => {
                return Err(DocumentStoreError::InvalidPatch(
                    "whole-target patch requires a value".into(),
                ));
            }
            (_, Some(value)) => value,
        };

        let value = match (pointer, value) {
            ("/", Bson::Document(mut doc)) => {
                doc.remove("_id");
                Bson::Document(doc)
            }
            ("/", _) => {
                return Err(DocumentStoreError::InvalidPatch(
                    "whole-document patch requires an object value".into(),
                ));
            }
            (_, value) => value,
        };

        normalized.extend(leaves(PatchOp::Replace, pointer, &value));
    }

    normalized.extend(tail.iter().map(|patch| patch.rebased(pointer)));

    Ok(normalized)
}

/// Folds an ordered patch list into one atomic update command.
///
/// Later patches win over earlier ones touching the same field. An `add` whose
/// last segment is `-` appends to the parent array.
///
/// # Errors
///
/// Returns [`DocumentStoreError::InvalidPatch`] for patches still addressed at
/// the root or missing their value.
pub fn to_update(patches: &[Patch]) -> DocumentStoreResult<Document> {
    let mut set = Document::new();
    let mut unset = Document::new();
    let mut push = Document::new();

    for patch in patches {
        if patch.is_root() {
            return Err(DocumentStoreError::InvalidPatch(
                "root patches must be normalized before translation".into(),
            ));
        }

        let dotted = path::to_dotted(&patch.path);

        match patch.op {
            PatchOp::Remove => {
                set.remove(&dotted);
                unset.insert(dotted, "");
            }
            PatchOp::Add if dotted == "-" || dotted.ends_with(".-") => {
                let target = dotted
                    .strip_suffix('-')
                    .unwrap_or(&dotted)
                    .trim_end_matches('.')
                    .to_string();
                let value = required_value(patch)?;

                match push.get_mut(&target) {
                    Some(Bson::Document(each)) => {
                        if let Some(Bson::Array(items)) = each.get_mut("$each") {
                            items.push(value);
                        }
                    }
                    _ => {
                        push.insert(target, doc! { "$each": [value] });
                    }
                }
            }
            PatchOp::Replace | PatchOp::Add => {
                let value = required_value(patch)?;
                unset.remove(&dotted);
                set.insert(dotted, value);
            }
        }
    }

    let mut update = Document::new();
    if !set.is_empty() {
        update.insert("$set", set);
    }
    if !unset.is_empty() {
        update.insert("$unset", unset);
    }
    if !push.is_empty() {
        update.insert("$push", push);
    }

    Ok(update)
}

fn required_value(patch: &Patch) -> DocumentStoreResult<Bson> {
    patch
        .value
        .clone()
        .ok_or_else(|| DocumentStoreError::InvalidPatch(format!("{} requires a value", patch.path)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::bson;
    use rstest::rstest;

    #[rstest]
    fn test_root_patch_expands_to_leaves_in_key_order() {
        let patches = vec![Patch::replace("/", bson!({ "a": 1, "b": { "c": 2 } }))];

        let normalized = normalize("/", patches).unwrap();

        assert_eq!(
            normalized,
            vec![Patch::replace("/a", 1), Patch::replace("/b/c", 2)]
        );
    }

    #[rstest]
    fn test_only_last_root_patch_survives_with_trailing_patches() {
        let patches = vec![
            Patch::replace("/x", 9),
            Patch::replace("/", bson!({ "a": 1 })),
            Patch::replace("/y", 3),
            Patch::replace("/", bson!({ "b": [true, false] })),
            Patch::remove("/z"),
        ];

        let normalized = normalize("/", patches).unwrap();

        assert_eq!(
            normalized,
            vec![
                Patch::replace("/b/0", true),
                Patch::replace("/b/1", false),
                Patch::remove("/z"),
            ]
        );
    }

    #[rstest]
    fn test_patches_are_rebased_on_pointer() {
        let patches = vec![Patch::replace("/", bson!({ "c": 1 })), Patch::add("/d", "x")];

        let normalized = normalize("/sub", patches).unwrap();

        assert_eq!(
            normalized,
            vec![Patch::replace("/sub/c", 1), Patch::add("/sub/d", "x")]
        );
    }

    #[rstest]
    fn test_whole_document_replacement_skips_id() {
        let normalized = normalize("/", vec![Patch::replace("/", bson!({ "_id": 1, "a": 2 }))]).unwrap();

        assert_eq!(normalized, vec![Patch::replace("/a", 2)]);
    }

    #[rstest]
    #[case(Patch::remove("/"))]
    #[case(Patch::replace("/", 5))]
    fn test_invalid_root_patches(#[case] patch: Patch) {
        assert!(matches!(
            normalize("/", vec![patch]),
            Err(DocumentStoreError::InvalidPatch(_))
        ));
    }

    #[rstest]
    fn test_empty_composites_are_kept_as_leaves() {
        assert_eq!(
            leaves(PatchOp::Replace, "/tags", &bson!([])),
            vec![Patch::replace("/tags", bson!([]))]
        );
    }

    #[rstest]
    fn test_expand_keeps_op_and_skips_removals() {
        let patch = Patch::add("/p", bson!({ "q": 1 }));

        assert_eq!(expand(&patch), vec![Patch::add("/p/q", 1)]);
        assert_eq!(expand(&Patch::remove("/p")), vec![Patch::remove("/p")]);
    }

    #[rstest]
    fn test_update_command_merges_operations() {
        let patches = vec![
            Patch::replace("/a", 1),
            Patch::remove("/b/c"),
            Patch::add("/tags/-", "x"),
            Patch::add("/tags/-", "y"),
            Patch::remove("/a"),
            Patch::replace("/b/c", 5),
        ];

        let update = to_update(&patches).unwrap();

        assert_eq!(
            update,
            doc! {
                "$set": { "b.c": 5 },
                "$unset": { "a": "" },
                "$push": { "tags": { "$each": ["x", "y"] } },
            }
        );
    }

    #[rstest]
    fn test_update_rejects_unnormalized_root() {
        assert!(to_update(&[Patch::replace("/", bson!({}))]).is_err());
    }

    #[rstest]
    fn test_patch_wire_shape() {
        let json = serde_json::to_value(Patch::remove("/a")).unwrap();

        assert_eq!(json, serde_json::json!({ "op": "remove", "path": "/a" }));
    }
}
