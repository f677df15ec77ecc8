//! Application of `$set` / `$unset` / `$push` update commands.

use bson::{Bson, Document};

use pathstore_core::error::{DocumentStoreError, DocumentStoreResult};

use crate::value::{push_path, remove_path, set_path};

/// Applies `update` to `document`, returning whether anything changed.
///
/// The document is left untouched when the update fails.
pub(crate) fn apply(document: &mut Document, update: &Document) -> DocumentStoreResult<bool> {
    let mut updated = document.clone();

    for (operator, fields) in update {
        let Bson::Document(fields) = fields else {
            return Err(DocumentStoreError::Backend(format!("`{}` expects a document", operator)));
        };

        match operator.as_str() {
            "$set" => {
                for (field, value) in fields {
                    if field == "_id" {
                        return Err(DocumentStoreError::Backend("`_id` is immutable".into()));
                    }
                    set_path(&mut updated, field, value.clone())?;
                }
            }
            "$unset" => {
                for field in fields.keys() {
                    remove_path(&mut updated, field);
                }
            }
            "$push" => {
                for (field, value) in fields {
                    let values = match value {
                        Bson::Document(modifiers) if modifiers.contains_key("$each") => match modifiers.get("$each") {
                            Some(Bson::Array(each)) => each.clone(),
                            _ => {
                                return Err(DocumentStoreError::Backend("`$each` expects an array".into()));
                            }
                        },
                        value => vec![value.clone()],
                    };
                    push_path(&mut updated, field, values)?;
                }
            }
            other => {
                return Err(DocumentStoreError::Backend(format!("unsupported update operator `{}`", other)));
            }
        }
    }

    let changed = updated != *document;
    *document = updated;

    Ok(changed)
}
