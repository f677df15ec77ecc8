//! Records describing applied mutations.

use bson::{Bson, DateTime, oid::ObjectId};
use serde::{Deserialize, Serialize};

use crate::patch::Patch;

/// Durable record of one applied write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataChange {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    /// Path of the mutated document, `/{collection}/{id}`.
    pub path: String,
    pub date: DateTime,
    /// Date of the previous record for the same path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_change: Option<DateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    pub patches: Vec<Patch>,
}

impl DataChange {
    pub fn new(path: impl Into<String>, patches: Vec<Patch>, user: Option<String>) -> Self {
        Self {
            id: ObjectId::new(),
            path: path.into(),
            date: DateTime::now(),
            last_change: None,
            user,
            patches,
        }
    }
}

/// Event published to the external bus after a write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataChangedEvent {
    pub path: String,
    /// The document after the write; `None` once deleted.
    pub data: Option<Bson>,
    pub patches: Vec<Patch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}
