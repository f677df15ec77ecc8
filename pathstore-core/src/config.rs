//! Store configuration.

use serde::{Deserialize, Serialize};

use crate::{
    compiler::MAX_PER_PAGE,
    error::DocumentStoreResult,
};

/// Tunables of a [`DocumentStore`](crate::store::DocumentStore).
///
/// Every field has a default, so a partial JSON object is a valid config:
///
/// ```
/// use pathstore_core::config::StoreConfig;
///
/// let config = StoreConfig::from_json(r#"{ "default_per_page": 20 }"#).unwrap();
/// assert_eq!(config.default_per_page, 20);
/// assert_eq!(config.max_per_page, 500);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Page size applied when the caller sends no `per_page` and unbounded
    /// results are not allowed.
    pub default_per_page: u64,
    /// Page size cap. Never above [`MAX_PER_PAGE`].
    pub max_per_page: u64,
    /// Collection receiving one `DataChange` record per applied write.
    pub data_change_collection: String,
    pub persist_data_changes: bool,
    /// First segment of the topic change events are published under.
    pub topic_prefix: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            default_per_page: 100,
            max_per_page: MAX_PER_PAGE,
            data_change_collection: "datachanges".to_string(),
            persist_data_changes: true,
            topic_prefix: "data-changed".to_string(),
        }
    }
}

impl StoreConfig {
    /// Parses a config from JSON, filling absent fields with their defaults.
    pub fn from_json(raw: &str) -> DocumentStoreResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// The effective page size cap.
    pub fn per_page_cap(&self) -> u64 {
        self.max_per_page.clamp(1, MAX_PER_PAGE)
    }
}
