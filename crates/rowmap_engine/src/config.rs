//! Template configuration

use serde::{Deserialize, Serialize};

use rowmap_core::{StoreError, TimestampBound};

/// Defaults applied when a call's options leave a setting unset.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateConfig {
    /// Bound of ambient keyed reads, `count` and read-only transactions.
    pub read_bound: TimestampBound,
    /// Bound of ambient queries.
    pub query_bound: TimestampBound,
    /// Tolerate columns missing from every row, not only from restricted reads.
    pub allow_partial_read: bool,
}

impl TemplateConfig {
    pub fn from_json_str(json: &str) -> Result<Self, StoreError> {
        serde_json::from_str(json).map_err(|e| StoreError::InvalidArgument(format!("template config: {e}")))
    }
}
