//! Messages sent to HMR clients.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpdateKind {
    JsUpdate,
    CssUpdate,
}

/// One module the client should re-import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HmrUpdate {
    #[serde(rename = "type")]
    pub kind: UpdateKind,
    /// The boundary module.
    pub path: String,
    /// The changed module the boundary accepts (itself when self accepting).
    pub accepted_path: String,
    pub timestamp: u64,
    pub is_within_circular_import: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum HmrPayload {
    Update {
        updates: Vec<HmrUpdate>,
    },
    #[serde(rename_all = "camelCase")]
    FullReload {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        triggered_by: Option<String>,
    },
    /// Modules that lost their last importer; clients drop their state.
    Prune {
        paths: Vec<String>,
    },
}
