use serde::{Deserialize, Serialize};

/// Session-wide knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Run override reconciliation after every propagation batch.
    pub reconcile_after_propagation: bool,
    /// Check the forest invariant of every touched document after each
    /// top-level operation.
    pub validate_after_mutation: bool,
    /// Record missing instance parts as user-deleted when a document is
    /// loaded.
    pub finalize_on_load: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reconcile_after_propagation: true,
            validate_after_mutation: cfg!(debug_assertions),
            finalize_on_load: true,
        }
    }
}

impl SessionConfig {
    pub fn from_json_str(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}
