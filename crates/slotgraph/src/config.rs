//! Engine configuration.

use serde::{Deserialize, Serialize};

/// Tunables for one evaluation context.
///
/// Every field has a default, so a partial JSON object is a valid config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum nesting of chained / conditional action firing per dispatch.
    pub max_trigger_depth: usize,
    /// Longest dependency path one read may freshen. Exceeding it is
    /// recorded like a cycle; the slot falls back to its last known value
    /// and it and its readers stay non-Fresh.
    pub max_evaluation_depth: usize,
    /// Record essential writes, structural changes and fired actions.
    pub record_ledger: bool,
    /// Record value changes for `why_did_change` queries.
    pub track_changes: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_trigger_depth: 64,
            max_evaluation_depth: 4096,
            record_ledger: false,
            track_changes: false,
        }
    }
}

impl EngineConfig {
    /// Config with ledger and change tracking turned on.
    pub fn debugging() -> Self {
        Self {
            record_ledger: true,
            track_changes: true,
            ..Self::default()
        }
    }

    #[cfg(feature = "json")]
    pub fn from_json(json: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    #[cfg(feature = "json")]
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debugging_enables_recording() {
        let config = EngineConfig::debugging();
        assert!(config.record_ledger);
        assert!(config.track_changes);
        assert_eq!(config.max_trigger_depth, EngineConfig::default().max_trigger_depth);
    }

    #[cfg(feature = "json")]
    #[test]
    fn partial_json_uses_defaults() {
        let config = EngineConfig::from_json(r#"{ "max_trigger_depth": 3 }"#).unwrap();
        assert_eq!(config.max_trigger_depth, 3);
        assert_eq!(config.max_evaluation_depth, 4096);
        assert!(!config.record_ledger);
    }
}
