//! Engine configuration.
//!
//! Every field has a default; a config file only needs the keys it changes.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Label for log lines, e.g. "main" or "worker".
    pub context: String,
    /// Truncate record chains and skip fully shadowed delta bases.
    pub shorten_delta_chains: bool,
    /// Log revisits of already-seen objects at warn instead of debug.
    pub warn_on_revisit: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            context:              "main".to_string(),
            shorten_delta_chains: true,
            warn_on_revisit:      false,
        }
    }
}

impl EngineConfig {
    /// Load from a JSON file.
    /// In tests, use EngineConfig::default_test().
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: EngineConfig = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Cannot parse {path}: {e}"))?;
        Ok(config)
    }

    pub fn default_test() -> Self {
        Self {
            context: "test".to_string(),
            ..Self::default()
        }
    }

    pub fn with_context(mut self, context: &str) -> Self {
        self.context = context.to_string();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{ "context": "worker" }"#).expect("parse");
        assert_eq!(config.context, "worker");
        assert!(config.shorten_delta_chains);
        assert!(!config.warn_on_revisit);
    }

    #[test]
    fn load_reports_missing_file() {
        let err = EngineConfig::load("/definitely/not/here.json").unwrap_err();
        assert!(err.to_string().contains("Cannot read"), "{err}");
    }
}
