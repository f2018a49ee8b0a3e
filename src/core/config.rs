use crate::errors::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Settings of the runner itself, independent of any one automation config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Directory holding persisted download state, one file per state key
    pub state_dir: PathBuf,
    pub log_level: String,
    /// Pause after clicks that change the page (pagination, opening entries)
    pub page_settle_ms: u64,
    pub default_timeout_ms: u64,
    pub user_agent: Option<String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from(".autoflow/state"),
            log_level: "info".to_string(),
            page_settle_ms: 500,
            default_timeout_ms: 30000,
            user_agent: None,
        }
    }
}

impl RunnerConfig {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = tokio::fs::read_to_string(path.as_ref()).await?;
        Ok(serde_json::from_str(&contents)?)
    }

    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = dir.into();
        self
    }

    pub fn with_page_settle_ms(mut self, ms: u64) -> Self {
        self.page_settle_ms = ms;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: RunnerConfig =
            serde_json::from_str(r#"{"state_dir": "/tmp/flows", "page_settle_ms": 0}"#).unwrap();
        assert_eq!(config.state_dir, PathBuf::from("/tmp/flows"));
        assert_eq!(config.page_settle_ms, 0);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.default_timeout_ms, 30000);
    }
}
