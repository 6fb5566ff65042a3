//! Runner configuration
//!
//! A single JSON file holding the preprocessing settings and the generation
//! service endpoint. Every field is optional; a missing file means defaults.

use std::path::Path;

use preprocessing::PreprocessingConfig;
use serde::{Deserialize, Serialize};
use tokio::fs;
use workflow_nodes::ServiceConfig;

/// Full runner configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    #[serde(default)]
    pub preprocessing: PreprocessingConfig,
    #[serde(default)]
    pub service: ServiceConfig,
}

impl AppConfig {
    /// Load configuration from `path`, falling back to defaults if it does not exist
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        if !fs::try_exists(path).await? {
            log::debug!("No configuration at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path).await?;
        let config = serde_json::from_str(&contents).map_err(ConfigError::Parse)?;
        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Apply command-line / environment overrides
    pub fn with_overrides(mut self, service_url: Option<String>, api_key: Option<String>) -> Self {
        if let Some(url) = service_url {
            self.service.base_url = url;
        }
        if api_key.is_some() {
            self.service.api_key = api_key;
        }
        self
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(&dir.path().join("absent.json")).await.unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[tokio::test]
    async fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"service": {"baseUrl": "http://gpu:9000"}, "preprocessing": {"debounce": {"debounceMs": 50}}}"#,
        )
        .unwrap();

        let config = AppConfig::load(&path).await.unwrap();
        assert_eq!(config.service.base_url, "http://gpu:9000");
        assert_eq!(config.service.timeout_ms, 60_000);
        assert_eq!(config.preprocessing.debounce.debounce_ms, 50);
        assert_eq!(config.preprocessing.cache.max_entries, 100);
    }

    #[tokio::test]
    async fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(matches!(
            AppConfig::load(&path).await,
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_overrides() {
        let config = AppConfig::default()
            .with_overrides(Some("http://other:1".into()), None);
        assert_eq!(config.service.base_url, "http://other:1");
        assert_eq!(config.service.api_key, None);
    }
}
