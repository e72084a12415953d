use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::capabilities::{HttpError, KvError, RetryConfig, StorageKeys, TemplateUrl};
use crate::{DEFAULT_STORAGE_PREFIX, DEFAULT_TEMPLATE_URL, MAX_HISTORY_SIZE};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid storage prefix: {0}")]
    StoragePrefix(#[from] KvError),

    #[error("invalid template URL: {0}")]
    TemplateUrl(#[from] HttpError),

    #[error("invalid configuration: {0}")]
    Validation(String),
}

/// Host-supplied settings for a [`crate::Planner`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Every persisted key is `<storage_prefix>_<slice>`.
    pub storage_prefix: String,
    pub template_url: String,
    pub retry: RetryConfig,
    pub history_limit: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            storage_prefix: DEFAULT_STORAGE_PREFIX.to_string(),
            template_url: DEFAULT_TEMPLATE_URL.to_string(),
            retry: RetryConfig::default(),
            history_limit: MAX_HISTORY_SIZE,
        }
    }
}

impl PlannerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.storage_keys()?;
        self.parsed_template_url()?;
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Validation("retry.max_attempts must be > 0".into()));
        }
        if self.history_limit == 0 {
            return Err(ConfigError::Validation("history_limit must be > 0".into()));
        }
        Ok(())
    }

    pub fn storage_keys(&self) -> Result<StorageKeys, ConfigError> {
        Ok(StorageKeys::new(&self.storage_prefix)?)
    }

    pub fn parsed_template_url(&self) -> Result<TemplateUrl, ConfigError> {
        Ok(TemplateUrl::parse(&self.template_url)?)
    }

    /// Reads a JSON config; absent fields take their defaults.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(raw).map_err(|e| ConfigError::Validation(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}
