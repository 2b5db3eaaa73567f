//! Configuration types for mview

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::ResourceInfo;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MviewConfig {
    /// REST API configuration
    pub rest: RestConfig,
    /// Permission level configuration
    pub auth: AuthConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Declared entity types (sample schema is served when empty)
    pub resources: Vec<ResourceInfo>,
}

/// REST API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RestConfig {
    /// Host to bind to
    pub host: String,
    /// Port for REST API (default: 8000)
    pub port: u16,
    /// Number of HTTP workers
    pub workers: usize,
    /// Attach hyperlinks to serialized entities
    pub hyperlink_values: bool,
    /// Return a lone matching entity without the count/data wrapper
    pub return_singles: bool,
    /// CORS allowed origins
    pub cors_origins: Vec<String>,
    /// Maximum accepted request body size
    pub max_body_bytes: usize,
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            workers: 4,
            hyperlink_values: true,
            return_singles: true,
            cors_origins: vec!["*".to_string()],
            max_body_bytes: 2 * 1024 * 1024,
        }
    }
}

/// Permission level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Level name to numeric level
    pub levels: HashMap<String, i64>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Emit JSON log lines
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MviewConfig::default();
        assert_eq!(config.rest.port, 8000);
        assert!(config.rest.hyperlink_values);
        assert!(config.rest.return_singles);
        assert!(config.resources.is_empty());
    }

    #[test]
    fn test_config_serialization() {
        let config = MviewConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: MviewConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config.rest.port, parsed.rest.port);
        assert_eq!(config.logging.level, parsed.logging.level);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let parsed: MviewConfig =
            serde_json::from_value(serde_json::json!({"rest": {"return_singles": false}})).unwrap();
        assert!(!parsed.rest.return_singles);
        assert_eq!(parsed.rest.port, 8000);
    }
}
