// Configuration Management
//
// This crate handles configuration loading for the gateway:
// - Configuration structs and deserialization
// - File loading logic with environment overrides
// - Validation of model mappings and fallback graphs
//
// It has no dependency on the provider adapters; the services crate turns
// these plain values into adapters and a router.

use std::path::Path;
use thiserror::Error;

pub mod types;

// Re-export all configuration types
pub use types::*;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found. Tried paths: {paths}")]
    FileNotFound { paths: String },

    #[error("Failed to read configuration file: {source}")]
    IoError {
        #[from]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration: {source}")]
    ParseError {
        #[from]
        source: serde_yaml::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Model alias '{0}' is mapped more than once")]
    DuplicateAlias(String),

    #[error("Model alias '{alias}' references unknown provider '{provider}'")]
    UnknownProvider { alias: String, provider: String },

    #[error("Invalid fallback configuration for '{primary}': {reason}")]
    InvalidFallback { primary: String, reason: String },

    #[error("Environment variable {key} has invalid value '{value}'")]
    InvalidEnv { key: String, value: String },

    #[error("API key for provider '{provider}' not found in environment variable {env}")]
    MissingApiKey { provider: String, env: String },
}

/// Main configuration loading interface
impl GatewayConfig {
    /// Parse YAML, apply overrides from `lookup` and validate
    pub fn from_yaml_str<F>(content: &str, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config: GatewayConfig = serde_yaml::from_str(content)?;
        config.apply_env(lookup)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from YAML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content, |key| std::env::var(key).ok())
    }

    /// Load configuration from default locations
    pub fn load() -> Result<Self, ConfigError> {
        // Try different config locations in order
        let config_paths = ["config/gateway.yaml", "gateway.yaml", "config/default.yaml"];

        for path in &config_paths {
            if Path::new(path).exists() {
                return Self::load_from_file(path);
            }
        }

        Err(ConfigError::FileNotFound {
            paths: config_paths.join(", "),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
logging:
  level: info
  format: compact
  modules:
    inference_providers: debug
http:
  request_timeout_seconds: 60
providers:
  openai-main:
    provider: openai
    api_key: sk-test
  anthropic-main:
    provider: anthropic
    api_key_env: ANTHROPIC_API_KEY
models:
  - alias: smart
    provider: openai-main
    provider_model: gpt-4o
    default_for: [chat]
  - alias: claude
    provider: anthropic-main
    provider_model: claude-3-5-sonnet-20241022
    capabilities:
      vision: false
  - alias: embed
    provider: openai-main
    provider_model: text-embedding-3-small
    enabled: false
    default_for: [embeddings]
fallbacks:
  - primary: smart
    fallbacks: [claude]
"#;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    // ==================== Loading Tests ====================

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let content = SAMPLE.replace("api_key_env: ANTHROPIC_API_KEY", "api_key: sk-ant-x");
        file.write_all(content.as_bytes()).unwrap();

        let config = GatewayConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.models.len(), 3);
        assert_eq!(config.http.request_timeout_seconds, 60);
        assert_eq!(config.http.connect_timeout_seconds, 30);
        assert_eq!(config.providers["anthropic-main"].api_key, "sk-ant-x");
        assert_eq!(config.fallbacks_for("smart"), ["claude"]);
    }

    #[test]
    fn test_parse_mapping_fields() {
        let config = GatewayConfig::from_yaml_str(SAMPLE, |key| {
            (key == "ANTHROPIC_API_KEY").then(|| "sk-ant-env".to_string())
        })
        .unwrap();

        let smart = config.mapping("smart").unwrap();
        assert!(smart.enabled);
        assert_eq!(smart.default_for, vec![Capability::Chat]);

        let claude = config.mapping("claude").unwrap();
        assert_eq!(claude.capabilities.vision, Some(false));
        assert_eq!(claude.capabilities.streaming, None);

        assert!(!config.mapping("embed").unwrap().enabled);
        assert_eq!(config.providers["anthropic-main"].api_key, "sk-ant-env");
        assert_eq!(config.logging.format, "compact");
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = GatewayConfig::load_from_file(dir.path().join("absent.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::IoError { .. }));
    }

    #[test]
    fn test_malformed_yaml_is_parse_error() {
        let err = GatewayConfig::from_yaml_str("models: [alias: {", no_env).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn test_cycle_rejected_at_load() {
        let yaml = r#"
providers:
  main: { provider: openai, api_key: sk-test }
models:
  - { alias: a, provider: main, provider_model: m1 }
  - { alias: b, provider: main, provider_model: m2 }
fallbacks:
  - { primary: a, fallbacks: [b] }
  - { primary: b, fallbacks: [a] }
"#;
        let err = GatewayConfig::from_yaml_str(yaml, no_env).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidFallback { .. }));
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = GatewayConfig::from_yaml_str("{}", no_env).unwrap();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, "pretty");
        assert!(config.models.is_empty());
    }
}
