use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::ConfigError;

/// Top-level gateway configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub http: HttpConfig,
    /// Named upstream credentials, referenced by model mappings
    #[serde(default)]
    pub providers: HashMap<String, ProviderSettings>,
    #[serde(default)]
    pub models: Vec<ModelProviderMapping>,
    #[serde(default)]
    pub fallbacks: Vec<FallbackConfiguration>,
}

impl GatewayConfig {
    /// Apply environment overrides through `lookup` (normally `std::env::var`)
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        self.logging.apply_env(&lookup);
        self.http.apply_env(&lookup)?;
        for (name, provider) in self.providers.iter_mut() {
            provider.resolve_api_key(name, &lookup)?;
        }
        Ok(())
    }

    /// Reject configurations the router could not serve consistently
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut aliases = HashSet::new();
        for mapping in &self.models {
            if mapping.alias.trim().is_empty() {
                return Err(ConfigError::Invalid("model alias must not be empty".to_string()));
            }
            if !aliases.insert(mapping.alias.as_str()) {
                return Err(ConfigError::DuplicateAlias(mapping.alias.clone()));
            }
            if !self.providers.contains_key(&mapping.provider) {
                return Err(ConfigError::UnknownProvider {
                    alias: mapping.alias.clone(),
                    provider: mapping.provider.clone(),
                });
            }
        }

        validate_fallbacks(&self.fallbacks)
    }

    pub fn mapping(&self, alias: &str) -> Option<&ModelProviderMapping> {
        self.models.iter().find(|m| m.alias == alias)
    }

    pub fn fallbacks_for(&self, alias: &str) -> &[String] {
        self.fallbacks
            .iter()
            .find(|f| f.primary == alias)
            .map(|f| f.fallbacks.as_slice())
            .unwrap_or_default()
    }
}

/// Per-entry checks plus cycle detection across all entries
pub fn validate_fallbacks(fallbacks: &[FallbackConfiguration]) -> Result<(), ConfigError> {
    let mut primaries = HashSet::new();
    for fallback in fallbacks {
        if !primaries.insert(fallback.primary.as_str()) {
            return Err(ConfigError::InvalidFallback {
                primary: fallback.primary.clone(),
                reason: "declared more than once".to_string(),
            });
        }
        fallback.validate()?;
    }
    detect_fallback_cycle(fallbacks)
}

/// Depth-first search over primary -> fallback edges
fn detect_fallback_cycle(fallbacks: &[FallbackConfiguration]) -> Result<(), ConfigError> {
    let edges: HashMap<&str, &[String]> = fallbacks
        .iter()
        .map(|f| (f.primary.as_str(), f.fallbacks.as_slice()))
        .collect();

    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    fn visit<'a>(
        node: &'a str,
        edges: &HashMap<&'a str, &'a [String]>,
        marks: &mut HashMap<&'a str, Mark>,
        path: &mut Vec<&'a str>,
    ) -> Result<(), ConfigError> {
        match marks.get(node) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => {
                let start = path.iter().position(|n| *n == node).unwrap_or(0);
                let mut cycle: Vec<&str> = path[start..].to_vec();
                cycle.push(node);
                return Err(ConfigError::InvalidFallback {
                    primary: path.first().copied().unwrap_or(node).to_string(),
                    reason: format!("fallback cycle {}", cycle.join(" -> ")),
                });
            }
            None => {}
        }

        marks.insert(node, Mark::Visiting);
        path.push(node);
        if let Some(&next) = edges.get(node) {
            for alias in next {
                visit(alias.as_str(), edges, marks, path)?;
            }
        }
        path.pop();
        marks.insert(node, Mark::Done);
        Ok(())
    }

    let mut marks = HashMap::new();
    let mut primaries: Vec<&str> = edges.keys().copied().collect();
    primaries.sort_unstable();
    for primary in primaries {
        visit(primary, &edges, &mut marks, &mut Vec::new())?;
    }
    Ok(())
}

/// Logging Configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `json`, `compact` or `pretty`
    #[serde(default = "default_log_format")]
    pub format: String,
    /// Per-module levels, e.g. `inference_providers: debug`
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl LoggingConfig {
    fn apply_env<F>(&mut self, lookup: &F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(level) = lookup("LOG_LEVEL") {
            self.level = level;
        }
        if let Some(format) = lookup("LOG_FORMAT") {
            self.format = format;
        }
        for (module, var) in [
            ("inference_providers", "LOG_MODULE_INFERENCE_PROVIDERS"),
            ("services", "LOG_MODULE_SERVICES"),
        ] {
            if let Some(level) = lookup(var) {
                self.modules.insert(module.to_string(), level);
            }
        }
    }

    /// Directive string for an `EnvFilter`
    pub fn filter_directive(&self) -> String {
        let mut modules: Vec<_> = self.modules.iter().collect();
        modules.sort();
        let mut filter = self.level.clone();
        for (module, level) in modules {
            filter.push_str(&format!(",{module}={level}"));
        }
        filter
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            modules: HashMap::new(),
        }
    }
}

/// Shared HTTP client settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    #[serde(default = "default_pool_idle_timeout")]
    pub pool_idle_timeout_seconds: u64,
    #[serde(default = "default_pool_max_idle")]
    pub pool_max_idle_per_host: usize,
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_request_timeout() -> u64 {
    120
}

fn default_pool_idle_timeout() -> u64 {
    90
}

fn default_pool_max_idle() -> usize {
    32
}

impl HttpConfig {
    fn apply_env<F>(&mut self, lookup: &F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("HTTP_CONNECT_TIMEOUT_SECONDS") {
            self.connect_timeout_seconds = parse_env("HTTP_CONNECT_TIMEOUT_SECONDS", &value)?;
        }
        if let Some(value) = lookup("HTTP_REQUEST_TIMEOUT_SECONDS") {
            self.request_timeout_seconds = parse_env("HTTP_REQUEST_TIMEOUT_SECONDS", &value)?;
        }
        Ok(())
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_seconds: default_connect_timeout(),
            request_timeout_seconds: default_request_timeout(),
            pool_idle_timeout_seconds: default_pool_idle_timeout(),
            pool_max_idle_per_host: default_pool_max_idle(),
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        key: key.to_string(),
        value: value.to_string(),
    })
}

/// Credentials and endpoint for one upstream account
#[derive(Clone, Deserialize)]
pub struct ProviderSettings {
    /// Registry id, e.g. `openai`, `anthropic`, `azure`
    pub provider: String,
    #[serde(default)]
    pub api_key: String,
    /// Read the key from this environment variable when `api_key` is empty
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    /// Provider-specific fields (organization_id, resource, region, ...)
    #[serde(default)]
    pub extra: HashMap<String, String>,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

impl ProviderSettings {
    fn resolve_api_key<F>(&mut self, name: &str, lookup: &F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if !self.api_key.is_empty() {
            return Ok(());
        }
        if let Some(var) = &self.api_key_env {
            self.api_key = lookup(var).ok_or_else(|| ConfigError::MissingApiKey {
                provider: name.to_string(),
                env: var.clone(),
            })?;
        }
        Ok(())
    }
}

impl fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("provider", &self.provider)
            .field("api_key", &"[REDACTED]")
            .field("api_key_env", &self.api_key_env)
            .field("base_url", &self.base_url)
            .field("extra", &self.extra)
            .field("timeout_seconds", &self.timeout_seconds)
            .finish()
    }
}

/// Operation families a mapping can be the default for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Chat,
    Embeddings,
    ImageGeneration,
}

/// Per-mapping capability switches; unset fields keep the registry value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct CapabilityOverrides {
    #[serde(default)]
    pub streaming: Option<bool>,
    #[serde(default)]
    pub vision: Option<bool>,
    #[serde(default)]
    pub function_calling: Option<bool>,
    #[serde(default)]
    pub embeddings: Option<bool>,
    #[serde(default)]
    pub image_generation: Option<bool>,
}

/// Alias -> (provider credentials, provider model id)
#[derive(Debug, Clone, Deserialize)]
pub struct ModelProviderMapping {
    pub alias: String,
    /// Key into [`GatewayConfig::providers`]
    pub provider: String,
    pub provider_model: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub default_for: Vec<Capability>,
    #[serde(default)]
    pub capabilities: CapabilityOverrides,
}

fn default_enabled() -> bool {
    true
}

/// Ordered fallback aliases tried after `primary` fails
#[derive(Debug, Clone, Deserialize)]
pub struct FallbackConfiguration {
    pub primary: String,
    #[serde(default)]
    pub fallbacks: Vec<String>,
}

impl FallbackConfiguration {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidFallback {
            primary: self.primary.clone(),
            reason,
        };

        let mut seen = HashSet::new();
        for alias in &self.fallbacks {
            if alias == &self.primary {
                return Err(invalid("lists itself as a fallback".to_string()));
            }
            if !seen.insert(alias.as_str()) {
                return Err(invalid(format!("lists '{alias}' more than once")));
            }
        }
        Ok(())
    }
}
