use config::LoggingConfig;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Invalid log filter '{directive}': {source}")]
    InvalidFilter {
        directive: String,
        #[source]
        source: tracing_subscriber::filter::ParseError,
    },

    #[error("Failed to install tracing subscriber: {0}")]
    Init(String),
}

/// Filter from the configured level plus per-module overrides
pub fn build_filter(logging_config: &LoggingConfig) -> Result<EnvFilter, LoggingError> {
    let directive = logging_config.filter_directive();
    EnvFilter::try_new(&directive)
        .map_err(|source| LoggingError::InvalidFilter { directive, source })
}

/// Install the global subscriber in the configured format
pub fn init_tracing(logging_config: &LoggingConfig) -> Result<(), LoggingError> {
    let filter = build_filter(logging_config)?;

    // Initialize tracing based on the format specified in config
    let result = match logging_config.format.as_str() {
        "json" => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .try_init(),
        "compact" => tracing_subscriber::fmt()
            .compact()
            .with_env_filter(filter)
            .try_init(),
        _ => tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(filter)
            .try_init(),
    };
    result.map_err(|e| LoggingError::Init(e.to_string()))
}
