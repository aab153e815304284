use thiserror::Error;

pub use crate::record::RecordError;

/// Persisted aggregator state that cannot be resumed from.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("window capacity must be at least 1")]
    ZeroCapacity,
    #[error("window holds {len} items, exceeds capacity {cap}")]
    WindowOverflow { len: usize, cap: usize },
    #[error("period must be at least 1")]
    ZeroPeriod,
    #[error("{field}: {reason}")]
    Inconsistent { field: &'static str, reason: String },
}

/// Configuration that could not be loaded.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse YAML {path}: {source}")]
    Yaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}
