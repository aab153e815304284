//! Pipeline configuration.
//!
//! YAML merge hierarchy: defaults <- global <- symbols.<SYMBOL>.
//!
//! ```yaml
//! global:
//!   indicators: { ema_period: 13, macd_fast: 12, macd_slow: 26, macd_signal: 9 }
//!   engine: { bar_time_range: day }
//! symbols:
//!   BTC:
//!     indicators: { ema_period: 21 }
//! ```

use crate::error::ConfigError;
use crate::record::TimeRange;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

// ---------------------------------------------------------------------------
// Indicators config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorsConfig {
    pub ema_period: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    /// Raw %K lookback.
    pub sstoc_n: usize,
    pub sstoc_p1: usize,
    pub sstoc_p2: usize,
}

impl Default for IndicatorsConfig {
    fn default() -> Self {
        Self {
            ema_period: 13,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            sstoc_n: 14,
            sstoc_p1: 3,
            sstoc_p2: 3,
        }
    }
}

impl IndicatorsConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        let periods = [
            ("ema_period", self.ema_period),
            ("macd_fast", self.macd_fast),
            ("macd_slow", self.macd_slow),
            ("macd_signal", self.macd_signal),
            ("sstoc_n", self.sstoc_n),
            ("sstoc_p1", self.sstoc_p1),
            ("sstoc_p2", self.sstoc_p2),
        ];
        for (name, value) in periods {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("indicators.{name} must be >= 1")));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Engine config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Time range stamped on incoming bars that still carry the `Millisecond` default.
    pub bar_time_range: TimeRange,
    /// When set, bars are first upsampled into this coarser bucket.
    pub upsample_to: Option<TimeRange>,
    /// Emit a signal record whenever the impulse turns.
    pub emit_signals: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bar_time_range: TimeRange::Day,
            upsample_to: None,
            emit_signals: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub indicators: IndicatorsConfig,
    pub engine: EngineConfig,
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.indicators.validate()?;
        if let Some(target) = self.engine.upsample_to {
            if target.bucket_millis() < self.engine.bar_time_range.bucket_millis() {
                return Err(ConfigError::Invalid(format!(
                    "engine.upsample_to ({target}) is finer than engine.bar_time_range ({})",
                    self.engine.bar_time_range
                )));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// YAML loading
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct YamlRoot {
    #[serde(default)]
    global: serde_yaml::Value,
    #[serde(default)]
    symbols: serde_yaml::Value,
}

/// Recursively merge `overlay` into `base`; mappings merge key by key, anything else
/// is replaced. A null overlay keeps the base value.
fn deep_merge(base: &mut serde_yaml::Value, overlay: &serde_yaml::Value) {
    match (base, overlay) {
        (serde_yaml::Value::Mapping(base_map), serde_yaml::Value::Mapping(overlay_map)) => {
            for (key, overlay_val) in overlay_map {
                match base_map.get_mut(key) {
                    Some(base_val) => deep_merge(base_val, overlay_val),
                    None => {
                        base_map.insert(key.clone(), overlay_val.clone());
                    }
                }
            }
        }
        (base, overlay) => {
            if !overlay.is_null() {
                *base = overlay.clone();
            }
        }
    }
}

/// Parse YAML text and resolve the config for `symbol` (or the global config).
pub fn parse_config(raw: &str, symbol: Option<&str>, origin: &str) -> Result<PipelineConfig, ConfigError> {
    let yaml_err = |source| ConfigError::Yaml {
        path: origin.to_string(),
        source,
    };
    let root: YamlRoot = serde_yaml::from_str(raw).map_err(yaml_err)?;
    let mut merged = serde_yaml::to_value(PipelineConfig::default()).map_err(yaml_err)?;

    if !root.global.is_null() {
        deep_merge(&mut merged, &root.global);
    }

    if let (Some(sym), serde_yaml::Value::Mapping(symbols)) = (symbol, &root.symbols) {
        // Exact match first, then uppercase.
        let overrides = symbols
            .get(serde_yaml::Value::String(sym.to_string()))
            .or_else(|| symbols.get(serde_yaml::Value::String(sym.to_uppercase())));
        if let Some(overrides) = overrides {
            deep_merge(&mut merged, overrides);
        }
    }

    let cfg: PipelineConfig = serde_yaml::from_value(merged).map_err(yaml_err)?;
    cfg.validate()?;
    Ok(cfg)
}

/// Load config from `yaml_path`. A missing file yields the defaults with a warning.
pub fn load_config(yaml_path: impl AsRef<Path>, symbol: Option<&str>) -> Result<PipelineConfig, ConfigError> {
    let path = yaml_path.as_ref();
    let shown = path.display().to_string();
    let raw = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(path = %shown, "config file does not exist, using defaults");
            return Ok(PipelineConfig::default());
        }
        Err(source) => {
            return Err(ConfigError::Io {
                path: shown,
                source,
            })
        }
    };
    parse_config(&raw, symbol, &shown)
}
