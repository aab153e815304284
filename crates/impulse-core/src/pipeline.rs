//! Per-symbol arena of aggregators.
//!
//! Each symbol owns one [`SymbolState`], created on its first bar and mutated in place
//! on every later one. States are plain serde values so a runtime can checkpoint them
//! with [`IndicatorPipeline::state`] and resume with [`IndicatorPipeline::restore`].

use crate::bar::OhlcvBar;
use crate::config::PipelineConfig;
use crate::error::ConfigError;
use crate::impulse::{ImpulseAggregate, ImpulseRecord};
use crate::indicators::{
    EmaAggregate, MacdHistogramAggregate, MacdHistogramRecord, SstocAggregate, SstocRecord,
};
use crate::record::{AggregateRecord, DoubleRecord, RecordError, TimeRange};
use crate::signal::SignalRecord;
use crate::upsample::BarUpsampler;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

/// Every aggregator owned by one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolState {
    pub ema: EmaAggregate,
    pub macd: MacdHistogramAggregate,
    pub sstoc: SstocAggregate,
    pub impulse: ImpulseAggregate,
    #[serde(default)]
    pub upsampler: Option<BarUpsampler>,
    /// Bars processed by the indicators (after upsampling).
    pub bar_count: u64,
}

impl SymbolState {
    pub fn new(cfg: &PipelineConfig) -> Self {
        let ind = &cfg.indicators;
        Self {
            ema: EmaAggregate::new(ind.ema_period),
            macd: MacdHistogramAggregate::new(ind.macd_fast, ind.macd_slow, ind.macd_signal),
            sstoc: SstocAggregate::new(ind.sstoc_n, ind.sstoc_p1, ind.sstoc_p2),
            impulse: ImpulseAggregate::new(),
            upsampler: cfg.engine.upsample_to.map(BarUpsampler::new),
            bar_count: 0,
        }
    }
}

/// Everything produced by one bar. Fields are `None` while the matching aggregator
/// is still warming up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineOutput {
    pub bar: OhlcvBar,
    pub ema: Option<DoubleRecord>,
    pub macd: Option<MacdHistogramRecord>,
    pub sstoc: Option<SstocRecord>,
    pub impulse: Option<ImpulseRecord>,
    pub signal: Option<SignalRecord>,
}

pub struct IndicatorPipeline {
    config: PipelineConfig,
    overrides: FxHashMap<String, PipelineConfig>,
    symbols: FxHashMap<String, SymbolState>,
}

impl IndicatorPipeline {
    pub fn new(config: PipelineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            overrides: FxHashMap::default(),
            symbols: FxHashMap::default(),
        })
    }

    /// Use `config` for `symbol` instead of the pipeline-wide one. Applies to states
    /// created after this call.
    pub fn set_symbol_config(&mut self, symbol: impl Into<String>, config: PipelineConfig) -> Result<(), ConfigError> {
        config.validate()?;
        self.overrides.insert(symbol.into(), config);
        Ok(())
    }

    pub fn config_for(&self, symbol: &str) -> &PipelineConfig {
        self.overrides.get(symbol).unwrap_or(&self.config)
    }

    pub fn state(&self, symbol: &str) -> Option<&SymbolState> {
        self.symbols.get(symbol)
    }

    /// Replace the aggregators of `symbol` with a previously checkpointed state.
    pub fn restore(&mut self, symbol: impl Into<String>, state: SymbolState) {
        let symbol = symbol.into();
        debug!(symbol = %symbol, bar_count = state.bar_count, "restoring symbol state");
        self.symbols.insert(symbol, state);
    }

    pub fn evict(&mut self, symbol: &str) -> Option<SymbolState> {
        self.symbols.remove(symbol)
    }

    pub fn symbols(&self) -> impl Iterator<Item = (&str, &SymbolState)> + '_ {
        self.symbols.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Feed one bar.
    ///
    /// A bar still carrying the default `Millisecond` time range is stamped with
    /// `engine.bar_time_range`; any other time range is kept as is.
    ///
    /// Returns `Ok(None)` when the bar was absorbed by the upsampler or skipped for
    /// non-finite prices. Keyless bars are rejected.
    pub fn on_bar(&mut self, mut bar: OhlcvBar) -> Result<Option<PipelineOutput>, RecordError> {
        let symbol = bar.header.symbol().ok_or(RecordError::MissingKey)?.to_string();
        if !bar.is_finite() {
            warn!(symbol = %symbol, ts = bar.header.timestamp(), "skipping bar with non-finite prices");
            return Ok(None);
        }

        let cfg = self.overrides.get(&symbol).unwrap_or(&self.config);
        if bar.header.time_range == TimeRange::Millisecond {
            bar.header.time_range = cfg.engine.bar_time_range;
        }
        let emit_signals = cfg.engine.emit_signals;
        let state = self.symbols.entry(symbol).or_insert_with_key(|symbol| {
            debug!(symbol = %symbol, "creating symbol state");
            SymbolState::new(cfg)
        });

        let bar = match state.upsampler.as_mut() {
            Some(up) => match up.push(&bar)? {
                Some(completed) => completed,
                None => return Ok(None),
            },
            None => bar,
        };
        Ok(Some(Self::step(state, bar, emit_signals)))
    }

    /// Push the open upsample bucket of `symbol` through the indicators.
    pub fn flush(&mut self, symbol: &str) -> Option<PipelineOutput> {
        let emit_signals = self.config_for(symbol).engine.emit_signals;
        let state = self.symbols.get_mut(symbol)?;
        let bar = state.upsampler.as_mut()?.flush()?;
        Some(Self::step(state, bar, emit_signals))
    }

    fn step(state: &mut SymbolState, bar: OhlcvBar, emit_signals: bool) -> PipelineOutput {
        state.bar_count += 1;
        let close = bar.close;

        let ema = state.ema.aggregate(close).map(|r| r.with_header(&bar.header));
        let macd = state.macd.aggregate(close).map(|r| r.with_header(&bar.header));
        let sstoc = state.sstoc.aggregate(&bar);
        let impulse = state.impulse.aggregate(ema.as_ref(), macd.as_ref());

        let signal = match (&impulse, emit_signals) {
            (Some(imp), true) => SignalRecord::from_impulse(imp, close),
            _ => None,
        };
        if let Some(imp) = &impulse {
            trace!(
                key = ?imp.header.key,
                direction = %imp.trading_direction,
                "impulse"
            );
        }
        if let Some(sig) = &signal {
            debug!(
                key = ?sig.header.key,
                direction = %sig.direction,
                close = sig.close,
                "impulse turned"
            );
        }

        PipelineOutput {
            bar,
            ema,
            macd,
            sstoc,
            impulse,
            signal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::SymbolTimestampKey;

    fn cfg() -> PipelineConfig {
        let mut cfg = PipelineConfig::default();
        cfg.indicators.ema_period = 3;
        cfg.indicators.macd_fast = 2;
        cfg.indicators.macd_slow = 4;
        cfg.indicators.macd_signal = 2;
        cfg.indicators.sstoc_n = 3;
        cfg.indicators.sstoc_p1 = 2;
        cfg.indicators.sstoc_p2 = 2;
        cfg
    }

    fn bar(symbol: &str, i: i64, c: f64) -> OhlcvBar {
        OhlcvBar::new(
            SymbolTimestampKey::new(symbol, i * 86_400_000),
            TimeRange::Millisecond,
            c,
            c + 1.0,
            c - 1.0,
            c,
            5,
        )
    }

    #[test]
    fn records_carry_the_bar_identity() {
        let mut p = IndicatorPipeline::new(cfg()).unwrap();
        let mut last = None;
        for i in 0..8 {
            last = p.on_bar(bar("BTC", i, 100.0 + i as f64)).unwrap();
        }
        let out = last.unwrap();
        assert_eq!(out.bar.header.time_range, TimeRange::Day);
        assert_eq!(out.ema.unwrap().header, out.bar.header);
        assert_eq!(out.macd.unwrap().header, out.bar.header);
        assert_eq!(out.sstoc.unwrap().header, out.bar.header);
        assert_eq!(out.impulse.unwrap().header, out.bar.header);
        assert_eq!(p.state("BTC").unwrap().bar_count, 8);
    }

    #[test]
    fn symbols_are_independent() {
        let mut p = IndicatorPipeline::new(cfg()).unwrap();
        for i in 0..6 {
            p.on_bar(bar("BTC", i, 100.0 + i as f64)).unwrap();
        }
        p.on_bar(bar("ETH", 0, 10.0)).unwrap();
        assert_eq!(p.len(), 2);
        assert_eq!(p.state("ETH").unwrap().bar_count, 1);
        assert!(!p.state("ETH").unwrap().ema.is_warm());
        assert!(p.state("BTC").unwrap().ema.is_warm());

        assert!(p.evict("ETH").is_some());
        assert!(p.state("ETH").is_none());
    }

    #[test]
    fn keyless_and_non_finite_bars() {
        let mut p = IndicatorPipeline::new(cfg()).unwrap();
        let mut keyless = bar("BTC", 0, 1.0);
        keyless.header.key = None;
        assert_eq!(p.on_bar(keyless), Err(RecordError::MissingKey));

        let mut nan = bar("BTC", 0, 1.0);
        nan.close = f64::NAN;
        assert_eq!(p.on_bar(nan), Ok(None));
        assert!(p.is_empty());
    }

    #[test]
    fn explicit_time_range_is_kept() {
        let mut p = IndicatorPipeline::new(cfg()).unwrap();
        let mut minute = bar("BTC", 0, 1.0);
        minute.header.time_range = TimeRange::Minute;
        let out = p.on_bar(minute).unwrap().unwrap();
        assert_eq!(out.bar.header.time_range, TimeRange::Minute);

        let out = p.on_bar(bar("BTC", 1, 1.0)).unwrap().unwrap();
        assert_eq!(out.bar.header.time_range, TimeRange::Day);
    }

    #[test]
    fn symbol_override_applies() {
        let mut p = IndicatorPipeline::new(cfg()).unwrap();
        let mut slow = cfg();
        slow.indicators.ema_period = 50;
        p.set_symbol_config("ETH", slow).unwrap();
        p.on_bar(bar("ETH", 0, 1.0)).unwrap();
        p.on_bar(bar("BTC", 0, 1.0)).unwrap();
        assert_eq!(p.state("ETH").unwrap().ema.period(), 50);
        assert_eq!(p.state("BTC").unwrap().ema.period(), 3);
    }

    #[test]
    fn upsampling_delays_until_bucket_closes() {
        let mut c = cfg();
        c.engine.upsample_to = Some(TimeRange::Week);
        let mut p = IndicatorPipeline::new(c).unwrap();
        // Day 4 after the epoch is Monday 1970-01-05.
        let outputs: Vec<_> = (4..18)
            .filter_map(|d| p.on_bar(bar("BTC", d, d as f64)).unwrap())
            .collect();
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].bar.header.time_range, TimeRange::Week);
        assert_eq!(outputs[0].bar.volume, 35);

        let flushed = p.flush("BTC").unwrap();
        assert_eq!(flushed.bar.volume, 35);
        assert!(p.flush("BTC").is_none());
    }
}
