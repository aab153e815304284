//! Incremental technical-analysis aggregators for keyed bar streams.
//!
//! Every aggregator consumes one sample at a time, returns `None` while it warms up,
//! and serializes completely so a restored instance continues exactly where the
//! original left off.

pub mod bar;
pub mod config;
pub mod error;
pub mod impulse;
pub mod indicators;
pub mod pipeline;
pub mod record;
pub mod signal;
pub mod upsample;

pub use bar::OhlcvBar;
pub use error::{ConfigError, RecordError, StateError};
pub use impulse::{ImpulseAggregate, ImpulseRecord, TradingDirection};
pub use indicators::{
    EmaAggregate, MacdHistogramAggregate, MacdHistogramRecord, RingBuf, SstocAggregate,
    SstocRecord,
};
pub use pipeline::{IndicatorPipeline, PipelineOutput, SymbolState};
pub use record::{AggregateRecord, DoubleRecord, RecordHeader, SymbolTimestampKey, TimeRange};
pub use signal::SignalRecord;
pub use upsample::BarUpsampler;
