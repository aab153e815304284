use super::change;
use super::ema::EmaAggregate;
use crate::error::StateError;
use crate::record::{impl_aggregate_record, RecordHeader};
use serde::{Deserialize, Serialize};
use tracing::trace;

/// One MACD emission: line, signal, histogram and their changes since the previous
/// emission (`None` on the first one).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MacdHistogramRecord {
    #[serde(flatten)]
    pub header: RecordHeader,
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
    pub m_change: Option<f64>,
    pub s_change: Option<f64>,
    pub h_change: Option<f64>,
}

impl_aggregate_record!(MacdHistogramRecord);

/// MACD — histogram = (EMA_fast − EMA_slow) − EMA_signal(EMA_fast − EMA_slow).
///
/// Owns its three EMAs by value. Emits nothing until the slow EMA and then the signal
/// EMA have bootstrapped, i.e. for the first `slow + signal − 2` samples when
/// `fast <= slow`. Records are keyless.
///
/// The previous emission is never stored separately: once the signal EMA is warm, the
/// last line is `fast − slow` and the last signal is the signal EMA's value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "MacdState")]
pub struct MacdHistogramAggregate {
    fast: EmaAggregate,
    slow: EmaAggregate,
    signal: EmaAggregate,
}

#[derive(Deserialize)]
struct MacdState {
    fast: EmaAggregate,
    slow: EmaAggregate,
    signal: EmaAggregate,
}

impl TryFrom<MacdState> for MacdHistogramAggregate {
    type Error = StateError;

    fn try_from(s: MacdState) -> Result<Self, Self::Error> {
        if s.fast.samples() != s.slow.samples() {
            return Err(StateError::Inconsistent {
                field: "slow",
                reason: format!(
                    "fast EMA saw {} samples, slow EMA saw {}",
                    s.fast.samples(),
                    s.slow.samples()
                ),
            });
        }
        let agg = Self {
            fast: s.fast,
            slow: s.slow,
            signal: s.signal,
        };
        let expected = agg.expected_signal_samples();
        if agg.signal.samples() != expected {
            return Err(StateError::Inconsistent {
                field: "signal",
                reason: format!(
                    "signal EMA saw {} samples, expected {expected}",
                    agg.signal.samples()
                ),
            });
        }
        Ok(agg)
    }
}

impl MacdHistogramAggregate {
    pub fn new(fast_period: usize, slow_period: usize, signal_period: usize) -> Self {
        Self {
            fast: EmaAggregate::new(fast_period),
            slow: EmaAggregate::new(slow_period),
            signal: EmaAggregate::new(signal_period),
        }
    }

    /// The signal EMA is fed once per sample after both line EMAs are warm.
    fn expected_signal_samples(&self) -> u64 {
        let warmup = self.fast.period().max(self.slow.period()) as u64;
        self.fast.samples().saturating_sub(warmup - 1)
    }

    /// `(macd, signal)` of the previous emission.
    fn previous(&self) -> Option<(f64, f64)> {
        let signal = self.signal.value()?;
        let macd = self.fast.value()? - self.slow.value()?;
        Some((macd, signal))
    }

    /// Feed one value (usually a close).
    ///
    /// The three EMAs advance together or not at all: a value whose line or signal
    /// would overflow is skipped.
    pub fn aggregate(&mut self, value: f64) -> Option<MacdHistogramRecord> {
        if !value.is_finite() {
            return None;
        }
        let before = self.fast.samples();
        let mut fast = self.fast.clone();
        let mut slow = self.slow.clone();
        let (f, s) = (fast.aggregate(value), slow.aggregate(value));
        if fast.samples() == before || slow.samples() == before {
            trace!(value, "macd: line EMA rejected input");
            return None;
        }

        let mut signal = self.signal.clone();
        let emitted = match (f, s) {
            (Some(f), Some(s)) => {
                let macd = f.value - s.value;
                if !macd.is_finite() {
                    trace!(value, "macd: line overflows, skipping input");
                    return None;
                }
                let signal_before = signal.samples();
                let sig = signal.aggregate(macd);
                if signal.samples() == signal_before {
                    return None;
                }
                sig.map(|sig| (macd, sig.value))
            }
            _ => None,
        };

        let prev = self.previous();
        self.fast = fast;
        self.slow = slow;
        self.signal = signal;

        let (macd, signal) = emitted?;
        let histogram = macd - signal;
        Some(MacdHistogramRecord {
            header: RecordHeader::keyless(),
            macd,
            signal,
            histogram,
            m_change: change(macd, prev.map(|p| p.0)),
            s_change: change(signal, prev.map(|p| p.1)),
            h_change: change(histogram, prev.map(|p| p.0 - p.1)),
        })
    }
}
