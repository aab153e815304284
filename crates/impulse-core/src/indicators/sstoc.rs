use super::{change, RingBuf};
use crate::bar::OhlcvBar;
use crate::error::StateError;
use crate::record::{impl_aggregate_record, RecordHeader};
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Smoothed stochastic emission. `slow`/`s_change` are set together once the slow line
/// has a previous value to compare against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SstocRecord {
    #[serde(flatten)]
    pub header: RecordHeader,
    pub fast: f64,
    pub f_change: f64,
    pub slow: Option<f64>,
    pub s_change: Option<f64>,
}

impl_aggregate_record!(SstocRecord);

/// Slow stochastic oscillator over OHLC bars.
///
/// 1. Keep the last `n` bars.
/// 2. raw %K = (close − min(low)) / (max(high) − min(low)) · 100, kept over `p1` values.
/// 3. fast = SMA(raw %K, p1), kept over `p2` values.
/// 4. slow = SMA(fast, p2).
///
/// A line is only reported alongside its change, so the first value of each line is
/// remembered but not emitted. A zero-width (or inverted) high/low range yields raw
/// %K = 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SstocState")]
pub struct SstocAggregate {
    input_window: RingBuf<OhlcvBar>,
    raw_window: RingBuf<f64>,
    fast_window: RingBuf<f64>,
    last_fast: Option<f64>,
    last_slow: Option<f64>,
}

#[derive(Deserialize)]
struct SstocState {
    input_window: RingBuf<OhlcvBar>,
    raw_window: RingBuf<f64>,
    fast_window: RingBuf<f64>,
    last_fast: Option<f64>,
    last_slow: Option<f64>,
}

impl TryFrom<SstocState> for SstocAggregate {
    type Error = StateError;

    fn try_from(s: SstocState) -> Result<Self, Self::Error> {
        let inconsistent = |field: &'static str, reason: &str| StateError::Inconsistent {
            field,
            reason: reason.to_string(),
        };
        if !s.raw_window.is_empty() && !s.input_window.full() {
            return Err(inconsistent("raw_window", "populated before input_window filled"));
        }
        if !s.fast_window.is_empty() && !s.raw_window.full() {
            return Err(inconsistent("fast_window", "populated before raw_window filled"));
        }
        if s.last_fast.is_some() == s.fast_window.is_empty() {
            return Err(inconsistent("last_fast", "disagrees with fast_window"));
        }
        if s.last_slow.is_some() != s.fast_window.full() {
            return Err(inconsistent("last_slow", "disagrees with fast_window"));
        }
        Ok(Self {
            input_window: s.input_window,
            raw_window: s.raw_window,
            fast_window: s.fast_window,
            last_fast: s.last_fast,
            last_slow: s.last_slow,
        })
    }
}

impl SstocAggregate {
    /// Window sizes are clamped to at least 1.
    pub fn new(n: usize, p1: usize, p2: usize) -> Self {
        Self {
            input_window: RingBuf::new(n),
            raw_window: RingBuf::new(p1),
            fast_window: RingBuf::new(p2),
            last_fast: None,
            last_slow: None,
        }
    }

    /// Feed one bar. Bars with non-finite prices, or whose raw %K is not a finite
    /// number, are skipped and leave the state untouched.
    pub fn aggregate(&mut self, bar: &OhlcvBar) -> Option<SstocRecord> {
        if !bar.is_finite() {
            return None;
        }
        if self.input_window.len() + 1 < self.input_window.capacity() {
            self.input_window.push(bar.clone());
            return None;
        }

        let evicted = usize::from(self.input_window.full());
        let (low, high) = self
            .input_window
            .iter()
            .skip(evicted)
            .chain(std::iter::once(bar))
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), b| {
                (lo.min(b.low), hi.max(b.high))
            });
        let Some(raw_k) = raw_k(bar.close, low, high) else {
            trace!(key = ?bar.header.key, "sstoc: raw %K is not finite, skipping bar");
            return None;
        };
        self.input_window.push(bar.clone());

        self.raw_window.push(raw_k);
        if !self.raw_window.full() {
            return None;
        }

        let fast = self.raw_window.mean();
        self.fast_window.push(fast);
        let prev_fast = self.last_fast.replace(fast);

        let (slow, s_change) = if self.fast_window.full() {
            let slow = self.fast_window.mean();
            let prev_slow = self.last_slow.replace(slow);
            match change(slow, prev_slow) {
                Some(c) => (Some(slow), Some(c)),
                None => (None, None),
            }
        } else {
            (None, None)
        };

        let f_change = change(fast, prev_fast)?;
        Some(SstocRecord {
            header: bar.header.clone(),
            fast,
            f_change,
            slow,
            s_change,
        })
    }
}

/// Position of `close` within `[low, high]` in percent, clamped to `[0, 100]`.
/// A zero-width (or inverted) range gives 0.
fn raw_k(close: f64, low: f64, high: f64) -> Option<f64> {
    let range = high - low;
    if range <= 0.0 {
        return Some(0.0);
    }
    let k = (close - low) / range * 100.0;
    k.is_finite().then(|| k.clamp(0.0, 100.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{SymbolTimestampKey, TimeRange};

    fn bar(i: i64, h: f64, l: f64, c: f64) -> OhlcvBar {
        OhlcvBar::new(
            SymbolTimestampKey::new("SOL", i * 60_000),
            TimeRange::Minute,
            c,
            h,
            l,
            c,
            100,
        )
    }

    fn series() -> Vec<OhlcvBar> {
        let closes = [10.0, 11.0, 10.5, 12.0, 11.5, 12.5, 13.0, 12.2, 11.8, 12.9];
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| bar(i as i64, c + 0.5, c - 0.7, c))
            .collect()
    }

    #[test]
    fn emission_schedule() {
        let mut st = SstocAggregate::new(3, 2, 2);
        let out: Vec<_> = series().iter().map(|b| st.aggregate(b)).collect();

        assert!(out[..4].iter().all(Option::is_none));

        let fifth = out[4].as_ref().unwrap();
        assert!(fifth.slow.is_none() && fifth.s_change.is_none());

        let sixth = out[5].as_ref().unwrap();
        assert!(sixth.slow.is_some() && sixth.s_change.is_some());
        assert_eq!(sixth.header, series()[5].header);
    }

    #[test]
    fn values_match_hand_computation() {
        let bars = series();
        let mut st = SstocAggregate::new(3, 2, 2);
        let out: Vec<_> = bars.iter().map(|b| st.aggregate(b)).collect();

        let raw = |i: usize| {
            let w = &bars[i - 2..=i];
            let lo = w.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);
            let hi = w.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max);
            (bars[i].close - lo) / (hi - lo) * 100.0
        };
        let fast = |i: usize| (raw(i - 1) + raw(i)) / 2.0;

        let fifth = out[4].as_ref().unwrap();
        assert_eq!(fifth.fast, fast(4));
        assert_eq!(fifth.f_change, fast(4) - fast(3));

        let sixth = out[5].as_ref().unwrap();
        let slow5 = (fast(4) + fast(5)) / 2.0;
        let slow4 = (fast(3) + fast(4)) / 2.0;
        assert_eq!(sixth.slow, Some(slow5));
        assert_eq!(sixth.s_change, Some(slow5 - slow4));
    }

    #[test]
    fn flat_range_yields_zero() {
        let mut st = SstocAggregate::new(2, 1, 1);
        for i in 0..4 {
            let rec = st.aggregate(&bar(i, 5.0, 5.0, 5.0));
            if let Some(rec) = rec {
                assert_eq!(rec.fast, 0.0);
                assert_eq!(rec.f_change, 0.0);
                assert_eq!(rec.slow, Some(0.0));
            }
        }
    }

    #[test]
    fn restore_mid_stream_matches_uninterrupted_run() {
        let bars = series();
        let mut straight = SstocAggregate::new(3, 2, 2);
        let expected: Vec<_> = bars.iter().map(|b| straight.aggregate(b)).collect();

        for cut in 0..bars.len() {
            let mut first = SstocAggregate::new(3, 2, 2);
            let mut got: Vec<_> = bars[..cut].iter().map(|b| first.aggregate(b)).collect();
            let json = serde_json::to_string(&first).unwrap();
            let mut resumed: SstocAggregate = serde_json::from_str(&json).unwrap();
            assert_eq!(resumed, first);
            got.extend(bars[cut..].iter().map(|b| resumed.aggregate(b)));
            assert_eq!(got, expected, "cut at {cut}");
        }
    }

    #[test]
    fn restore_rejects_out_of_order_windows() {
        let mut st = SstocAggregate::new(3, 2, 2);
        for b in &series()[..6] {
            st.aggregate(b);
        }
        let mut json = serde_json::to_value(&st).unwrap();
        json["last_fast"] = serde_json::Value::Null;
        assert!(serde_json::from_value::<SstocAggregate>(json).is_err());
    }

    #[test]
    fn restore_rejects_missing_slow_memory() {
        let mut st = SstocAggregate::new(3, 2, 2);
        for b in &series()[..6] {
            st.aggregate(b);
        }
        let mut json = serde_json::to_value(&st).unwrap();
        json["last_slow"] = serde_json::Value::Null;
        let err = serde_json::from_value::<SstocAggregate>(json).unwrap_err();
        assert!(err.to_string().contains("last_slow"), "{err}");
    }

    #[test]
    fn unbounded_range_skips_bar_and_keeps_state_restorable() {
        let mut st = SstocAggregate::new(1, 1, 1);
        let huge = bar(0, 1e308, -1e308, 1e308);
        assert!(st.aggregate(&huge).is_none());
        assert_eq!(st, SstocAggregate::new(1, 1, 1));

        for (i, c) in [1.0, 2.0, 3.0].into_iter().enumerate() {
            st.aggregate(&bar(i as i64 + 1, c + 1.0, c - 1.0, c));
        }
        let json = serde_json::to_string(&st).unwrap();
        let back: SstocAggregate = serde_json::from_str(&json).unwrap();
        assert_eq!(back, st);
    }

    #[test]
    fn close_outside_its_own_range_is_clamped() {
        let mut st = SstocAggregate::new(1, 1, 1);
        st.aggregate(&bar(0, 2.0, 1.0, 1.5));
        st.aggregate(&bar(1, 2.0, 1.0, 1.5));
        let above = st.aggregate(&bar(2, 2.0, 1.0, 9.0)).unwrap();
        assert_eq!(above.fast, 100.0);
        let below = st.aggregate(&bar(3, 2.0, 1.0, -9.0)).unwrap();
        assert_eq!(below.fast, 0.0);
        assert_eq!(below.slow, Some(0.0));
    }
}
