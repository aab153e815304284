use super::{change, RingBuf};
use crate::error::StateError;
use crate::record::{DoubleRecord, RecordHeader};
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Exponential Moving Average with a simple-moving-average bootstrap.
///
/// Behaviour:
///   samples 1..n-1 → buffered, no output
///   sample n       → value = mean of the first n samples, v_change = None
///   sample n+1..   → value = k·x + (1−k)·prev   where k = 2/(n+1)
///
/// Emitted records are keyless; the caller attaches identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "EmaState")]
pub struct EmaAggregate {
    period: usize,
    bootstrap: RingBuf<f64>,
    count: u64,
    last: Option<f64>,
}

#[derive(Deserialize)]
struct EmaState {
    period: usize,
    bootstrap: RingBuf<f64>,
    count: u64,
    last: Option<f64>,
}

impl TryFrom<EmaState> for EmaAggregate {
    type Error = StateError;

    fn try_from(s: EmaState) -> Result<Self, Self::Error> {
        if s.period == 0 {
            return Err(StateError::ZeroPeriod);
        }
        if s.bootstrap.capacity() != s.period {
            return Err(StateError::Inconsistent {
                field: "bootstrap",
                reason: format!("capacity {} != period {}", s.bootstrap.capacity(), s.period),
            });
        }
        let seeded = s.count >= s.period as u64;
        let consistent = if seeded {
            s.last.is_some() && s.bootstrap.is_empty()
        } else {
            s.last.is_none() && s.bootstrap.len() as u64 == s.count
        };
        if !consistent {
            return Err(StateError::Inconsistent {
                field: "count",
                reason: format!(
                    "count {} disagrees with {} buffered samples and last={:?}",
                    s.count,
                    s.bootstrap.len(),
                    s.last
                ),
            });
        }
        Ok(Self {
            period: s.period,
            bootstrap: s.bootstrap,
            count: s.count,
            last: s.last,
        })
    }
}

impl EmaAggregate {
    /// `period` is clamped to at least 1.
    pub fn new(period: usize) -> Self {
        let period = period.max(1);
        Self {
            period,
            bootstrap: RingBuf::new(period),
            count: 0,
            last: None,
        }
    }

    pub fn period(&self) -> usize {
        self.period
    }

    /// Smoothing constant `2/(n+1)`.
    pub fn smoothing(&self) -> f64 {
        2.0 / (self.period as f64 + 1.0)
    }

    /// Last emitted value, if the bootstrap has completed.
    pub fn value(&self) -> Option<f64> {
        self.last
    }

    pub fn is_warm(&self) -> bool {
        self.last.is_some()
    }

    /// Samples accepted so far.
    pub(crate) fn samples(&self) -> u64 {
        self.count
    }

    /// Feed one value. Non-finite values, and values whose result would overflow to a
    /// non-finite EMA, are skipped and leave the state untouched.
    pub fn aggregate(&mut self, value: f64) -> Option<DoubleRecord> {
        if !value.is_finite() {
            trace!(value, "ema: skipping non-finite input");
            return None;
        }

        let Some(prev) = self.last else {
            if self.bootstrap.len() + 1 < self.period {
                self.bootstrap.push(value);
                self.count = self.count.saturating_add(1);
                return None;
            }
            let sum = self.bootstrap.iter().sum::<f64>() + value;
            let seed = sum / self.period as f64;
            if !seed.is_finite() {
                trace!(value, "ema: seed overflows, skipping input");
                return None;
            }
            self.bootstrap.clear();
            self.count = self.count.saturating_add(1);
            self.last = Some(seed);
            return Some(Self::record(seed, None));
        };

        let k = self.smoothing();
        let ema = value * k + prev * (1.0 - k);
        if !ema.is_finite() {
            trace!(value, "ema: result overflows, skipping input");
            return None;
        }
        self.count = self.count.saturating_add(1);
        self.last = Some(ema);
        Some(Self::record(ema, change(ema, Some(prev))))
    }

    fn record(value: f64, v_change: Option<f64>) -> DoubleRecord {
        DoubleRecord {
            header: RecordHeader::keyless(),
            value,
            v_change,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warms_up_after_exactly_period_samples() {
        for n in 1..=12usize {
            let mut ema = EmaAggregate::new(n);
            for i in 1..n {
                assert!(ema.aggregate(i as f64).is_none(), "n={n} sample {i}");
            }
            for i in n..n + 5 {
                assert!(ema.aggregate(i as f64).is_some(), "n={n} sample {i}");
            }
        }
    }

    #[test]
    fn period_one_echoes_input() {
        let mut ema = EmaAggregate::new(1);
        let rec = ema.aggregate(25.2).unwrap();
        assert_eq!(rec.value, 25.2);
        assert_eq!(rec.v_change, None);

        let rec = ema.aggregate(30.0).unwrap();
        assert_eq!(rec.value, 30.0);
        assert_eq!(rec.v_change, Some(30.0 - 25.2));
    }

    #[test]
    fn seeds_with_mean_then_smooths() {
        let mut ema = EmaAggregate::new(10);
        let mut out = Vec::new();
        for i in 1..=11 {
            out.push(ema.aggregate(i as f64));
        }
        assert!(out[..9].iter().all(Option::is_none));

        let seed = out[9].clone().unwrap();
        assert_eq!(seed.value, 5.5);
        assert_eq!(seed.v_change, None);

        let k = 2.0 / 11.0;
        let expected = 11.0 * k + 5.5 * (1.0 - k);
        let next = out[10].clone().unwrap();
        assert_eq!(next.value, expected);
        assert_eq!(next.v_change, Some(expected - 5.5));
        assert!(next.header.key.is_none());
    }

    #[test]
    fn non_finite_input_is_skipped() {
        let mut ema = EmaAggregate::new(2);
        ema.aggregate(1.0);
        assert!(ema.aggregate(f64::NAN).is_none());
        assert!(ema.aggregate(f64::INFINITY).is_none());
        assert_eq!(ema.aggregate(3.0).unwrap().value, 2.0);
    }

    #[test]
    fn overflowing_seed_is_skipped_and_state_stays_restorable() {
        let mut ema = EmaAggregate::new(2);
        assert!(ema.aggregate(1e308).is_none());
        assert!(ema.aggregate(1e308).is_none());
        assert_eq!(ema.samples(), 1);

        let json = serde_json::to_string(&ema).unwrap();
        let mut resumed: EmaAggregate = serde_json::from_str(&json).unwrap();
        assert_eq!(resumed, ema);

        let seed = resumed.aggregate(-1e308).unwrap();
        assert_eq!(seed.value, 0.0);
        assert!(resumed.value().is_some_and(f64::is_finite));
    }

    #[test]
    fn restore_mid_stream_matches_uninterrupted_run() {
        let input: Vec<f64> = (0..40).map(|i| 100.0 + (i as f64 * 0.7).sin() * 5.0).collect();

        for cut in [0, 3, 5, 6, 20, 39] {
            let mut straight = EmaAggregate::new(6);
            let expected: Vec<_> = input.iter().map(|&v| straight.aggregate(v)).collect();

            let mut first = EmaAggregate::new(6);
            let mut got: Vec<_> = input[..cut].iter().map(|&v| first.aggregate(v)).collect();
            let json = serde_json::to_string(&first).unwrap();
            let mut resumed: EmaAggregate = serde_json::from_str(&json).unwrap();
            assert_eq!(resumed, first);
            got.extend(input[cut..].iter().map(|&v| resumed.aggregate(v)));

            assert_eq!(got, expected, "cut at {cut}");
        }
    }

    #[test]
    fn restore_rejects_inconsistent_state() {
        let bad_count = r#"{"period":3,"bootstrap":{"cap":3,"items":[1.0]},"count":2,"last":null}"#;
        assert!(serde_json::from_str::<EmaAggregate>(bad_count).is_err());

        let bad_cap = r#"{"period":3,"bootstrap":{"cap":2,"items":[]},"count":0,"last":null}"#;
        assert!(serde_json::from_str::<EmaAggregate>(bad_cap).is_err());

        let seeded_without_value = r#"{"period":1,"bootstrap":{"cap":1,"items":[]},"count":4,"last":null}"#;
        assert!(serde_json::from_str::<EmaAggregate>(seeded_without_value).is_err());

        let zero = r#"{"period":0,"bootstrap":{"cap":1,"items":[]},"count":0,"last":null}"#;
        assert!(serde_json::from_str::<EmaAggregate>(zero).is_err());
    }
}
