use crate::record::{impl_aggregate_record, RecordHeader, SymbolTimestampKey, TimeRange};
use serde::{Deserialize, Serialize};

/// OHLCV bar for one instrument over one time bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OhlcvBar {
    #[serde(flatten)]
    pub header: RecordHeader,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
}

impl_aggregate_record!(OhlcvBar);

impl OhlcvBar {
    pub fn new(
        key: SymbolTimestampKey,
        time_range: TimeRange,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: i64,
    ) -> Self {
        Self {
            header: RecordHeader::new(key, time_range),
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Timestamp used to order bars; a keyless bar sorts before every keyed one.
    fn order_ts(&self) -> i64 {
        self.header.timestamp().unwrap_or(i64::MIN)
    }

    /// Combine two bars into one covering both.
    ///
    /// Which operand is "later" is decided by timestamp only: `other` is later when its
    /// timestamp is strictly greater, so on a tie `self` counts as the later bar. The
    /// result takes the earlier open, the later close and key, the extreme high/low, the
    /// summed volume, and always `self`'s time range.
    pub fn merge_with(&self, other: &OhlcvBar) -> OhlcvBar {
        let (earlier, later) = if self.order_ts() < other.order_ts() {
            (self, other)
        } else {
            (other, self)
        };
        OhlcvBar {
            header: RecordHeader {
                key: later.header.key.clone(),
                time_range: self.header.time_range,
            },
            open: earlier.open,
            high: self.high.max(other.high),
            low: self.low.min(other.low),
            close: later.close,
            volume: self.volume.saturating_add(other.volume),
        }
    }

    /// True when every price field is finite.
    pub fn is_finite(&self) -> bool {
        self.open.is_finite() && self.high.is_finite() && self.low.is_finite() && self.close.is_finite()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::AggregateRecord;

    fn bar(ts: i64, o: f64, h: f64, l: f64, c: f64, v: i64) -> OhlcvBar {
        OhlcvBar::new(SymbolTimestampKey::new("ETH", ts), TimeRange::Millisecond, o, h, l, c, v)
    }

    #[test]
    fn merge_picks_extremes_and_orders_by_timestamp() {
        let a = bar(0, 0.0, 2.0, 4.0, 6.0, 8);
        let b = bar(1, 1.0, 3.0, 5.0, 7.0, 9);

        let m = a.merge_with(&b);
        assert_eq!(m.open, 0.0);
        assert_eq!(m.high, 3.0);
        assert_eq!(m.low, 4.0);
        assert_eq!(m.close, 7.0);
        assert_eq!(m.volume, 17);
        assert_eq!(m.key(), b.key());

        // Call order does not matter, only timestamps do.
        let r = b.merge_with(&a);
        assert_eq!((r.open, r.high, r.low, r.close, r.volume), (0.0, 3.0, 4.0, 7.0, 17));
        assert_eq!(r.key(), b.key());
    }

    #[test]
    fn merge_keeps_receiver_time_range() {
        let mut a = bar(10, 1.0, 1.0, 1.0, 1.0, 1);
        a.header.time_range = TimeRange::Week;
        let b = bar(20, 2.0, 2.0, 2.0, 2.0, 1);

        assert_eq!(a.merge_with(&b).time_range(), TimeRange::Week);
        assert_eq!(b.merge_with(&a).time_range(), TimeRange::Millisecond);
    }

    #[test]
    fn equal_timestamps_treat_receiver_as_later() {
        let a = bar(5, 1.0, 4.0, 0.5, 2.0, 1);
        let b = bar(5, 3.0, 3.5, 0.7, 9.0, 1);

        let m = a.merge_with(&b);
        assert_eq!(m.open, 3.0);
        assert_eq!(m.close, 2.0);
    }

    #[test]
    fn merged_key_is_an_independent_copy() {
        let a = bar(0, 1.0, 1.0, 1.0, 1.0, 1);
        let b = bar(1, 1.0, 1.0, 1.0, 1.0, 1);
        let mut m = a.merge_with(&b);
        m.header.key.as_mut().unwrap().symbol.push_str("-PERP");
        assert_eq!(b.header.symbol(), Some("ETH"));
    }
}
