//! Trading direction state machine and the impulse classifier.
//!
//! The impulse combines trend (sign of an EMA's change) with momentum (sign of the MACD
//! histogram's change). Both the direction type and the impulse record share one
//! transition table.

use crate::indicators::MacdHistogramRecord;
use crate::record::{impl_aggregate_record, DoubleRecord, RecordHeader};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Tri-state direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradingDirection {
    Short,
    Neutral,
    Long,
}

use TradingDirection::{Long, Neutral, Short};

/// `TRANSITIONS[from][to]`, indexed by [`TradingDirection::index`].
const TRANSITIONS: [[TradingDirection; 3]; 3] = [
    //  to:  Short    Neutral  Long
    /* Short   */ [Neutral, Long, Long],
    /* Neutral */ [Short, Neutral, Long],
    /* Long    */ [Short, Short, Neutral],
];

impl TradingDirection {
    fn index(self) -> usize {
        match self {
            Short => 0,
            Neutral => 1,
            Long => 2,
        }
    }

    /// Direction of the move from `from` to `to`: toward Long, toward Short, or none.
    pub fn change_direction(from: Self, to: Self) -> Self {
        TRANSITIONS[from.index()][to.index()]
    }

    /// Classify by the signs of a trend change and a momentum change.
    pub fn from_changes(trend: f64, momentum: f64) -> Self {
        if trend > 0.0 && momentum > 0.0 {
            Long
        } else if trend < 0.0 && momentum < 0.0 {
            Short
        } else {
            Neutral
        }
    }
}

impl fmt::Display for TradingDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Short => write!(f, "short"),
            Neutral => write!(f, "neutral"),
            Long => write!(f, "long"),
        }
    }
}

// ---------------------------------------------------------------------------
// Impulse
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImpulseRecord {
    #[serde(flatten)]
    pub header: RecordHeader,
    pub trading_direction: TradingDirection,
    pub last_trading_direction: Option<TradingDirection>,
}

impl_aggregate_record!(ImpulseRecord);

impl ImpulseRecord {
    /// The move from the previous impulse to this one; Neutral without a previous one.
    pub fn change_trading_direction(&self) -> TradingDirection {
        match self.last_trading_direction {
            Some(last) => TradingDirection::change_direction(last, self.trading_direction),
            None => Neutral,
        }
    }

    pub fn is_same_impulse(&self, other: &ImpulseRecord) -> bool {
        (self.trading_direction, self.last_trading_direction)
            == (other.trading_direction, other.last_trading_direction)
    }
}

/// Remembers the last classification so each record can carry its predecessor.
///
/// A gap in either input (missing record or missing change) forgets the memory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImpulseAggregate {
    last: Option<TradingDirection>,
}

impl ImpulseAggregate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_direction(&self) -> Option<TradingDirection> {
        self.last
    }

    pub fn reset(&mut self) {
        self.last = None;
    }

    /// Classify one step. The record's header is cloned from the EMA record.
    pub fn aggregate(
        &mut self,
        ema: Option<&DoubleRecord>,
        macd: Option<&MacdHistogramRecord>,
    ) -> Option<ImpulseRecord> {
        let inputs = ema.zip(macd).and_then(|(e, m)| {
            let v = e.v_change?;
            let h = m.h_change?;
            Some((e, v, h))
        });
        let Some((ema, v_change, h_change)) = inputs else {
            self.reset();
            return None;
        };

        let direction = TradingDirection::from_changes(v_change, h_change);
        let last = self.last.replace(direction);
        Some(ImpulseRecord {
            header: ema.header.clone(),
            trading_direction: direction,
            last_trading_direction: last,
        })
    }
}
