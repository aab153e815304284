use crate::impulse::{ImpulseRecord, TradingDirection};
use crate::record::{impl_aggregate_record, RecordHeader};
use serde::{Deserialize, Serialize};

/// A turn in the impulse: the move between two consecutive classifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalRecord {
    #[serde(flatten)]
    pub header: RecordHeader,
    /// Long when the impulse moved toward long, Short when it moved toward short.
    pub direction: TradingDirection,
    pub impulse: TradingDirection,
    pub last_impulse: TradingDirection,
    pub close: f64,
}

impl_aggregate_record!(SignalRecord);

impl SignalRecord {
    /// `None` unless the impulse turned (its change direction is not Neutral).
    pub fn from_impulse(impulse: &ImpulseRecord, close: f64) -> Option<Self> {
        let last_impulse = impulse.last_trading_direction?;
        let direction = impulse.change_trading_direction();
        if direction == TradingDirection::Neutral {
            return None;
        }
        Some(Self {
            header: impulse.header.clone(),
            direction,
            impulse: impulse.trading_direction,
            last_impulse,
            close,
        })
    }
}
