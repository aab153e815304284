use crate::bar::OhlcvBar;
use crate::record::{AggregateRecord, RecordError, TimeRange};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Folds consecutive bars of one symbol into coarser buckets (e.g. daily → weekly).
///
/// The open bucket is emitted once a bar from a later bucket arrives. The emitted bar
/// carries the target time range and the key of the last bar merged into it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarUpsampler {
    target: TimeRange,
    pending: Option<OhlcvBar>,
}

impl BarUpsampler {
    pub fn new(target: TimeRange) -> Self {
        Self {
            target,
            pending: None,
        }
    }

    pub fn pending(&self) -> Option<&OhlcvBar> {
        self.pending.as_ref()
    }

    /// Add a bar; returns the previous bucket when `bar` starts a new one.
    ///
    /// Bars belonging to a bucket older than the open one are dropped.
    pub fn push(&mut self, bar: &OhlcvBar) -> Result<Option<OhlcvBar>, RecordError> {
        let ts = bar.header.timestamp().ok_or(RecordError::MissingKey)?;
        let bucket = self.target.align(ts);

        let Some(pending) = self.pending.as_ref() else {
            self.pending = Some(self.retag(bar));
            return Ok(None);
        };
        let open_bucket = pending.time_range_timestamp()?;

        if bucket == open_bucket {
            self.pending = Some(pending.merge_with(bar));
            Ok(None)
        } else if bucket > open_bucket {
            let fresh = self.retag(bar);
            Ok(self.pending.replace(fresh))
        } else {
            warn!(
                symbol = bar.header.symbol().unwrap_or_default(),
                ts,
                open_bucket,
                "upsample: dropping bar older than the open bucket"
            );
            Ok(None)
        }
    }

    /// Emit the open bucket, if any, e.g. at end of stream.
    pub fn flush(&mut self) -> Option<OhlcvBar> {
        self.pending.take()
    }

    fn retag(&self, bar: &OhlcvBar) -> OhlcvBar {
        let mut bar = bar.clone();
        bar.header.time_range = self.target;
        bar
    }
}
