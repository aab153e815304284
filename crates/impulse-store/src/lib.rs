//! Durable checkpoints for the per-symbol aggregator arena.

pub mod state_store;

pub use state_store::{StateStore, StoreError};

use impulse_core::IndicatorPipeline;
use tracing::debug;

/// Save the current state of every symbol in `pipeline`.
pub fn checkpoint_pipeline(
    store: &StateStore,
    pipeline: &IndicatorPipeline,
    timestamp_ms: i64,
) -> Result<usize, StoreError> {
    let mut saved = 0;
    for (symbol, state) in pipeline.symbols() {
        store.save_state(symbol, state, timestamp_ms)?;
        saved += 1;
    }
    debug!(saved, timestamp_ms, "pipeline checkpointed");
    Ok(saved)
}

/// Restore every checkpointed symbol into `pipeline`. Returns the number restored.
pub fn restore_pipeline(store: &StateStore, pipeline: &mut IndicatorPipeline) -> Result<usize, StoreError> {
    let states = store.load_all()?;
    let restored = states.len();
    for (symbol, state) in states {
        pipeline.restore(symbol, state);
    }
    Ok(restored)
}
