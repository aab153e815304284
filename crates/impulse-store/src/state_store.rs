//! SQLite-backed checkpoints for per-symbol [`SymbolState`].
//!
//! Each save appends a row; loads read the newest row per symbol and verify its
//! SHA-256 checksum before deserializing. A row that fails either check is fatal for
//! that symbol: it is reported, never silently replaced with fresh state.

use impulse_core::SymbolState;
use rusqlite::{params, Connection};
use sha2::{Digest, Sha256};
use std::path::Path;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("checksum mismatch for {symbol}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        symbol: String,
        expected: String,
        actual: String,
    },
}

fn sha256_hex(data: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn ensure_table(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS aggregator_state (
             id           INTEGER PRIMARY KEY,
             symbol       TEXT    NOT NULL,
             timestamp_ms INTEGER NOT NULL,
             state_json   TEXT    NOT NULL,
             checksum     TEXT    NOT NULL
         );
         CREATE INDEX IF NOT EXISTS idx_aggregator_state_symbol
             ON aggregator_state (symbol, id);",
    )?;
    Ok(())
}

fn decode(symbol: &str, json: &str, stored_checksum: String) -> Result<SymbolState, StoreError> {
    let actual = sha256_hex(json);
    if actual != stored_checksum {
        return Err(StoreError::ChecksumMismatch {
            symbol: symbol.to_string(),
            expected: stored_checksum,
            actual,
        });
    }
    Ok(serde_json::from_str(json)?)
}

/// Checkpoint store over one SQLite file.
pub struct StateStore {
    conn: Connection,
}

impl StateStore {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(db_path)?;
        ensure_table(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        ensure_table(&conn)?;
        Ok(Self { conn })
    }

    /// Serialize `state`, checksum it and append a row for `symbol`.
    pub fn save_state(&self, symbol: &str, state: &SymbolState, timestamp_ms: i64) -> Result<(), StoreError> {
        let json = serde_json::to_string(state)?;
        let checksum = sha256_hex(&json);
        self.conn.execute(
            "INSERT INTO aggregator_state (symbol, timestamp_ms, state_json, checksum)
             VALUES (?1, ?2, ?3, ?4)",
            params![symbol, timestamp_ms, json, checksum],
        )?;
        info!(symbol, timestamp_ms, bar_count = state.bar_count, "checkpoint saved");
        Ok(())
    }

    /// Newest checkpoint for `symbol`, or `None` if it has never been saved.
    pub fn load_state(&self, symbol: &str) -> Result<Option<SymbolState>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT state_json, checksum FROM aggregator_state
             WHERE symbol = ?1 ORDER BY id DESC LIMIT 1",
        )?;
        let row = stmt.query_row([symbol], |row| {
            let json: String = row.get(0)?;
            let checksum: String = row.get(1)?;
            Ok((json, checksum))
        });

        match row {
            Ok((json, checksum)) => decode(symbol, &json, checksum).map(Some),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Sqlite(e)),
        }
    }

    /// Newest checkpoint of every symbol, ordered by symbol.
    pub fn load_all(&self) -> Result<Vec<(String, SymbolState)>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT s.symbol, s.state_json, s.checksum FROM aggregator_state s
             JOIN (SELECT symbol, MAX(id) AS id FROM aggregator_state GROUP BY symbol) latest
               ON s.id = latest.id
             ORDER BY s.symbol",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (symbol, json, checksum) = row?;
            let state = decode(&symbol, &json, checksum)?;
            out.push((symbol, state));
        }
        info!(symbols = out.len(), "checkpoints loaded");
        Ok(out)
    }

    /// Delete all but the newest `keep` rows of `symbol`. Returns the number deleted.
    pub fn prune(&self, symbol: &str, keep: usize) -> Result<usize, StoreError> {
        let keep = i64::try_from(keep).unwrap_or(i64::MAX);
        let deleted = self.conn.execute(
            "DELETE FROM aggregator_state WHERE symbol = ?1 AND id NOT IN (
                 SELECT id FROM aggregator_state WHERE symbol = ?1 ORDER BY id DESC LIMIT ?2
             )",
            params![symbol, keep],
        )?;
        Ok(deleted)
    }
}
