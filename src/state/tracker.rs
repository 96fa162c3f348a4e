//! Durable GSN store.
//!
//! Persists exactly one fact across restarts: the highest GSN this node has
//! locally observed. Election state (candidate, term, current leader) is
//! never persisted -- on restart a node rejoins with only its last known
//! GSN and re-derives everything else through the election protocol.

use std::path::PathBuf;

use rusqlite::{params, Connection};
use tokio::sync::RwLock;

use crate::error::Result;
use crate::types::Gsn;

pub struct StateTracker {
    conn: RwLock<Connection>,
}

impl StateTracker {
    pub fn new(data_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&data_dir)?;
        let db_path = data_dir.join("state.db");
        let conn = Connection::open(&db_path)?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS node_state (
                key TEXT PRIMARY KEY,
                value_int INTEGER NOT NULL
            );
            "#,
        )?;

        Ok(Self {
            conn: RwLock::new(conn),
        })
    }

    /// The highest GSN locally observed, or 0 if this node has never
    /// accepted an operation.
    pub async fn last_observed_gsn(&self) -> Result<Gsn> {
        let conn = self.conn.read().await;
        let result: std::result::Result<i64, _> = conn.query_row(
            "SELECT value_int FROM node_state WHERE key = 'last_observed_gsn'",
            [],
            |row| row.get(0),
        );

        match result {
            Ok(gsn) => Ok(gsn as Gsn),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    /// Record a newly observed GSN. A no-op if `gsn` does not advance the
    /// stored watermark -- this store only ever moves forward.
    pub async fn advance_gsn(&self, gsn: Gsn) -> Result<()> {
        let conn = self.conn.write().await;
        conn.execute(
            r#"
            INSERT INTO node_state (key, value_int) VALUES ('last_observed_gsn', ?1)
            ON CONFLICT(key) DO UPDATE SET value_int = MAX(value_int, ?1)
            "#,
            params![gsn as i64],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn starts_at_zero_and_only_moves_forward() {
        let dir = tempdir().unwrap();
        let tracker = StateTracker::new(dir.path().to_path_buf()).unwrap();

        assert_eq!(tracker.last_observed_gsn().await.unwrap(), 0);

        tracker.advance_gsn(10).await.unwrap();
        assert_eq!(tracker.last_observed_gsn().await.unwrap(), 10);

        tracker.advance_gsn(3).await.unwrap();
        assert_eq!(tracker.last_observed_gsn().await.unwrap(), 10);

        tracker.advance_gsn(25).await.unwrap();
        assert_eq!(tracker.last_observed_gsn().await.unwrap(), 25);
    }

    #[tokio::test]
    async fn survives_reopen() {
        let dir = tempdir().unwrap();
        {
            let tracker = StateTracker::new(dir.path().to_path_buf()).unwrap();
            tracker.advance_gsn(7).await.unwrap();
        }
        let tracker = StateTracker::new(dir.path().to_path_buf()).unwrap();
        assert_eq!(tracker.last_observed_gsn().await.unwrap(), 7);
    }
}
