//! External collaborator interfaces: the WAL and request-execution
//! boundaries the commit coordinator calls through but never reaches past.
//! Row encoding/decoding and request execution are opaque to this engine;
//! what ships here is the trait boundary plus a file-backed `Wal` and a
//! trivial executor used by tests and as a starting point for embedders.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::WalConfig;
use crate::error::Result;
use crate::types::{ConflictKey, Gsn, HostId, Lsn};
use crate::wal::{WalReader, WalRow, WalWriter};

/// The durable log this engine replicates. Rows are opaque bytes; the
/// engine only assigns them a GSN/LSN and checksums them.
#[async_trait]
pub trait Wal: Send + Sync {
    /// Durably append `body` at `gsn`, returning the local LSN it landed at.
    async fn write(&self, gsn: Gsn, origin_host: HostId, body: Vec<u8>) -> Result<Lsn>;

    /// Every row with `gsn >= from_gsn`, in ascending GSN order -- the
    /// shape recovery needs to replay a tail to a lagging peer.
    fn iterate_from(&self, from_gsn: Gsn) -> Result<Vec<WalRow>>;

    /// The highest GSN durably written so far.
    fn durable_gsn(&self) -> Gsn;
}

/// Decodes wire payloads into requests and executes them against whatever
/// backing store an embedder provides, producing the conflict key used for
/// admission control.
pub trait RequestExecutor: Send + Sync {
    /// Validate and extract the conflict key for a request, without
    /// applying it. Called during admission, before a GSN is assigned.
    fn conflict_key(&self, payload: &[u8]) -> Result<ConflictKey>;

    /// Apply an already-committed request's body to the backing store.
    fn execute(&self, payload: &[u8]) -> Result<()>;
}

/// File-backed `Wal` combining the segment writer and reader.
pub struct FileWal {
    writer: WalWriter,
    reader: WalReader,
    durable_gsn: Arc<AtomicU64>,
}

impl FileWal {
    pub async fn open(data_dir: PathBuf, config: WalConfig) -> Result<Self> {
        let writer = WalWriter::new(data_dir.clone(), config.clone()).await?;
        let reader = WalReader::new(data_dir, config.segment_size_mb, config.compression)?;
        let durable_gsn = Arc::new(AtomicU64::new(0));
        Ok(Self {
            writer,
            reader,
            durable_gsn,
        })
    }
}

#[async_trait]
impl Wal for FileWal {
    async fn write(&self, gsn: Gsn, origin_host: HostId, body: Vec<u8>) -> Result<Lsn> {
        let lsn = self.writer.append(gsn, origin_host, body).await?;
        self.durable_gsn.fetch_max(gsn, Ordering::SeqCst);
        Ok(lsn)
    }

    fn iterate_from(&self, from_gsn: Gsn) -> Result<Vec<WalRow>> {
        self.reader.rows_from_gsn(from_gsn)
    }

    fn durable_gsn(&self) -> Gsn {
        self.durable_gsn.load(Ordering::SeqCst)
    }
}

/// An executor that treats the payload's first 8 bytes as a big-endian
/// conflict key and otherwise does nothing -- enough to drive the
/// coordinator's admission/commit machinery in tests without a real
/// backing store.
#[derive(Default)]
pub struct EchoExecutor;

impl RequestExecutor for EchoExecutor {
    fn conflict_key(&self, payload: &[u8]) -> Result<ConflictKey> {
        let len = payload.len().min(8);
        Ok(payload[..len].to_vec())
    }

    fn execute(&self, _payload: &[u8]) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_config() -> WalConfig {
        WalConfig {
            batch_size: 10,
            flush_interval_ms: 10,
            compression: true,
            segment_size_mb: 1,
            retention_hours: 0,
            fsync: false,
        }
    }

    #[tokio::test]
    async fn file_wal_round_trips_and_tracks_durable_gsn() {
        let dir = tempdir().unwrap();
        let wal = FileWal::open(dir.path().to_path_buf(), test_config()).await.unwrap();

        wal.write(5, 0, b"alpha".to_vec()).await.unwrap();
        wal.write(6, 0, b"beta".to_vec()).await.unwrap();
        assert_eq!(wal.durable_gsn(), 6);

        let rows = wal.iterate_from(6).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].body, b"beta");
    }

    #[test]
    fn echo_executor_takes_key_prefix() {
        let executor = EchoExecutor;
        let key = executor.conflict_key(b"0123456789").unwrap();
        assert_eq!(key, b"01234567");
    }
}
