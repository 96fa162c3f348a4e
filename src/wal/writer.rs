//! The WAL writer: a cloneable handle in front of a single task that owns
//! the active segment, batches writes, and flushes on a timer or batch-size
//! threshold -- mirrors Thread A's sole ownership of the WAL in the
//! two-thread concurrency model.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot, RwLock};

use super::entry::WalRow;
use super::segment::Segment;
use super::WalPaths;
use crate::config::WalConfig;
use crate::error::{Error, Result};
use crate::types::{Gsn, HostId, Lsn};

struct WriteRequest {
    gsn: Gsn,
    origin_host: HostId,
    body: Vec<u8>,
    response: oneshot::Sender<Result<Lsn>>,
}

#[derive(Clone)]
pub struct WalWriter {
    sender: mpsc::Sender<WriteRequest>,
    state: Arc<RwLock<WriterState>>,
}

struct WriterState {
    current_lsn: Lsn,
}

struct WriterInner {
    paths: WalPaths,
    config: WalConfig,
    current_segment: Option<Segment>,
    buffer: VecDeque<(WalRow, oneshot::Sender<Result<Lsn>>)>,
    last_flush: Instant,
    state: Arc<RwLock<WriterState>>,
}

impl WalWriter {
    pub async fn new(data_dir: PathBuf, config: WalConfig) -> Result<Self> {
        let paths = WalPaths::new(data_dir);
        paths.ensure_dirs()?;

        let last_lsn = Self::find_last_lsn(&paths).await?;
        let state = Arc::new(RwLock::new(WriterState {
            current_lsn: last_lsn,
        }));

        let (sender, receiver) = mpsc::channel(10_000);
        let inner = WriterInner {
            paths,
            config,
            current_segment: None,
            buffer: VecDeque::new(),
            last_flush: Instant::now(),
            state: Arc::clone(&state),
        };

        tokio::spawn(Self::writer_task(inner, receiver));

        Ok(Self { sender, state })
    }

    async fn find_last_lsn(paths: &WalPaths) -> Result<Lsn> {
        let segments = super::segment::list_segments(&paths.base_dir)?;
        if let Some(last_path) = segments.last() {
            let mut segment = Segment::open(last_path.clone(), 64, true)?;
            let mut last_lsn = segment.first_lsn();
            for result in segment.iter() {
                if let Ok(row) = result {
                    last_lsn = row.header.lsn;
                }
            }
            Ok(last_lsn)
        } else {
            Ok(0)
        }
    }

    /// Append a row already assigned `gsn` by the coordinator (either the
    /// local leader path, or a replicated body from the leader).
    pub async fn append(&self, gsn: Gsn, origin_host: HostId, body: Vec<u8>) -> Result<Lsn> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(WriteRequest {
                gsn,
                origin_host,
                body,
                response: tx,
            })
            .await
            .map_err(|_| Error::Wal("writer task terminated".into()))?;

        rx.await.map_err(|_| Error::Wal("write cancelled".into()))?
    }

    pub async fn current_lsn(&self) -> Lsn {
        self.state.read().await.current_lsn
    }

    pub async fn flush(&self) -> Result<()> {
        // A zero-length body with no gsn is used purely to wake the writer
        // task and force a flush of whatever is already buffered.
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(WriteRequest {
                gsn: 0,
                origin_host: 0,
                body: Vec::new(),
                response: tx,
            })
            .await
            .map_err(|_| Error::Wal("writer task terminated".into()))?;
        rx.await
            .map_err(|_| Error::Wal("flush cancelled".into()))?
            .map(|_| ())
    }

    async fn writer_task(mut inner: WriterInner, mut receiver: mpsc::Receiver<WriteRequest>) {
        let flush_interval = Duration::from_millis(inner.config.flush_interval_ms);
        let batch_size = inner.config.batch_size;

        loop {
            let elapsed = inner.last_flush.elapsed();
            let timeout = flush_interval.saturating_sub(elapsed);

            tokio::select! {
                Some(request) = receiver.recv() => {
                    if request.gsn == 0 && request.body.is_empty() {
                        if let Err(e) = inner.flush_buffer().await {
                            tracing::error!(error = %e, "WAL flush failed");
                        }
                        let _ = request.response.send(Ok(0));
                    } else {
                        let lsn = {
                            let mut state = inner.state.write().await;
                            state.current_lsn += 1;
                            state.current_lsn
                        };
                        let row = WalRow::new(lsn, request.gsn, request.origin_host, request.body);
                        inner.buffer.push_back((row, request.response));

                        if inner.buffer.len() >= batch_size {
                            if let Err(e) = inner.flush_buffer().await {
                                tracing::error!(error = %e, "WAL flush failed");
                            }
                        }
                    }
                }
                _ = tokio::time::sleep(timeout) => {
                    if !inner.buffer.is_empty() {
                        if let Err(e) = inner.flush_buffer().await {
                            tracing::error!(error = %e, "WAL flush failed");
                        }
                    }
                }
            }
        }
    }
}

impl WriterInner {
    async fn flush_buffer(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        self.ensure_segment()?;

        let mut responses = Vec::new();
        while let Some((row, response)) = self.buffer.pop_front() {
            let lsn = row.header.lsn;

            let needs_rotation = {
                let segment = self.current_segment.as_ref().unwrap();
                !segment.has_space(8192)
            };

            if needs_rotation {
                self.current_segment.as_mut().unwrap().seal()?;
                let new_segment = Segment::create(
                    self.paths.segment_path(lsn),
                    lsn,
                    self.config.segment_size_mb,
                    self.config.compression,
                )?;
                self.current_segment = Some(new_segment);
            }

            let segment = self.current_segment.as_mut().unwrap();
            let result = segment.append(&row).map(|_| lsn);
            responses.push((response, result));
        }

        if self.config.fsync {
            if let Some(segment) = self.current_segment.as_ref() {
                segment.sync()?;
            }
        }

        for (response, result) in responses {
            let _ = response.send(result);
        }

        self.last_flush = Instant::now();
        Ok(())
    }

    fn ensure_segment(&mut self) -> Result<()> {
        if self.current_segment.is_none() {
            let segments = super::segment::list_segments(&self.paths.base_dir)?;

            if let Some(last_path) = segments.last() {
                let segment = Segment::open(
                    last_path.clone(),
                    self.config.segment_size_mb,
                    self.config.compression,
                )?;
                if !segment.is_sealed() && segment.has_space(8192) {
                    self.current_segment = Some(segment);
                    return Ok(());
                }
            }

            let next_lsn = futures::executor::block_on(self.state.read()).current_lsn + 1;
            let segment = Segment::create(
                self.paths.segment_path(next_lsn),
                next_lsn,
                self.config.segment_size_mb,
                self.config.compression,
            )?;
            self.current_segment = Some(segment);
        }
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
            flush_interval_ms: 50,
            compression: true,
            segment_size_mb: 1,
            retention_hours: 0,
            fsync: false,
        }
    }

    #[tokio::test]
    async fn appends_assign_increasing_lsns() {
        let dir = tempdir().unwrap();
        let writer = WalWriter::new(dir.path().to_path_buf(), test_config())
            .await
            .unwrap();

        let lsn1 = writer.append(1, 0, b"row-a".to_vec()).await.unwrap();
        let lsn2 = writer.append(2, 0, b"row-b".to_vec()).await.unwrap();
        assert_eq!(lsn1, 1);
        assert_eq!(lsn2, 2);
        assert_eq!(writer.current_lsn().await, 2);
    }

    #[tokio::test]
    async fn flush_is_idempotent_on_empty_buffer() {
        let dir = tempdir().unwrap();
        let writer = WalWriter::new(dir.path().to_path_buf(), test_config())
            .await
            .unwrap();
        writer.flush().await.unwrap();
        writer.flush().await.unwrap();
    }
}
