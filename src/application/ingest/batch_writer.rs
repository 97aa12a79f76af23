//! Batching writer for access records.
//!
//! Workers submit records through a bounded queue and wait for their
//! individual result. A single writer task accumulates records and flushes
//! when the batch is full or the flush timer fires, whichever comes first.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::domain::entities::NewAccessRecord;
use crate::domain::repositories::{AccessRepository, BatchWriteError};
use crate::domain::sharding::ShardRouter;
use crate::error::AppError;

/// Flush attempts made for leftovers once the queue has closed.
const DRAIN_ATTEMPTS: usize = 3;

#[derive(Debug, Clone)]
pub struct WriterSettings {
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub queue_capacity: usize,
}

impl Default for WriterSettings {
    fn default() -> Self {
        Self {
            batch_size: 100,
            flush_interval: Duration::from_millis(500),
            queue_capacity: 10_000,
        }
    }
}

struct Pending {
    record: NewAccessRecord,
    done: oneshot::Sender<Result<(), AppError>>,
}

/// Submission side of the writer; cheap to clone.
#[derive(Clone)]
pub struct BatchWriterHandle {
    tx: mpsc::Sender<Pending>,
}

impl BatchWriterHandle {
    /// Queues `record` and waits until its batch has been written.
    ///
    /// # Errors
    ///
    /// Returns the write error if this record's insert failed, or
    /// [`AppError::Internal`] if the writer has stopped.
    pub async fn submit(&self, record: NewAccessRecord) -> Result<(), AppError> {
        let (done, result) = oneshot::channel();
        self.tx
            .send(Pending { record, done })
            .await
            .map_err(|_| AppError::internal("Batch writer stopped", json!({})))?;

        result.await.map_err(|_| {
            AppError::internal("Batch writer dropped the record", json!({}))
        })?
    }
}

pub struct BatchWriter {
    repository: Arc<dyn AccessRepository>,
    router: ShardRouter,
    settings: WriterSettings,
}

impl BatchWriter {
    /// Starts the writer task.
    ///
    /// The task runs until every [`BatchWriterHandle`] is dropped, then
    /// flushes what is left and exits.
    pub fn spawn(
        repository: Arc<dyn AccessRepository>,
        router: ShardRouter,
        settings: WriterSettings,
    ) -> (BatchWriterHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(settings.queue_capacity.max(1));
        let writer = Self {
            repository,
            router,
            settings,
        };
        let task = tokio::spawn(writer.run(rx));
        (BatchWriterHandle { tx }, task)
    }

    async fn run(self, mut rx: mpsc::Receiver<Pending>) {
        let batch_size = self.settings.batch_size.max(1);
        let mut batch: Vec<Pending> = Vec::with_capacity(batch_size);
        let mut ticker = tokio::time::interval_at(
            tokio::time::Instant::now() + self.settings.flush_interval,
            self.settings.flush_interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Batch writer started (batch size {}, flush every {:?})",
            batch_size, self.settings.flush_interval
        );

        loop {
            tokio::select! {
                next = rx.recv() => match next {
                    Some(pending) => {
                        batch.push(pending);
                        if batch.len() >= batch_size {
                            self.flush(&mut batch).await;
                        }
                    }
                    None => break,
                },
                _ = ticker.tick() => {
                    if !batch.is_empty() {
                        self.flush(&mut batch).await;
                    }
                }
            }
        }

        for _ in 0..DRAIN_ATTEMPTS {
            if batch.is_empty() {
                break;
            }
            self.flush(&mut batch).await;
        }
        for pending in batch.drain(..) {
            let _ = pending.done.send(Err(AppError::internal(
                "Batch writer shut down before the record was written",
                json!({ "message_id": pending.record.message_id }),
            )));
        }

        info!("Batch writer stopped");
    }

    /// Writes `batch` sorted by partition.
    ///
    /// On a partial failure the written prefix is acknowledged, the failing
    /// record receives the error and the rest stays in `batch` for the next
    /// flush.
    async fn flush(&self, batch: &mut Vec<Pending>) {
        batch.sort_by_key(|p| self.router.index(&p.record.code));
        let records: Vec<NewAccessRecord> = batch.iter().map(|p| p.record.clone()).collect();

        match self.repository.insert_batch(&records).await {
            Ok(inserted) => {
                debug!(
                    "Flushed {} access records ({} new)",
                    records.len(),
                    inserted
                );
                metrics::counter!("ingest_batch_flushes_total").increment(1);
                for pending in batch.drain(..) {
                    let _ = pending.done.send(Ok(()));
                }
            }
            Err(BatchWriteError { applied, source }) => {
                warn!(
                    error = %source,
                    applied,
                    total = records.len(),
                    "Access batch partially written"
                );
                metrics::counter!("ingest_batch_failures_total").increment(1);

                let mut rest = batch.split_off(applied.min(batch.len()));
                for pending in batch.drain(..) {
                    let _ = pending.done.send(Ok(()));
                }
                if !rest.is_empty() {
                    let failed = rest.remove(0);
                    let _ = failed.done.send(Err(source));
                }
                *batch = rest;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::Enrichment;
    use crate::domain::repositories::MockAccessRepository;
    use chrono::Utc;
    use std::sync::Mutex;
    use uuid::Uuid;

    fn access(code: &str) -> NewAccessRecord {
        NewAccessRecord {
            message_id: Uuid::new_v4(),
            code: code.to_string(),
            long_url: "https://example.com".to_string(),
            client_ip: None,
            client_uid: None,
            user_agent: None,
            referer: None,
            enrichment: Enrichment::default(),
            accessed_at: Utc::now(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_flushes_when_batch_is_full() {
        let mut repo = MockAccessRepository::new();
        repo.expect_insert_batch()
            .times(1)
            .withf(|records| records.len() == 2)
            .returning(|records| Ok(records.len() as u64));

        let settings = WriterSettings {
            batch_size: 2,
            flush_interval: Duration::from_secs(3600),
            queue_capacity: 10,
        };
        let (handle, _task) = BatchWriter::spawn(Arc::new(repo), ShardRouter::new(4), settings);

        let (a, b) = tokio::join!(handle.submit(access("a")), handle.submit(access("b")));
        assert!(a.is_ok() && b.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_flushes_on_timer() {
        let mut repo = MockAccessRepository::new();
        repo.expect_insert_batch()
            .times(1)
            .returning(|records| Ok(records.len() as u64));

        let settings = WriterSettings {
            batch_size: 100,
            flush_interval: Duration::from_millis(200),
            queue_capacity: 10,
        };
        let (handle, _task) = BatchWriter::spawn(Arc::new(repo), ShardRouter::new(4), settings);

        handle.submit(access("a")).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_failure_retries_remainder() {
        let calls = Arc::new(Mutex::new(Vec::<usize>::new()));
        let seen = calls.clone();

        let mut repo = MockAccessRepository::new();
        repo.expect_insert_batch().returning(move |records| {
            let mut seen = seen.lock().unwrap();
            seen.push(records.len());
            if seen.len() == 1 {
                Err(BatchWriteError {
                    applied: 1,
                    source: AppError::internal("Database error", json!({})),
                })
            } else {
                Ok(records.len() as u64)
            }
        });

        let settings = WriterSettings {
            batch_size: 3,
            flush_interval: Duration::from_millis(100),
            queue_capacity: 10,
        };
        let (handle, _task) = BatchWriter::spawn(Arc::new(repo), ShardRouter::new(1), settings);

        let (a, b, c) = tokio::join!(
            handle.submit(access("a")),
            handle.submit(access("b")),
            handle.submit(access("c"))
        );

        let outcomes = [a.is_ok(), b.is_ok(), c.is_ok()];
        assert_eq!(outcomes.iter().filter(|ok| **ok).count(), 2);
        assert_eq!(*calls.lock().unwrap(), vec![3, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_after_last_handle_drops() {
        let written = Arc::new(Mutex::new(0usize));
        let counter = written.clone();

        let mut repo = MockAccessRepository::new();
        repo.expect_insert_batch().returning(move |records| {
            *counter.lock().unwrap() += records.len();
            Ok(records.len() as u64)
        });

        let settings = WriterSettings {
            batch_size: 100,
            flush_interval: Duration::from_secs(3600),
            queue_capacity: 10,
        };
        let (handle, task) = BatchWriter::spawn(Arc::new(repo), ShardRouter::new(2), settings);

        let submit = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.submit(access("a")).await })
        };
        tokio::task::yield_now().await;
        drop(handle);

        // The pending submit keeps the queue open until the timer flushes it.
        task.await.unwrap();
        submit.await.unwrap().unwrap();
        assert_eq!(*written.lock().unwrap(), 1);
    }
}
