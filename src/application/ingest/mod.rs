//! Asynchronous access-event ingestion.
//!
//! Redirects publish [`AccessEvent`](crate::domain::access_event::AccessEvent)s
//! without waiting. A pool of [`IngestWorker`]s consumes them, drops
//! redeliveries through an idempotency token, enriches each event and hands
//! it to a single [`BatchWriter`] that flushes on size or time.

mod batch_writer;
mod counters;
mod idempotency;
mod worker;

pub use batch_writer::{BatchWriter, BatchWriterHandle, WriterSettings};
pub use counters::{AccessCounters, CounterStore};
pub use idempotency::{Admission, IdempotencyGuard};
pub use worker::{Enrichers, IngestWorker, Outcome};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::domain::repositories::AccessRepository;
use crate::domain::sharding::ShardRouter;
use crate::infrastructure::kv::RemoteStore;
use crate::infrastructure::transport::EventTransport;

#[derive(Debug, Clone)]
pub struct IngestSettings {
    pub workers: usize,
    /// Deliveries each worker handles concurrently.
    pub max_in_flight: usize,
    pub writer: WriterSettings,
    pub idempotency_ttl: Duration,
    /// Upper bound on one receive call; also bounds shutdown latency.
    pub poll_wait: Duration,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            workers: 4,
            max_in_flight: 32,
            writer: WriterSettings::default(),
            idempotency_ttl: Duration::from_secs(24 * 3600),
            poll_wait: Duration::from_secs(1),
        }
    }
}

/// Running worker pool plus its batch writer.
pub struct IngestionPipeline {
    shutdown: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
    writer: JoinHandle<()>,
}

impl IngestionPipeline {
    pub fn start(
        transport: Arc<dyn EventTransport>,
        store: Arc<dyn RemoteStore>,
        access: Arc<dyn AccessRepository>,
        router: ShardRouter,
        enrichers: Enrichers,
        settings: IngestSettings,
    ) -> Self {
        let (handle, writer) = BatchWriter::spawn(access, router, settings.writer.clone());
        let (shutdown, stop) = watch::channel(false);

        let worker = IngestWorker::new(
            transport,
            IdempotencyGuard::new(store.clone(), settings.idempotency_ttl),
            CounterStore::new(store),
            handle,
            enrichers,
        )
        .with_timing(settings.poll_wait, settings.poll_wait / 2)
        .with_max_in_flight(settings.max_in_flight);

        let workers = (0..settings.workers.max(1))
            .map(|id| tokio::spawn(worker.clone().run(id, stop.clone())))
            .collect();

        info!(
            "✓ Ingestion pipeline started with {} workers",
            settings.workers.max(1)
        );

        Self {
            shutdown,
            workers,
            writer,
        }
    }

    /// Stops the workers, then waits for the writer to flush what it holds.
    pub async fn shutdown(self) {
        info!("Stopping ingestion pipeline");
        let _ = self.shutdown.send(true);

        for worker in self.workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "Ingest worker ended abnormally");
            }
        }

        // The last writer handle went away with the workers.
        if let Err(e) = self.writer.await {
            warn!(error = %e, "Batch writer ended abnormally");
        }

        info!("✓ Ingestion pipeline stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::access_event::{AccessEvent, RequestMeta};
    use crate::domain::repositories::MockAccessRepository;
    use crate::infrastructure::kv::MemoryStore;
    use crate::infrastructure::transport::MemoryTransport;
    use std::sync::Mutex;

    #[tokio::test]
    async fn test_pipeline_writes_published_events_and_drains_on_shutdown() {
        let written = Arc::new(Mutex::new(0usize));
        let sink = written.clone();
        let mut repo = MockAccessRepository::new();
        repo.expect_insert_batch().returning(move |records| {
            *sink.lock().unwrap() += records.len();
            Ok(records.len() as u64)
        });

        let transport = Arc::new(MemoryTransport::new());
        let settings = IngestSettings {
            workers: 2,
            writer: WriterSettings {
                batch_size: 10,
                flush_interval: Duration::from_millis(20),
                queue_capacity: 100,
            },
            poll_wait: Duration::from_millis(20),
            ..IngestSettings::default()
        };
        let pipeline = IngestionPipeline::start(
            transport.clone(),
            Arc::new(MemoryStore::new()),
            Arc::new(repo),
            ShardRouter::new(4),
            Enrichers::default(),
            settings,
        );

        for i in 0..5 {
            let event = AccessEvent::new(
                format!("code{i}"),
                "https://example.com".to_string(),
                RequestMeta::default(),
                None,
                None,
            );
            transport.publish(&event).await.unwrap();
        }

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while transport.acked_count() < 5 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        pipeline.shutdown().await;
        assert_eq!(transport.acked_count(), 5);
        assert_eq!(*written.lock().unwrap(), 5);
    }
}
