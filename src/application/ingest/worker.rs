//! Access event consumer.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::batch_writer::BatchWriterHandle;
use super::counters::CounterStore;
use super::idempotency::{Admission, IdempotencyGuard};
use crate::domain::access_event::AccessEvent;
use crate::domain::entities::{Enrichment, NewAccessRecord};
use crate::infrastructure::enrichment::{
    GeoLocator, NetworkClassLocator, RegexUserAgentParser, UserAgentParser,
};
use crate::infrastructure::transport::{Delivery, EventTransport};

/// What happened to a single delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Stored and acknowledged.
    Written,
    /// Already processed earlier; acknowledged without side effects.
    Duplicate,
    /// Unreadable payload; acknowledged and dropped.
    Discarded,
    /// Returned to the transport for redelivery.
    Retried,
}

/// Lookup services used to enrich access records.
#[derive(Clone)]
pub struct Enrichers {
    pub geo: Arc<dyn GeoLocator>,
    pub agents: Arc<dyn UserAgentParser>,
}

impl Default for Enrichers {
    fn default() -> Self {
        Self {
            geo: Arc::new(NetworkClassLocator),
            agents: Arc::new(RegexUserAgentParser),
        }
    }
}

#[derive(Clone)]
pub struct IngestWorker {
    transport: Arc<dyn EventTransport>,
    guard: IdempotencyGuard,
    counters: CounterStore,
    writer: BatchWriterHandle,
    enrichers: Enrichers,
    poll_wait: Duration,
    retry_delay: Duration,
    max_in_flight: usize,
}

impl IngestWorker {
    pub fn new(
        transport: Arc<dyn EventTransport>,
        guard: IdempotencyGuard,
        counters: CounterStore,
        writer: BatchWriterHandle,
        enrichers: Enrichers,
    ) -> Self {
        Self {
            transport,
            guard,
            counters,
            writer,
            enrichers,
            poll_wait: Duration::from_secs(1),
            retry_delay: Duration::from_millis(500),
            max_in_flight: 32,
        }
    }

    /// Sets how long one receive waits and how long to pause after a nack.
    pub fn with_timing(mut self, poll_wait: Duration, retry_delay: Duration) -> Self {
        self.poll_wait = poll_wait;
        self.retry_delay = retry_delay;
        self
    }

    /// Sets how many deliveries one worker processes concurrently.
    ///
    /// Across the pool this must reach the writer's batch size, otherwise
    /// batches only ever flush on the timer.
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    /// Consumes deliveries until `shutdown` turns true or its sender is dropped.
    ///
    /// Each delivery is handled on its own task; at most `max_in_flight` are
    /// outstanding at once. Tasks already started are awaited before returning.
    pub async fn run(self, id: usize, mut shutdown: watch::Receiver<bool>) {
        info!("Ingest worker {} started", id);

        let permits = Arc::new(Semaphore::new(self.max_in_flight));
        let mut in_flight = JoinSet::new();

        loop {
            if *shutdown.borrow() {
                break;
            }

            let permit = tokio::select! {
                _ = shutdown.changed() => break,
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let received = tokio::select! {
                _ = shutdown.changed() => break,
                received = self.transport.receive(self.poll_wait) => received,
            };

            match received {
                Ok(Some(delivery)) => {
                    let worker = self.clone();
                    in_flight.spawn(async move {
                        if worker.handle(delivery).await == Outcome::Retried {
                            tokio::time::sleep(worker.retry_delay).await;
                        }
                        drop(permit);
                    });
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(worker = id, error = %e, "Failed to receive access event");
                    tokio::time::sleep(self.retry_delay).await;
                }
            }

            while let Some(finished) = in_flight.try_join_next() {
                if let Err(e) = finished {
                    warn!(worker = id, error = %e, "Access event task ended abnormally");
                }
            }
        }

        while let Some(finished) = in_flight.join_next().await {
            if let Err(e) = finished {
                warn!(worker = id, error = %e, "Access event task ended abnormally");
            }
        }

        info!("Ingest worker {} stopped", id);
    }

    /// Processes one delivery and settles it with the transport.
    pub async fn handle(&self, delivery: Delivery) -> Outcome {
        let admission = match self.guard.claim(&delivery.message_id).await {
            Ok(admission) => admission,
            Err(e) => {
                warn!(
                    message_id = %delivery.message_id,
                    error = %e,
                    "Idempotency check failed"
                );
                self.nack(delivery).await;
                return Outcome::Retried;
            }
        };

        if admission == Admission::Duplicate {
            metrics::counter!("ingest_duplicates_total").increment(1);
            self.ack(&delivery).await;
            return Outcome::Duplicate;
        }

        let event = match AccessEvent::from_json(&delivery.payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(
                    message_id = %delivery.message_id,
                    error = %e,
                    "Discarding malformed access event"
                );
                metrics::counter!("ingest_discarded_total").increment(1);
                self.ack(&delivery).await;
                return Outcome::Discarded;
            }
        };

        let enrichment = self.enrich(&event).await;
        let record = NewAccessRecord::from_event(&event, enrichment);

        let (written, counted) = tokio::join!(
            self.writer.submit(record.clone()),
            self.counters.record(&record)
        );

        if let Err(e) = counted {
            warn!(code = %record.code, error = %e, "Failed to update access counters");
        }

        match written {
            Ok(()) => {
                debug!("Access {} for {} stored", record.message_id, record.code);
                self.ack(&delivery).await;
                Outcome::Written
            }
            Err(e) => {
                warn!(
                    message_id = %delivery.message_id,
                    attempt = delivery.attempt,
                    error = %e,
                    "Failed to store access record"
                );
                if let Err(e) = self.guard.release(&delivery.message_id).await {
                    warn!(error = %e, "Failed to release idempotency token");
                }
                self.nack(delivery).await;
                Outcome::Retried
            }
        }
    }

    /// Runs geolocation and user-agent lookups concurrently; failures leave
    /// their fields empty.
    async fn enrich(&self, event: &AccessEvent) -> Enrichment {
        let geo = async {
            let ip = event.client_ip.as_deref()?;
            self.enrichers
                .geo
                .locate(ip)
                .await
                .inspect_err(|e| debug!(ip, error = %e, "Geolocation failed"))
                .ok()
        };
        let agent = async {
            let user_agent = event.headers.user_agent.as_deref()?;
            self.enrichers
                .agents
                .parse(user_agent)
                .await
                .inspect_err(|e| debug!(error = %e, "User agent lookup failed"))
                .ok()
        };

        let (geo, agent) = tokio::join!(geo, agent);
        let geo = geo.unwrap_or_default();
        let agent = agent.unwrap_or_default();

        Enrichment {
            browser: agent.browser,
            os: agent.os,
            device: agent.device,
            country: geo.country,
            region: geo.region,
            city: geo.city,
        }
    }

    async fn ack(&self, delivery: &Delivery) {
        match self.transport.ack(delivery).await {
            Ok(()) => metrics::counter!("ingest_acks_total").increment(1),
            Err(e) => warn!(error = %e, "Failed to ack access event"),
        }
    }

    async fn nack(&self, delivery: Delivery) {
        match self.transport.nack(delivery).await {
            Ok(()) => metrics::counter!("ingest_nacks_total").increment(1),
            Err(e) => warn!(error = %e, "Failed to nack access event"),
        }
    }
}
