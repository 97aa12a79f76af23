//! In-process [`EventTransport`].

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

use super::event_transport::{Delivery, EventTransport, TransportError, TransportResult};
use crate::domain::access_event::AccessEvent;

/// Unbounded in-memory queue with ack tracking.
///
/// Suitable for single-node runs; undelivered and pending messages are lost
/// when the process exits.
pub struct MemoryTransport {
    tx: mpsc::UnboundedSender<Delivery>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Delivery>>,
    pending: Mutex<HashMap<String, Delivery>>,
    next_tag: AtomicU64,
    acked: AtomicU64,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: tokio::sync::Mutex::new(rx),
            pending: Mutex::new(HashMap::new()),
            next_tag: AtomicU64::new(1),
            acked: AtomicU64::new(0),
        }
    }
}

impl MemoryTransport {
    pub fn new() -> Self {
        debug!("Using in-memory event transport");
        Self::default()
    }

    fn enqueue(&self, message_id: String, payload: String, attempt: u32) -> TransportResult<()> {
        let tag = self.next_tag.fetch_add(1, Ordering::Relaxed).to_string();
        self.tx
            .send(Delivery {
                tag,
                message_id,
                payload,
                attempt,
            })
            .map_err(|_| TransportError::Publish("queue closed".to_string()))
    }

    /// Deliveries handed out but not yet acked or nacked.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Total successful acks.
    pub fn acked_count(&self) -> u64 {
        self.acked.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl EventTransport for MemoryTransport {
    async fn publish(&self, event: &AccessEvent) -> TransportResult<()> {
        let payload = event
            .to_json()
            .map_err(|e| TransportError::Publish(e.to_string()))?;
        self.enqueue(event.message_id.to_string(), payload, 1)
    }

    async fn receive(&self, max_wait: Duration) -> TransportResult<Option<Delivery>> {
        let mut rx = match tokio::time::timeout(max_wait, self.rx.lock()).await {
            Ok(rx) => rx,
            Err(_) => return Ok(None),
        };

        match tokio::time::timeout(max_wait, rx.recv()).await {
            Ok(Some(delivery)) => {
                self.pending
                    .lock()
                    .insert(delivery.tag.clone(), delivery.clone());
                Ok(Some(delivery))
            }
            Ok(None) => Err(TransportError::Receive("queue closed".to_string())),
            Err(_) => Ok(None),
        }
    }

    async fn ack(&self, delivery: &Delivery) -> TransportResult<()> {
        if self.pending.lock().remove(&delivery.tag).is_none() {
            return Err(TransportError::Ack {
                tag: delivery.tag.clone(),
                reason: "unknown or already acknowledged".to_string(),
            });
        }
        self.acked.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn nack(&self, delivery: Delivery) -> TransportResult<()> {
        self.pending.lock().remove(&delivery.tag);
        self.enqueue(delivery.message_id, delivery.payload, delivery.attempt + 1)
    }

    async fn ping(&self) -> TransportResult<()> {
        Ok(())
    }
}
