//! Redis Streams [`EventTransport`] using a consumer group.

use async_trait::async_trait;
use redis::streams::{StreamAutoClaimReply, StreamId, StreamReadReply};
use redis::{AsyncCommands, Client, aio::ConnectionManager};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

use super::event_transport::{Delivery, EventTransport, TransportError, TransportResult};
use crate::domain::access_event::AccessEvent;

/// Pause between empty reads while waiting for a message.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Approximate stream length kept by `XADD MAXLEN ~`.
const MAX_STREAM_LEN: u64 = 1_000_000;

/// Start of the group's pending entries list for `XAUTOCLAIM`.
const CLAIM_START: &str = "0-0";

/// Stream connection settings.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub stream: String,
    pub group: String,
    /// Unique among running instances; two instances sharing a name would
    /// read each other's pending entries.
    pub consumer: String,
    /// Entries pending this long on any consumer are claimed by this one.
    pub claim_idle: Duration,
}

/// Progress through entries delivered earlier but never acknowledged.
#[derive(Debug)]
struct Recovery {
    /// Last entry handed out from this consumer's own pending list; `None`
    /// once that list has been walked.
    backlog: Option<String>,
    /// Resume point of the group-wide `XAUTOCLAIM` scan.
    claim_cursor: String,
    next_claim: Instant,
}

impl Recovery {
    fn new() -> Self {
        Self {
            backlog: Some("0".to_string()),
            claim_cursor: CLAIM_START.to_string(),
            next_claim: Instant::now(),
        }
    }

    /// Records the cursor returned by a claim scan. Scanning continues
    /// immediately while entries are being claimed; otherwise it pauses for
    /// `interval`.
    fn claimed(&mut self, next_cursor: String, found: bool, interval: Duration) {
        if !found {
            self.next_claim = Instant::now() + interval;
        }
        self.claim_cursor = next_cursor;
    }
}

/// Consumer-group transport on a single Redis stream.
///
/// Reads are non-blocking `XREADGROUP` calls polled until the wait budget is
/// spent, so the multiplexed connection is never parked on a blocking read.
///
/// Before new messages, each receive gives recovery a turn: first this
/// consumer's own pending entries left by a previous run, walked once in id
/// order, then entries idle for `claim_idle` on any consumer, claimed with
/// `XAUTOCLAIM`. Recovery is serialized so concurrent receivers never get the
/// same entry.
pub struct RedisStreamTransport {
    conn: ConnectionManager,
    settings: StreamSettings,
    recovery: Mutex<Recovery>,
}

fn delivery(entry: StreamId) -> Delivery {
    Delivery {
        message_id: entry.get("message_id").unwrap_or_default(),
        payload: entry.get("payload").unwrap_or_default(),
        attempt: entry.get("attempt").unwrap_or(1),
        tag: entry.id,
    }
}

impl RedisStreamTransport {
    /// Connects and creates the consumer group if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Connection`] if Redis is unreachable or the
    /// group cannot be created.
    pub async fn connect(redis_url: &str, settings: StreamSettings) -> TransportResult<Self> {
        let client = Client::open(redis_url).map_err(|e| {
            TransportError::Connection(format!("Failed to create Redis client: {}", e))
        })?;

        let mut conn = ConnectionManager::new(client).await.map_err(|e| {
            TransportError::Connection(format!("Failed to connect to Redis: {}", e))
        })?;

        let created: redis::RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&settings.stream)
            .arg(&settings.group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match created {
            Ok(()) => info!(
                "Created consumer group {} on {}",
                settings.group, settings.stream
            ),
            Err(e) if e.code() == Some("BUSYGROUP") => {
                debug!("Consumer group {} already exists", settings.group)
            }
            Err(e) => {
                return Err(TransportError::Connection(format!(
                    "Failed to create consumer group: {}",
                    e
                )));
            }
        }

        info!(
            "✓ Event stream {} ready (consumer {})",
            settings.stream, settings.consumer
        );

        Ok(Self {
            conn,
            settings,
            recovery: Mutex::new(Recovery::new()),
        })
    }

    async fn add(&self, message_id: &str, payload: &str, attempt: u32) -> TransportResult<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("XADD")
            .arg(&self.settings.stream)
            .arg("MAXLEN")
            .arg("~")
            .arg(MAX_STREAM_LEN)
            .arg("*")
            .arg("message_id")
            .arg(message_id)
            .arg("payload")
            .arg(payload)
            .arg("attempt")
            .arg(attempt)
            .query_async(&mut conn)
            .await
            .map_err(|e| TransportError::Publish(e.to_string()))?;
        Ok(())
    }

    /// One non-blocking read; `>` reads a new entry, any other cursor the
    /// next own pending entry after it.
    async fn read_one(&self, cursor: &str) -> TransportResult<Option<Delivery>> {
        let mut conn = self.conn.clone();
        let reply: Option<StreamReadReply> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.settings.group)
            .arg(&self.settings.consumer)
            .arg("COUNT")
            .arg(1)
            .arg("STREAMS")
            .arg(&self.settings.stream)
            .arg(cursor)
            .query_async(&mut conn)
            .await
            .map_err(|e| TransportError::Receive(e.to_string()))?;

        Ok(reply
            .into_iter()
            .flat_map(|r| r.keys)
            .flat_map(|k| k.ids)
            .next()
            .map(delivery))
    }

    /// Claims one entry idle for at least `claim_idle`, scanning from `cursor`.
    /// Returns the cursor for the next scan.
    async fn claim_one(&self, cursor: &str) -> TransportResult<(String, Option<Delivery>)> {
        let mut conn = self.conn.clone();
        let reply: StreamAutoClaimReply = redis::cmd("XAUTOCLAIM")
            .arg(&self.settings.stream)
            .arg(&self.settings.group)
            .arg(&self.settings.consumer)
            .arg(u64::try_from(self.settings.claim_idle.as_millis()).unwrap_or(u64::MAX))
            .arg(cursor)
            .arg("COUNT")
            .arg(1)
            .query_async(&mut conn)
            .await
            .map_err(|e| TransportError::Receive(e.to_string()))?;

        let claimed = reply.claimed.into_iter().next().map(delivery);
        if let Some(delivery) = &claimed {
            info!(
                tag = %delivery.tag,
                attempt = delivery.attempt,
                "Claimed idle access event from another consumer"
            );
        }
        Ok((reply.next_stream_id, claimed))
    }

    /// Hands out at most one entry from recovery.
    async fn recover(&self) -> TransportResult<Option<Delivery>> {
        let mut recovery = self.recovery.lock().await;

        if let Some(cursor) = recovery.backlog.clone() {
            match self.read_one(&cursor).await? {
                Some(delivery) => {
                    recovery.backlog = Some(delivery.tag.clone());
                    return Ok(Some(delivery));
                }
                None => {
                    debug!("Pending backlog of {} drained", self.settings.consumer);
                    recovery.backlog = None;
                }
            }
        }

        if Instant::now() < recovery.next_claim {
            return Ok(None);
        }

        let (next_cursor, claimed) = self.claim_one(&recovery.claim_cursor).await?;
        recovery.claimed(next_cursor, claimed.is_some(), self.settings.claim_idle / 2);
        Ok(claimed)
    }
}

#[async_trait]
impl EventTransport for RedisStreamTransport {
    async fn publish(&self, event: &AccessEvent) -> TransportResult<()> {
        let payload = event
            .to_json()
            .map_err(|e| TransportError::Publish(e.to_string()))?;
        self.add(&event.message_id.to_string(), &payload, 1).await
    }

    async fn receive(&self, max_wait: Duration) -> TransportResult<Option<Delivery>> {
        if let Some(delivery) = self.recover().await? {
            return Ok(Some(delivery));
        }

        let deadline = Instant::now() + max_wait;
        loop {
            if let Some(delivery) = self.read_one(">").await? {
                return Ok(Some(delivery));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    async fn ack(&self, delivery: &Delivery) -> TransportResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn
            .xack(&self.settings.stream, &self.settings.group, &[&delivery.tag])
            .await
            .map_err(|e| TransportError::Ack {
                tag: delivery.tag.clone(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    async fn nack(&self, delivery: Delivery) -> TransportResult<()> {
        self.add(&delivery.message_id, &delivery.payload, delivery.attempt + 1)
            .await?;
        self.ack(&delivery).await
    }

    async fn ping(&self) -> TransportResult<()> {
        let mut conn = self.conn.clone();
        conn.ping::<()>()
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))
    }
}
