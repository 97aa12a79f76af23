//! Per-code access counters kept on the shared store.

use serde::Serialize;
use std::sync::Arc;

use crate::domain::entities::NewAccessRecord;
use crate::infrastructure::kv::{PipelineOp, RemoteStore, StoreResult};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AccessCounters {
    pub page_views: u64,
    pub unique_visitors: u64,
    pub unique_ips: u64,
}

/// Page-view counter plus visitor and IP cardinality estimators per code.
#[derive(Clone)]
pub struct CounterStore {
    store: Arc<dyn RemoteStore>,
}

fn page_views_key(code: &str) -> String {
    format!("stats:pv:{code}")
}

fn visitors_key(code: &str) -> String {
    format!("stats:uv:{code}")
}

fn ips_key(code: &str) -> String {
    format!("stats:uip:{code}")
}

impl CounterStore {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self { store }
    }

    /// Counts one access in a single pipelined round trip.
    pub async fn record(&self, record: &NewAccessRecord) -> StoreResult<()> {
        let mut ops = vec![PipelineOp::Incr(page_views_key(&record.code))];
        if let Some(uid) = &record.client_uid {
            ops.push(PipelineOp::PfAdd(visitors_key(&record.code), uid.clone()));
        }
        if let Some(ip) = &record.client_ip {
            ops.push(PipelineOp::PfAdd(ips_key(&record.code), ip.clone()));
        }
        self.store.pipeline(ops).await
    }

    pub async fn fetch(&self, code: &str) -> StoreResult<AccessCounters> {
        let pv_key = page_views_key(code);
        let uv_key = visitors_key(code);
        let uip_key = ips_key(code);

        let (page_views, unique_visitors, unique_ips) = tokio::try_join!(
            self.store.get(&pv_key),
            self.store.pfcount(&uv_key),
            self.store.pfcount(&uip_key),
        )?;

        Ok(AccessCounters {
            page_views: page_views.and_then(|v| v.parse().ok()).unwrap_or(0),
            unique_visitors,
            unique_ips,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::Enrichment;
    use crate::infrastructure::kv::MemoryStore;
    use chrono::Utc;
    use uuid::Uuid;

    fn access(uid: Option<&str>, ip: Option<&str>) -> NewAccessRecord {
        NewAccessRecord {
            message_id: Uuid::new_v4(),
            code: "abc".to_string(),
            long_url: "https://example.com".to_string(),
            client_ip: ip.map(str::to_string),
            client_uid: uid.map(str::to_string),
            user_agent: None,
            referer: None,
            enrichment: Enrichment::default(),
            accessed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_counts_views_visitors_and_ips() {
        let counters = CounterStore::new(Arc::new(MemoryStore::new()));

        counters.record(&access(Some("u1"), Some("1.1.1.1"))).await.unwrap();
        counters.record(&access(Some("u1"), Some("1.1.1.1"))).await.unwrap();
        counters.record(&access(Some("u2"), Some("1.1.1.1"))).await.unwrap();
        counters.record(&access(None, None)).await.unwrap();

        let stats = counters.fetch("abc").await.unwrap();
        assert_eq!(
            stats,
            AccessCounters {
                page_views: 4,
                unique_visitors: 2,
                unique_ips: 1,
            }
        );
    }

    #[tokio::test]
    async fn test_unknown_code_is_zero() {
        let counters = CounterStore::new(Arc::new(MemoryStore::new()));
        assert_eq!(
            counters.fetch("none").await.unwrap(),
            AccessCounters::default()
        );
    }
}
