//! PostgreSQL implementation of the access record repository.

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::sync::Arc;
use tracing::{debug, info};

use crate::domain::entities::NewAccessRecord;
use crate::domain::repositories::{AccessRepository, BatchWriteError};
use crate::domain::sharding::{ACCESS_TABLE, ShardRouter};
use crate::error::AppError;

/// PostgreSQL repository for access records.
///
/// Records live in `access_records_{i}` partitions routed by short code. A
/// unique `message_id` per partition turns replays into no-ops.
pub struct PgAccessRepository {
    pool: Arc<PgPool>,
    router: ShardRouter,
}

impl PgAccessRepository {
    /// Creates a new repository with a database connection pool.
    pub fn new(pool: Arc<PgPool>, router: ShardRouter) -> Self {
        Self { pool, router }
    }
}

#[async_trait]
impl AccessRepository for PgAccessRepository {
    async fn ensure_schema(&self) -> Result<(), AppError> {
        for table in self.router.partitions(ACCESS_TABLE) {
            let ddl = format!(
                r#"
                CREATE TABLE IF NOT EXISTS {table} (
                    id BIGSERIAL PRIMARY KEY,
                    message_id UUID NOT NULL UNIQUE,
                    code TEXT NOT NULL,
                    long_url TEXT NOT NULL,
                    client_ip TEXT,
                    client_uid TEXT,
                    user_agent TEXT,
                    referer TEXT,
                    browser TEXT,
                    os TEXT,
                    device TEXT,
                    country TEXT,
                    region TEXT,
                    city TEXT,
                    accessed_at TIMESTAMPTZ NOT NULL
                )
                "#
            );
            sqlx::query(&ddl).execute(self.pool.as_ref()).await?;

            let index = format!("CREATE INDEX IF NOT EXISTS {table}_code_idx ON {table} (code)");
            sqlx::query(&index).execute(self.pool.as_ref()).await?;
        }

        info!(
            "✓ Access partitions ready ({} shards)",
            self.router.shard_count()
        );
        Ok(())
    }

    async fn insert_batch(&self, records: &[NewAccessRecord]) -> Result<u64, BatchWriteError> {
        let mut applied = 0;
        let mut inserted = 0;

        let runs = records.chunk_by(|a, b| self.router.index(&a.code) == self.router.index(&b.code));
        for run in runs {
            let table = self.router.partition(ACCESS_TABLE, &run[0].code);

            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(format!(
                "INSERT INTO {table} (message_id, code, long_url, client_ip, client_uid, \
                 user_agent, referer, browser, os, device, country, region, city, accessed_at) "
            ));
            qb.push_values(run, |mut row, r| {
                row.push_bind(r.message_id)
                    .push_bind(r.code.as_str())
                    .push_bind(r.long_url.as_str())
                    .push_bind(r.client_ip.as_deref())
                    .push_bind(r.client_uid.as_deref())
                    .push_bind(r.user_agent.as_deref())
                    .push_bind(r.referer.as_deref())
                    .push_bind(r.enrichment.browser.as_deref())
                    .push_bind(r.enrichment.os.as_deref())
                    .push_bind(r.enrichment.device.as_deref())
                    .push_bind(r.enrichment.country.as_deref())
                    .push_bind(r.enrichment.region.as_deref())
                    .push_bind(r.enrichment.city.as_deref())
                    .push_bind(r.accessed_at);
            });
            qb.push(" ON CONFLICT (message_id) DO NOTHING");

            match qb.build().execute(self.pool.as_ref()).await {
                Ok(result) => {
                    debug!(
                        "Wrote {} of {} access records to {}",
                        result.rows_affected(),
                        run.len(),
                        table
                    );
                    inserted += result.rows_affected();
                    applied += run.len();
                }
                Err(e) => {
                    return Err(BatchWriteError {
                        applied,
                        source: e.into(),
                    });
                }
            }
        }

        Ok(inserted)
    }

    async fn count_by_code(&self, code: &str) -> Result<i64, AppError> {
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE code = $1",
            self.router.partition(ACCESS_TABLE, code)
        );

        let count = sqlx::query_scalar::<_, i64>(&sql)
            .bind(code)
            .fetch_one(self.pool.as_ref())
            .await?;

        Ok(count)
    }
}
