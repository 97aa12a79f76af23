//! PostgreSQL implementation of link repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use serde_json::json;
use sqlx::PgPool;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

use crate::domain::entities::{Link, LinkPatch, NewLink};
use crate::domain::repositories::LinkRepository;
use crate::domain::sharding::{LINKS_TABLE, ShardRouter, partition_name};
use crate::error::AppError;
use crate::utils::db_error::is_unique_violation_on_code;

const LINK_COLUMNS: &str = "id, code, long_url, created_at, updated_at, deleted_at";

#[derive(sqlx::FromRow)]
struct LinkRow {
    id: i64,
    code: String,
    long_url: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

impl From<LinkRow> for Link {
    fn from(r: LinkRow) -> Self {
        Link::new(
            r.id,
            r.code,
            r.long_url,
            r.created_at,
            r.updated_at,
            r.deleted_at,
        )
    }
}

/// PostgreSQL repository for link storage and retrieval.
///
/// Links live in `short_links_{i}` partitions. Table names come from the
/// router, never from user input; values are always bound parameters.
pub struct PgLinkRepository {
    pool: Arc<PgPool>,
    router: ShardRouter,
}

impl PgLinkRepository {
    /// Creates a new repository with a database connection pool.
    pub fn new(pool: Arc<PgPool>, router: ShardRouter) -> Self {
        Self { pool, router }
    }

    fn table(&self, code: &str) -> String {
        self.router.partition(LINKS_TABLE, code)
    }
}

#[async_trait]
impl LinkRepository for PgLinkRepository {
    fn shard_count(&self) -> u32 {
        self.router.shard_count()
    }

    async fn ensure_schema(&self) -> Result<(), AppError> {
        for table in self.router.partitions(LINKS_TABLE) {
            let ddl = format!(
                r#"
                CREATE TABLE IF NOT EXISTS {table} (
                    id BIGSERIAL PRIMARY KEY,
                    code TEXT NOT NULL UNIQUE,
                    long_url TEXT NOT NULL,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                    updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                    deleted_at TIMESTAMPTZ
                )
                "#
            );
            sqlx::query(&ddl).execute(self.pool.as_ref()).await?;
        }

        info!(
            "✓ Link partitions ready ({} shards)",
            self.router.shard_count()
        );
        Ok(())
    }

    async fn insert(&self, new_link: NewLink) -> Result<Link, AppError> {
        let sql = format!(
            "INSERT INTO {} (code, long_url) VALUES ($1, $2) RETURNING {LINK_COLUMNS}",
            self.table(&new_link.code)
        );

        let row = sqlx::query_as::<_, LinkRow>(&sql)
            .bind(&new_link.code)
            .bind(&new_link.long_url)
            .fetch_one(self.pool.as_ref())
            .await
            .map_err(|e| {
                if is_unique_violation_on_code(&e) {
                    AppError::conflict(
                        "Short code already exists",
                        json!({ "code": new_link.code }),
                    )
                } else {
                    AppError::from(e)
                }
            })?;

        Ok(row.into())
    }

    async fn find_by_code(&self, code: &str) -> Result<Option<Link>, AppError> {
        let sql = format!(
            "SELECT {LINK_COLUMNS} FROM {} WHERE code = $1 AND deleted_at IS NULL",
            self.table(code)
        );

        let row = sqlx::query_as::<_, LinkRow>(&sql)
            .bind(code)
            .fetch_optional(self.pool.as_ref())
            .await?;

        Ok(row.map(Link::from))
    }

    async fn find_by_codes(&self, codes: &[String]) -> Result<Vec<Link>, AppError> {
        let mut by_shard: BTreeMap<u32, Vec<String>> = BTreeMap::new();
        for code in codes {
            by_shard
                .entry(self.router.index(code))
                .or_default()
                .push(code.clone());
        }

        let lookups = by_shard.into_iter().map(|(shard, codes)| async move {
            let sql = format!(
                "SELECT {LINK_COLUMNS} FROM {} WHERE code = ANY($1) AND deleted_at IS NULL",
                partition_name(LINKS_TABLE, shard)
            );
            sqlx::query_as::<_, LinkRow>(&sql)
                .bind(codes)
                .fetch_all(self.pool.as_ref())
                .await
        });

        let rows = try_join_all(lookups).await?;
        Ok(rows.into_iter().flatten().map(Link::from).collect())
    }

    async fn update_by_code(&self, code: &str, patch: LinkPatch) -> Result<Option<Link>, AppError> {
        let sql = format!(
            r#"
            UPDATE {}
            SET long_url = COALESCE($2, long_url),
                deleted_at = CASE WHEN $3 THEN now() ELSE deleted_at END,
                updated_at = now()
            WHERE code = $1 AND deleted_at IS NULL
            RETURNING {LINK_COLUMNS}
            "#,
            self.table(code)
        );

        let row = sqlx::query_as::<_, LinkRow>(&sql)
            .bind(code)
            .bind(patch.long_url)
            .bind(patch.deleted.unwrap_or(false))
            .fetch_optional(self.pool.as_ref())
            .await?;

        Ok(row.map(Link::from))
    }

    async fn scan_codes(
        &self,
        shard: u32,
        after_id: i64,
        limit: i64,
    ) -> Result<Vec<(i64, String)>, AppError> {
        if shard >= self.router.shard_count() {
            return Err(AppError::bad_request(
                "Shard out of range",
                json!({ "shard": shard, "shard_count": self.router.shard_count() }),
            ));
        }

        let sql = format!(
            "SELECT id, code FROM {} WHERE id > $1 ORDER BY id LIMIT $2",
            partition_name(LINKS_TABLE, shard)
        );

        let rows = sqlx::query_as::<_, (i64, String)>(&sql)
            .bind(after_id)
            .bind(limit)
            .fetch_all(self.pool.as_ref())
            .await?;

        Ok(rows)
    }
}
