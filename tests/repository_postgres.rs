//! Runs against a real PostgreSQL: `DATABASE_URL=... cargo test -- --ignored`.

use shortlink_core::domain::access_event::{AccessEvent, RequestMeta};
use shortlink_core::domain::entities::{Enrichment, LinkPatch, NewAccessRecord, NewLink};
use shortlink_core::domain::repositories::{AccessRepository, LinkRepository};
use shortlink_core::domain::sharding::ShardRouter;
use shortlink_core::infrastructure::persistence::{PgAccessRepository, PgLinkRepository};
use sqlx::PgPool;
use std::sync::Arc;

async fn link_repo(pool: PgPool) -> PgLinkRepository {
    let repo = PgLinkRepository::new(Arc::new(pool), ShardRouter::new(4));
    repo.ensure_schema().await.unwrap();
    repo
}

fn new_link(code: &str, url: &str) -> NewLink {
    NewLink {
        code: code.to_string(),
        long_url: url.to_string(),
    }
}

#[sqlx::test(migrations = false)]
#[ignore = "requires PostgreSQL"]
async fn test_insert_and_find(pool: PgPool) {
    let repo = link_repo(pool).await;

    let created = repo
        .insert(new_link("aZ3x9Qk1", "https://example.com/"))
        .await
        .unwrap();
    assert_eq!(created.code, "aZ3x9Qk1");

    let found = repo.find_by_code("aZ3x9Qk1").await.unwrap().unwrap();
    assert_eq!(found.long_url, "https://example.com/");
    assert!(repo.find_by_code("missing1").await.unwrap().is_none());
}

#[sqlx::test(migrations = false)]
#[ignore = "requires PostgreSQL"]
async fn test_duplicate_code_is_conflict(pool: PgPool) {
    let repo = link_repo(pool).await;

    repo.insert(new_link("dup-code", "https://a.example.com/"))
        .await
        .unwrap();
    let err = repo
        .insert(new_link("dup-code", "https://b.example.com/"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        shortlink_core::error::AppError::Conflict { .. }
    ));
}

#[sqlx::test(migrations = false)]
#[ignore = "requires PostgreSQL"]
async fn test_update_and_soft_delete(pool: PgPool) {
    let repo = link_repo(pool).await;
    repo.insert(new_link("edit-me", "https://old.example.com/"))
        .await
        .unwrap();

    let updated = repo
        .update_by_code("edit-me", LinkPatch::destination("https://new.example.com/"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.long_url, "https://new.example.com/");

    let deleted = repo
        .update_by_code("edit-me", LinkPatch::delete())
        .await
        .unwrap()
        .unwrap();
    assert!(deleted.is_deleted());

    assert!(repo.find_by_code("edit-me").await.unwrap().is_none());
    assert!(
        repo.update_by_code("edit-me", LinkPatch::delete())
            .await
            .unwrap()
            .is_none()
    );

    // The code stays reserved.
    assert!(
        repo.insert(new_link("edit-me", "https://again.example.com/"))
            .await
            .is_err()
    );
}

#[sqlx::test(migrations = false)]
#[ignore = "requires PostgreSQL"]
async fn test_scan_and_batch_lookup_span_partitions(pool: PgPool) {
    let repo = link_repo(pool).await;
    let codes: Vec<String> = (0..40).map(|i| format!("scan{i:04}")).collect();
    for code in &codes {
        repo.insert(new_link(code, "https://example.com/"))
            .await
            .unwrap();
    }
    repo.update_by_code("scan0000", LinkPatch::delete())
        .await
        .unwrap();

    let mut scanned = Vec::new();
    for shard in 0..repo.shard_count() {
        let mut after = 0;
        loop {
            let page = repo.scan_codes(shard, after, 7).await.unwrap();
            let Some((last, _)) = page.last() else { break };
            after = *last;
            scanned.extend(page.into_iter().map(|(_, code)| code));
        }
    }
    scanned.sort();
    // Deleted codes are still scanned.
    assert_eq!(scanned, codes);

    let found = repo.find_by_codes(&codes).await.unwrap();
    assert_eq!(found.len(), 39);

    assert!(repo.scan_codes(repo.shard_count(), 0, 10).await.is_err());
}

#[sqlx::test(migrations = false)]
#[ignore = "requires PostgreSQL"]
async fn test_access_batch_skips_replays(pool: PgPool) {
    let repo = PgAccessRepository::new(Arc::new(pool), ShardRouter::new(4));
    repo.ensure_schema().await.unwrap();

    let records: Vec<NewAccessRecord> = ["aaa111", "bbb222", "aaa111"]
        .iter()
        .map(|code| {
            let event = AccessEvent::new(
                code.to_string(),
                "https://example.com/".to_string(),
                RequestMeta::default(),
                Some("10.0.0.1".to_string()),
                None,
            );
            NewAccessRecord::from_event(&event, Enrichment::default())
        })
        .collect();

    assert_eq!(repo.insert_batch(&records).await.unwrap(), 3);
    // Same message ids again: nothing new.
    assert_eq!(repo.insert_batch(&records).await.unwrap(), 0);

    assert_eq!(repo.count_by_code("aaa111").await.unwrap(), 2);
    assert_eq!(repo.count_by_code("ccc333").await.unwrap(), 0);
}
