//! Redis-backed [`RemoteStore`].

use async_trait::async_trait;
use redis::{AsyncCommands, Client, RedisError, Script, aio::ConnectionManager};
use std::time::Duration;
use tracing::info;

use super::store::{Claim, PipelineOp, RemoteStore, StoreError, StoreResult};

/// SET NX with optional PX; on conflict returns the current holder.
const SET_NX_SCRIPT: &str = r#"
local ok
if tonumber(ARGV[2]) > 0 then
    ok = redis.call('SET', KEYS[1], ARGV[1], 'NX', 'PX', ARGV[2])
else
    ok = redis.call('SET', KEYS[1], ARGV[1], 'NX')
end
if ok then
    return {1, ARGV[1]}
end
return {0, redis.call('GET', KEYS[1])}
"#;

const EXPIRE_IF_EQ_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('PEXPIRE', KEYS[1], ARGV[2])
end
return 0
"#;

/// BF.ADD that leaves a missing filter missing; -1 when absent.
const BF_ADD_EXISTING_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
    return redis.call('BF.ADD', KEYS[1], ARGV[1])
end
return -1
"#;

const DEL_IF_EQ_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

fn failed(command: &'static str) -> impl FnOnce(RedisError) -> StoreError {
    move |e| StoreError::command(command, e)
}

fn millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

/// Redis store using a multiplexed, auto-reconnecting `ConnectionManager`.
///
/// Bloom operations require the RedisBloom module (`BF.*` commands).
pub struct RedisStore {
    conn: ConnectionManager,
    set_nx: Script,
    expire_if_eq: Script,
    del_if_eq: Script,
    bf_add_existing: Script,
}

impl RedisStore {
    /// Connects to Redis and validates the connection with a PING.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Connection`] if the URL is invalid, the connection cannot
    /// be established, or the PING fails.
    pub async fn connect(redis_url: &str) -> StoreResult<Self> {
        info!("Connecting to Redis");

        let client = Client::open(redis_url).map_err(|e| {
            StoreError::Connection(format!("Failed to create Redis client: {}", e))
        })?;

        let manager = ConnectionManager::new(client)
            .await
            .map_err(|e| StoreError::Connection(format!("Failed to connect to Redis: {}", e)))?;

        let mut test_conn = manager.clone();
        test_conn
            .ping::<()>()
            .await
            .map_err(|e| StoreError::Connection(format!("Redis PING failed: {}", e)))?;

        info!("✓ Connected to Redis");

        Ok(Self {
            conn: manager,
            set_nx: Script::new(SET_NX_SCRIPT),
            expire_if_eq: Script::new(EXPIRE_IF_EQ_SCRIPT),
            del_if_eq: Script::new(DEL_IF_EQ_SCRIPT),
            bf_add_existing: Script::new(BF_ADD_EXISTING_SCRIPT),
        })
    }

    /// A cheap handle sharing the underlying multiplexed connection.
    pub fn connection(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

#[async_trait]
impl RemoteStore for RedisStore {
    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.connection();
        conn.ping::<()>().await.map_err(failed("PING"))
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.connection();
        conn.get(key).await.map_err(failed("GET"))
    }

    async fn get_with_ttl(&self, key: &str) -> StoreResult<Option<(String, Option<Duration>)>> {
        let mut conn = self.connection();
        let (value, pttl): (Option<String>, i64) = redis::pipe()
            .atomic()
            .cmd("GET")
            .arg(key)
            .cmd("PTTL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(failed("GET"))?;

        // PTTL is -1 without an expiry and -2 once the key is gone.
        let ttl = u64::try_from(pttl).ok().map(Duration::from_millis);
        Ok(value.map(|value| (value, ttl)))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        let mut conn = self.connection();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(millis(ttl));
        }
        let _: () = cmd.query_async(&mut conn).await.map_err(failed("SET"))?;
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<Claim> {
        let mut conn = self.connection();
        let ttl_ms = ttl.map(millis).unwrap_or(0);
        let (stored, holder): (i64, Option<String>) = self
            .set_nx
            .key(key)
            .arg(value)
            .arg(ttl_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(failed("SET NX"))?;

        if stored == 1 {
            Ok(Claim::Acquired)
        } else {
            // The holder can expire between SET and GET; report it as an empty owner.
            Ok(Claim::Held(holder.unwrap_or_default()))
        }
    }

    async fn del(&self, key: &str) -> StoreResult<bool> {
        let mut conn = self.connection();
        let deleted: i64 = conn.del(key).await.map_err(failed("DEL"))?;
        Ok(deleted > 0)
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let mut conn = self.connection();
        conn.exists(key).await.map_err(failed("EXISTS"))
    }

    async fn expire_if_eq(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        let mut conn = self.connection();
        let updated: i64 = self
            .expire_if_eq
            .key(key)
            .arg(value)
            .arg(millis(ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(failed("PEXPIRE"))?;
        Ok(updated == 1)
    }

    async fn del_if_eq(&self, key: &str, value: &str) -> StoreResult<bool> {
        let mut conn = self.connection();
        let deleted: i64 = self
            .del_if_eq
            .key(key)
            .arg(value)
            .invoke_async(&mut conn)
            .await
            .map_err(failed("DEL"))?;
        Ok(deleted == 1)
    }

    async fn rename(&self, from: &str, to: &str) -> StoreResult<()> {
        let mut conn = self.connection();
        let _: () = redis::cmd("RENAME")
            .arg(from)
            .arg(to)
            .query_async(&mut conn)
            .await
            .map_err(failed("RENAME"))?;
        Ok(())
    }

    async fn incr(&self, key: &str) -> StoreResult<i64> {
        let mut conn = self.connection();
        conn.incr(key, 1).await.map_err(failed("INCR"))
    }

    async fn pfadd(&self, key: &str, member: &str) -> StoreResult<bool> {
        let mut conn = self.connection();
        conn.pfadd(key, member).await.map_err(failed("PFADD"))
    }

    async fn pfcount(&self, key: &str) -> StoreResult<u64> {
        let mut conn = self.connection();
        conn.pfcount(key).await.map_err(failed("PFCOUNT"))
    }

    async fn pipeline(&self, ops: Vec<PipelineOp>) -> StoreResult<()> {
        if ops.is_empty() {
            return Ok(());
        }

        let mut pipe = redis::pipe();
        for op in &ops {
            match op {
                PipelineOp::Incr(key) => {
                    pipe.cmd("INCR").arg(key).ignore();
                }
                PipelineOp::PfAdd(key, member) => {
                    pipe.cmd("PFADD").arg(key).arg(member).ignore();
                }
                PipelineOp::Expire(key, ttl) => {
                    pipe.cmd("PEXPIRE").arg(key).arg(millis(*ttl)).ignore();
                }
            }
        }

        let mut conn = self.connection();
        let _: () = pipe
            .query_async(&mut conn)
            .await
            .map_err(failed("PIPELINE"))?;
        Ok(())
    }

    async fn bf_reserve(&self, name: &str, error_rate: f64, capacity: u64) -> StoreResult<()> {
        let mut conn = self.connection();
        let _: () = redis::cmd("BF.RESERVE")
            .arg(name)
            .arg(error_rate)
            .arg(capacity)
            .query_async(&mut conn)
            .await
            .map_err(failed("BF.RESERVE"))?;
        Ok(())
    }

    async fn bf_add(&self, name: &str, item: &str) -> StoreResult<bool> {
        let mut conn = self.connection();
        let added: i64 = redis::cmd("BF.ADD")
            .arg(name)
            .arg(item)
            .query_async(&mut conn)
            .await
            .map_err(failed("BF.ADD"))?;
        Ok(added == 1)
    }

    async fn bf_add_existing(&self, name: &str, item: &str) -> StoreResult<Option<bool>> {
        let mut conn = self.connection();
        let added: i64 = self
            .bf_add_existing
            .key(name)
            .arg(item)
            .invoke_async(&mut conn)
            .await
            .map_err(failed("BF.ADD"))?;
        Ok((added >= 0).then_some(added == 1))
    }

    async fn bf_madd(&self, name: &str, items: &[String]) -> StoreResult<Vec<bool>> {
        if items.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.connection();
        let added: Vec<i64> = redis::cmd("BF.MADD")
            .arg(name)
            .arg(items)
            .query_async(&mut conn)
            .await
            .map_err(failed("BF.MADD"))?;
        Ok(added.into_iter().map(|flag| flag == 1).collect())
    }

    async fn bf_exists(&self, name: &str, item: &str) -> StoreResult<bool> {
        let mut conn = self.connection();
        let found: i64 = redis::cmd("BF.EXISTS")
            .arg(name)
            .arg(item)
            .query_async(&mut conn)
            .await
            .map_err(failed("BF.EXISTS"))?;
        Ok(found == 1)
    }

    async fn bf_mexists(&self, name: &str, items: &[String]) -> StoreResult<Vec<bool>> {
        if items.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.connection();
        let found: Vec<i64> = redis::cmd("BF.MEXISTS")
            .arg(name)
            .arg(items)
            .query_async(&mut conn)
            .await
            .map_err(failed("BF.MEXISTS"))?;
        Ok(found.into_iter().map(|flag| flag == 1).collect())
    }
}
