//! Redis-backed job store.
//!
//! Records are JSON strings under `lumen:job:<id>`. Patches are applied in
//! process and written back with a Lua script that refuses to overwrite a
//! terminal record, so a late progress write can never clobber a completed
//! or failed job. Non-terminal writes are last-write-wins.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tracing::{debug, info};

use lumen_models::{Job, JobId, JobPatch, JobTransitionError};

use crate::error::{StoreError, StoreResult};
use crate::JobStore;

const KEY_PREFIX: &str = "lumen:job:";

const GUARDED_SET: &str = r#"
local current = redis.call('GET', KEYS[1])
if current then
  local ok, decoded = pcall(cjson.decode, current)
  if ok and (decoded.status == 'completed' or decoded.status == 'error') then
    return 0
  end
end
local ttl = tonumber(ARGV[2])
if ttl and ttl > 0 then
  redis.call('SET', KEYS[1], ARGV[1], 'EX', ttl)
else
  redis.call('SET', KEYS[1], ARGV[1])
end
return 1
"#;

/// Job store shared across processes through Redis.
#[derive(Clone)]
pub struct RedisJobStore {
    conn: MultiplexedConnection,
    guarded_set: redis::Script,
    ttl: Option<Duration>,
}

impl RedisJobStore {
    /// Connect to Redis. `ttl` expires records after the last write.
    pub async fn connect(redis_url: &str, ttl: Option<Duration>) -> StoreResult<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| StoreError::connection_failed(e.to_string()))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| StoreError::connection_failed(e.to_string()))?;

        info!("Connected job store to Redis");
        Ok(Self {
            conn,
            guarded_set: redis::Script::new(GUARDED_SET),
            ttl,
        })
    }

    /// Get the key for a job.
    pub fn key(id: &JobId) -> String {
        format!("{}{}", KEY_PREFIX, id)
    }

    fn ttl_secs(&self) -> u64 {
        self.ttl.map(|t| t.as_secs()).unwrap_or(0)
    }
}

#[async_trait]
impl JobStore for RedisJobStore {
    async fn get(&self, id: &JobId) -> StoreResult<Option<Job>> {
        let mut conn = self.conn.clone();
        let payload: Option<String> = conn.get(Self::key(id)).await?;
        match payload {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn create(&self, job: Job) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(&job)?;

        let mut cmd = redis::cmd("SET");
        cmd.arg(Self::key(&job.id)).arg(payload).arg("NX");
        if self.ttl_secs() > 0 {
            cmd.arg("EX").arg(self.ttl_secs());
        }

        let reply: Option<String> = cmd.query_async(&mut conn).await?;
        if reply.is_none() {
            return Err(StoreError::AlreadyExists(job.id));
        }
        debug!(job_id = %job.id, "Created job record");
        Ok(())
    }

    async fn upsert(&self, id: &JobId, patch: JobPatch) -> StoreResult<Job> {
        let job = match self.get(id).await? {
            Some(mut job) => {
                job.apply(patch)?;
                job
            }
            None => Job::from_patch(id.clone(), patch)?,
        };

        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(&job)?;
        let written: i32 = self
            .guarded_set
            .key(Self::key(id))
            .arg(payload)
            .arg(self.ttl_secs())
            .invoke_async(&mut conn)
            .await?;

        if written == 0 {
            // Another writer finalized the job between our read and write.
            let status = self
                .get(id)
                .await?
                .map(|current| current.status)
                .unwrap_or(job.status);
            return Err(JobTransitionError::Terminal {
                id: id.clone(),
                status,
            }
            .into());
        }

        Ok(job)
    }

    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}
