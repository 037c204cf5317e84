// redis lease lock (SET NX PX + compare-and-delete release)

use anyhow::{Context, Result};
use arena_core::{LockError, LockLease, LockPort, LockResult};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::time::Duration;
use tracing::{debug, instrument};
use uuid::Uuid;

const RELEASE_SCRIPT: &str = r#"
if redis.call('get', KEYS[1]) == ARGV[1] then
    return redis.call('del', KEYS[1])
else
    return 0
end
"#;

pub struct RedisLock {
    conn: ConnectionManager,
    release: redis::Script,
}

impl RedisLock {
    pub async fn new(address: &str) -> Result<Self> {
        let client = redis::Client::open(address).context("invalid lock backing address")?;
        let conn = ConnectionManager::new(client)
            .await
            .context("lock backing store unreachable")?;
        Ok(RedisLock {
            conn,
            release: redis::Script::new(RELEASE_SCRIPT),
        })
    }
}

fn storage_key(key: &str) -> String {
    format!("lock:{key}")
}

#[async_trait]
impl LockPort for RedisLock {
    #[instrument(name = "lock.acquire", skip(self))]
    async fn acquire(&self, key: &str, ttl: Duration) -> LockResult<LockLease> {
        let token = Uuid::new_v4().to_string();
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(storage_key(key))
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await
            .map_err(|e| LockError::Backend(anyhow::Error::new(e)))?;

        match reply {
            Some(_) => {
                debug!("lease_granted");
                Ok(LockLease {
                    key: key.to_string(),
                    token,
                })
            }
            None => Err(LockError::Held(key.to_string())),
        }
    }

    #[instrument(name = "lock.release", skip(self, lease), fields(key = %lease.key))]
    async fn release(&self, lease: LockLease) -> LockResult<()> {
        let mut conn = self.conn.clone();
        let deleted: i64 = self
            .release
            .key(storage_key(&lease.key))
            .arg(&lease.token)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| LockError::Backend(anyhow::Error::new(e)))?;
        if deleted == 0 {
            // lease expired and the key moved on; nothing to clean up
            debug!("lease_already_gone");
        }
        Ok(())
    }
}
