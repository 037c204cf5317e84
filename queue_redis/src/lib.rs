// redis implementation of the queue and lock ports

mod lock;

pub use lock::RedisLock;

use anyhow::{Context, Result};
use arena_core::{MatchDescriptor, Priority, QueueError, QueuePort, QueueResult};
use async_trait::async_trait;
use redis::{AsyncCommands, aio::ConnectionManager};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Priority queue over redis lists.
///
/// One list per band; BLPOP probes the keys in band order, which yields the
/// strict high > medium > low admission the contract asks for. Blocking pops
/// run on a small dedicated connection pool so they never stall the shared
/// command connection.
pub struct RedisQueue {
    shared: ConnectionManager,
    blocking: Vec<tokio::sync::Mutex<ConnectionManager>>,
    next_blocking: AtomicUsize,
}

impl RedisQueue {
    pub async fn new(address: &str, pool_size: u32) -> Result<Self> {
        let client = redis::Client::open(address).context("invalid queue backing address")?;
        let shared = ConnectionManager::new(client.clone())
            .await
            .context("queue backing store unreachable")?;
        let mut blocking = Vec::with_capacity(pool_size.max(1) as usize);
        for _ in 0..pool_size.max(1) {
            blocking.push(tokio::sync::Mutex::new(
                ConnectionManager::new(client.clone())
                    .await
                    .context("queue backing store unreachable")?,
            ));
        }
        Ok(RedisQueue {
            shared,
            blocking,
            next_blocking: AtomicUsize::new(0),
        })
    }
}

fn unavailable(e: redis::RedisError) -> QueueError {
    QueueError::Unavailable(anyhow::Error::new(e))
}

#[async_trait]
impl QueuePort for RedisQueue {
    #[instrument(name = "queue.enqueue", skip(self, descriptor), fields(match_id = %descriptor.id))]
    async fn enqueue(&self, descriptor: &MatchDescriptor) -> QueueResult<()> {
        let payload = serde_json::to_string(descriptor)
            .map_err(|e| QueueError::Unavailable(anyhow::Error::new(e)))?;
        let mut conn = self.shared.clone();
        let _: i64 = conn
            .rpush(descriptor.priority.queue_key(), payload)
            .await
            .map_err(unavailable)?;
        debug!(band = descriptor.priority.queue_key(), "enqueued");
        Ok(())
    }

    #[instrument(name = "queue.dequeue", skip_all)]
    async fn dequeue(&self, timeout: Duration) -> QueueResult<Option<MatchDescriptor>> {
        let keys: Vec<&str> = Priority::ORDERED.iter().map(|p| p.queue_key()).collect();
        let index = self.next_blocking.fetch_add(1, Ordering::Relaxed) % self.blocking.len();
        let reply: Option<(String, String)> = {
            let mut conn = self.blocking[index].lock().await;
            conn.blpop(&keys, timeout.as_secs_f64())
                .await
                .map_err(unavailable)?
        };

        let Some((band, payload)) = reply else {
            return Ok(None);
        };
        match serde_json::from_str::<MatchDescriptor>(&payload) {
            Ok(descriptor) => {
                debug!(band, match_id = %descriptor.id, "dequeued");
                Ok(Some(descriptor))
            }
            Err(e) => {
                // poisoned entry: drop it, the database row is authoritative
                warn!(band, error = %e, "descriptor_undecodable_discarded");
                Ok(None)
            }
        }
    }

    #[instrument(name = "queue.size", skip(self))]
    async fn size(&self, priority: Priority) -> QueueResult<u64> {
        let mut conn = self.shared.clone();
        let len: i64 = conn.llen(priority.queue_key()).await.map_err(unavailable)?;
        Ok(len.max(0) as u64)
    }

    async fn total_size(&self) -> QueueResult<u64> {
        let mut total = 0;
        for priority in Priority::ORDERED {
            total += self.size(priority).await?;
        }
        Ok(total)
    }

    #[instrument(name = "queue.clear_priority", skip(self))]
    async fn clear_priority(&self, priority: Priority) -> QueueResult<()> {
        let mut conn = self.shared.clone();
        let _: i64 = conn.del(priority.queue_key()).await.map_err(unavailable)?;
        Ok(())
    }

    #[instrument(name = "queue.clear", skip(self))]
    async fn clear(&self) -> QueueResult<()> {
        let keys: Vec<&str> = Priority::ORDERED.iter().map(|p| p.queue_key()).collect();
        let mut conn = self.shared.clone();
        let _: i64 = conn.del(keys).await.map_err(unavailable)?;
        Ok(())
    }
}
