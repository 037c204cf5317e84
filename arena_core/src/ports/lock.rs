// distributed lock port

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// a held lease; must be handed back to [`LockPort::release`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockLease {
    pub key: String,
    pub token: String,
}

/// distributed lock port trait
///
/// Mutual exclusion for tournament-scoped critical sections across
/// processes. A failed acquisition is a fast error; the caller decides
/// whether to retry. The lease expires on its own after `ttl`, so a crashed
/// holder never blocks the key forever.
#[async_trait]
pub trait LockPort: Send + Sync {
    async fn acquire(&self, key: &str, ttl: Duration) -> LockResult<LockLease>;

    /// compare-and-delete: releasing a lease that already expired and was
    /// re-acquired by someone else is a no-op
    async fn release(&self, lease: LockLease) -> LockResult<()>;
}

/// Run a critical section under a named lease.
///
/// The section runs with a deadline of at most the TTL; overrunning it is a
/// conflict, never silent lease expiry.
pub async fn with_lock<F, Fut, T>(
    lock: &dyn LockPort,
    key: &str,
    ttl: Duration,
    critical: F,
) -> crate::CoreResult<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = crate::CoreResult<T>>,
{
    let lease = lock.acquire(key, ttl).await?;
    let outcome = tokio::time::timeout(ttl, critical()).await;
    if let Err(e) = lock.release(lease).await {
        tracing::warn!(key, error = %e, "lock_release_failed");
    }
    match outcome {
        Ok(result) => result,
        Err(_) => Err(crate::CoreError::Conflict(format!(
            "critical section exceeded lock ttl for {key}"
        ))),
    }
}

#[derive(Debug, Error)]
pub enum LockError {
    /// key is held by another process
    #[error("lock held: {0}")]
    Held(String),

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

pub type LockResult<T> = Result<T, LockError>;
