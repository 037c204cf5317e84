// priority queue port

use crate::{MatchDescriptor, Priority};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// priority queue port trait
///
/// Strict ordering across bands (high > medium > low), FIFO within a band.
/// The queue is not transactional with the database: descriptors can be
/// stale (row already terminal) or lost (pending row without descriptor).
/// The processor discards stale descriptors; recovery re-enqueues lost ones.
#[async_trait]
pub trait QueuePort: Send + Sync {
    /// tail of the descriptor's band; no de-duplication
    async fn enqueue(&self, descriptor: &MatchDescriptor) -> QueueResult<()>;

    /// head of the highest non-empty band, blocking up to `timeout`;
    /// `None` on timeout. Undecodable entries are logged and discarded
    /// by the adapter.
    async fn dequeue(&self, timeout: Duration) -> QueueResult<Option<MatchDescriptor>>;

    async fn size(&self, priority: Priority) -> QueueResult<u64>;

    async fn total_size(&self) -> QueueResult<u64>;

    async fn clear_priority(&self, priority: Priority) -> QueueResult<()>;

    async fn clear(&self) -> QueueResult<()>;
}

#[derive(Debug, Error)]
pub enum QueueError {
    // backing store outage or protocol error (retry with backoff)
    #[error(transparent)]
    Unavailable(#[from] anyhow::Error),
}

pub type QueueResult<T> = Result<T, QueueError>;
