//! Definitions for error types used throughout core.

use crate::{BcError, DbError, LockError, QueueError, SandboxError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// database error
    #[error("database error: {0}")]
    Db(#[from] DbError),

    /// queue error
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    /// sandbox error
    #[error("sandbox error: {0}")]
    Sandbox(#[from] SandboxError),

    /// broadcaster error
    #[error("broadcast error: {0}")]
    Broadcast(#[from] BcError),

    /// lock error
    #[error("lock error: {0}")]
    Lock(#[from] LockError),

    /// bad request at the scheduler boundary; surfaced, never retried
    #[error("validation error: {0}")]
    Validation(String),

    /// status precondition, capacity reached, lock contention; surfaced,
    /// never retried
    #[error("conflict: {0}")]
    Conflict(String),

    /// invalid process configuration; the process refuses to start
    #[error("configuration error: {0}")]
    Config(String),
}

pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    /// transient infrastructure failure; the worker retries with backoff
    pub fn is_transient(&self) -> bool {
        match self {
            CoreError::Db(e) => e.is_transient(),
            CoreError::Queue(_) => true,
            CoreError::Sandbox(e) => matches!(e, SandboxError::Timeout | SandboxError::Runtime(_)),
            CoreError::Broadcast(_) => false,
            CoreError::Lock(e) => matches!(e, LockError::Backend(_)),
            CoreError::Validation(_) | CoreError::Conflict(_) | CoreError::Config(_) => false,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, CoreError::Conflict(_) | CoreError::Lock(LockError::Held(_)))
    }
}
