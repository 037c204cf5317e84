// sandboxed executor port

use crate::{MatchJob, MatchOutcome};
use async_trait::async_trait;
use thiserror::Error;

/// sandboxed executor port trait
///
/// One call runs one match to completion inside a disposable, resource
/// limited, network isolated container. Anything the game binary itself
/// produced (clean scores, a one-sided fault, an unknown exit code,
/// malformed output) comes back as an [`MatchOutcome`]; errors are reserved
/// for the sandbox not being able to deliver a verdict at all.
#[async_trait]
pub trait SandboxPort: Send + Sync {
    async fn run(&self, job: &MatchJob) -> SandboxResult<MatchOutcome>;
}

#[derive(Debug, Error)]
pub enum SandboxError {
    /// wall-clock limit hit; the container was terminated
    #[error("match execution timeout")]
    Timeout,

    // container runtime unreachable or misbehaving (retry may work)
    #[error(transparent)]
    Runtime(#[from] anyhow::Error),
}

pub type SandboxResult<T> = Result<T, SandboxError>;
