// broadcaster port types

use async_trait::async_trait;
use futures_core::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use thiserror::Error;
use uuid::Uuid;

/// framework-agnostic notice stream (boxed + pinned trait object)
pub type BcNoticeStream = Pin<Box<dyn Stream<Item = TournamentNotice> + Send + 'static>>;

/// kinds of pushed tournament updates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    TournamentUpdate,
    MatchUpdate,
    LeaderboardUpdate,
    MatchesCreated,
    Error,
}

/// typed update pushed to subscribers of one tournament; keep payloads minimal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TournamentNotice {
    pub tournament_id: Uuid,
    pub kind: NoticeKind,
    pub payload: serde_json::Value,
}

/// broadcaster port trait
///
/// Delivery is best-effort and lossy under subscriber back-pressure; per
/// tournament ordering is preserved per producer.
#[async_trait]
pub trait BroadcastPort: Send + Sync {
    /// Subscribe to one tournament; dropping the returned stream ends the
    /// subscription (RAII).
    async fn subscribe(&self, tournament_id: Uuid) -> BcResult<BcNoticeStream>;

    /// Publish a notice to current listeners (no bus is created if none exist).
    async fn publish(&self, notice: TournamentNotice) -> BcResult<()>;
}

#[derive(Debug, Error)]
pub enum BcError {
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type BcResult<T> = Result<T, BcError>;
