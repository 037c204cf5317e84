//! Broadcaster fakes: a recording sink and a pure noop.

use arena_core::{BcNoticeStream, BcResult, BroadcastPort, NoticeKind, TournamentNotice};
use async_trait::async_trait;
use std::sync::Mutex;
use uuid::Uuid;

/// records every published notice for assertions
#[derive(Default)]
pub struct RecordingBroadcast {
    pub notices: Mutex<Vec<TournamentNotice>>,
}

impl RecordingBroadcast {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kinds_for(&self, tournament_id: Uuid) -> Vec<NoticeKind> {
        self.notices
            .lock()
            .unwrap()
            .iter()
            .filter(|n| n.tournament_id == tournament_id)
            .map(|n| n.kind)
            .collect()
    }
}

#[async_trait]
impl BroadcastPort for RecordingBroadcast {
    async fn subscribe(&self, _tournament_id: Uuid) -> BcResult<BcNoticeStream> {
        Ok(Box::pin(futures_util::stream::empty()))
    }

    async fn publish(&self, notice: TournamentNotice) -> BcResult<()> {
        self.notices.lock().unwrap().push(notice);
        Ok(())
    }
}

/// drops everything
#[derive(Default, Clone, Copy)]
pub struct NoopBroadcast;

#[async_trait]
impl BroadcastPort for NoopBroadcast {
    async fn subscribe(&self, _tournament_id: Uuid) -> BcResult<BcNoticeStream> {
        Ok(Box::pin(futures_util::stream::empty()))
    }

    async fn publish(&self, _notice: TournamentNotice) -> BcResult<()> {
        Ok(())
    }
}
