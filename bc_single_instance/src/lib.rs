// implementation of trait BroadcastPort

use arena_core::{BcNoticeStream, BcResult, BroadcastPort, TournamentNotice};
use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::StreamExt;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};
use uuid::Uuid;

/// per-tournament buffer depth; a subscriber that falls this far behind
/// starts losing its oldest notices
const GROUP_BUFFER: usize = 128;

/// In-process broadcaster: one broadcast channel per tournament group.
///
/// A group comes into existence with its first subscriber. Subscribers are
/// plain broadcast receivers behind the port's stream type, so walking away
/// is just dropping the stream. Groups whose receivers are all gone stay in
/// the map until the next publish addressed to them, which sweeps the entry
/// instead of delivering into the void.
#[derive(Default)]
pub struct BcSingleInstance {
    groups: DashMap<Uuid, broadcast::Sender<TournamentNotice>>,
}

impl BcSingleInstance {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    fn group_count(&self) -> usize {
        self.groups.len()
    }
}

#[async_trait]
impl BroadcastPort for BcSingleInstance {
    async fn subscribe(&self, tournament_id: Uuid) -> BcResult<BcNoticeStream> {
        let rx = self
            .groups
            .entry(tournament_id)
            .or_insert_with(|| broadcast::channel(GROUP_BUFFER).0)
            .subscribe();
        debug!(%tournament_id, "subscriber_joined");

        // a lagged receiver jumps forward over what it missed; the loss is
        // logged and delivery stays best-effort
        let notices = BroadcastStream::new(rx).filter_map(move |item| async move {
            match item {
                Ok(notice) => Some(notice),
                Err(lag) => {
                    warn!(%tournament_id, %lag, "subscriber_behind_notices_lost");
                    None
                }
            }
        });
        Ok(Box::pin(notices))
    }

    async fn publish(&self, notice: TournamentNotice) -> BcResult<()> {
        let tournament_id = notice.tournament_id;
        let deserted = match self.groups.get(&tournament_id) {
            None => return Ok(()),
            Some(group) if group.receiver_count() == 0 => true,
            // send can still miss if the last receiver left mid-flight
            Some(group) => group.send(notice).is_err(),
        };
        if deserted {
            // re-check under the removal so a subscriber arriving right now
            // keeps its group
            self.groups
                .remove_if(&tournament_id, |_, tx| tx.receiver_count() == 0);
            debug!(%tournament_id, "deserted_group_swept");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arena_core::NoticeKind;
    use serde_json::json;

    fn notice(tournament_id: Uuid, n: u32) -> TournamentNotice {
        TournamentNotice {
            tournament_id,
            kind: NoticeKind::MatchUpdate,
            payload: json!({ "n": n }),
        }
    }

    #[tokio::test]
    async fn delivers_in_publish_order() {
        let bc = BcSingleInstance::new();
        let tournament_id = Uuid::new_v4();
        let mut stream = bc.subscribe(tournament_id).await.unwrap();

        for n in 0..3 {
            bc.publish(notice(tournament_id, n)).await.unwrap();
        }
        for n in 0..3 {
            let got = stream.next().await.unwrap();
            assert_eq!(got.payload["n"], n);
        }
    }

    #[tokio::test]
    async fn publish_without_subscribers_creates_no_group() {
        let bc = BcSingleInstance::new();
        bc.publish(notice(Uuid::new_v4(), 1)).await.unwrap();
        assert_eq!(bc.group_count(), 0);
    }

    #[tokio::test]
    async fn tournaments_are_isolated() {
        let bc = BcSingleInstance::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut stream_a = bc.subscribe(a).await.unwrap();
        let _stream_b = bc.subscribe(b).await.unwrap();

        bc.publish(notice(a, 7)).await.unwrap();
        let got = stream_a.next().await.unwrap();
        assert_eq!(got.tournament_id, a);
    }

    #[tokio::test]
    async fn publish_sweeps_a_deserted_group() {
        let bc = BcSingleInstance::new();
        let tournament_id = Uuid::new_v4();
        let stream = bc.subscribe(tournament_id).await.unwrap();
        drop(stream);
        // the entry lingers until someone publishes to it again
        assert_eq!(bc.group_count(), 1);

        bc.publish(notice(tournament_id, 1)).await.unwrap();
        assert_eq!(bc.group_count(), 0);
    }
}
