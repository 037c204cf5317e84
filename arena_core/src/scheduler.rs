//! Match set generation and queue admission.
//!
//! All operations that must not interleave (start, scheduling for a late
//! joiner) run under the tournament-scoped distributed lock.

use crate::{
    with_lock, BroadcastPort, CoreError, CoreResult, DatabasePort, LockPort, Match,
    MatchDescriptor, NewMatch, NoticeKind, Priority, Program, QueuePort, TournamentNotice,
    TournamentStatus,
};
use chrono::Utc;
use metrics::counter;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// lease on the tournament key; generous against slow batch inserts
const LOCK_TTL: Duration = Duration::from_secs(30);

pub struct TournamentScheduler {
    database: Arc<dyn DatabasePort>,
    queue: Arc<dyn QueuePort>,
    broadcast: Arc<dyn BroadcastPort>,
    lock: Arc<dyn LockPort>,
}

impl TournamentScheduler {
    pub fn new(
        database: Arc<dyn DatabasePort>,
        queue: Arc<dyn QueuePort>,
        broadcast: Arc<dyn BroadcastPort>,
        lock: Arc<dyn LockPort>,
    ) -> Self {
        TournamentScheduler {
            database,
            queue,
            broadcast,
            lock,
        }
    }

    /// Start a pending tournament: generate the first round-robin round for
    /// every game, admit it at medium priority and flip the tournament to
    /// active.
    #[instrument(name = "scheduler.start", skip(self), fields(tournament_id = %tournament_id))]
    pub async fn start(&self, tournament_id: Uuid) -> CoreResult<Vec<Match>> {
        let key = lock_key(tournament_id);
        with_lock(self.lock.as_ref(), &key, LOCK_TTL, || async move {
            let tournament = self
                .database
                .get_tournament(tournament_id)
                .await?
                .ok_or_else(|| CoreError::Validation(format!("tournament {tournament_id} not found")))?;
            if tournament.status != TournamentStatus::Pending {
                return Err(CoreError::Conflict(format!(
                    "tournament {} is not pending",
                    tournament.code
                )));
            }
            let participants = self.database.list_participants(tournament_id).await?;
            if participants.len() < 2 {
                return Err(CoreError::Validation(
                    "at least two participants are required to start".into(),
                ));
            }

            let mut batch = Vec::new();
            for game_type in &tournament.game_types {
                let programs = self.database.list_programs(tournament_id, game_type).await?;
                batch.extend(round_robin(tournament_id, game_type, &programs, 1));
            }
            if batch.is_empty() {
                return Err(CoreError::Validation(
                    "no matches can be generated for this tournament".into(),
                ));
            }

            let created = self.database.create_matches(&batch).await?;
            let enqueued = self.enqueue_all(&created).await;

            if !self.database.activate_tournament(tournament_id, Utc::now()).await? {
                return Err(CoreError::Conflict(format!(
                    "tournament {} changed state during start",
                    tournament.code
                )));
            }

            self.notify(
                tournament_id,
                NoticeKind::TournamentUpdate,
                json!({ "status": TournamentStatus::Active }),
            )
            .await;
            self.notify(
                tournament_id,
                NoticeKind::MatchesCreated,
                json!({ "count": created.len(), "enqueued": enqueued }),
            )
            .await;
            info!(matches = created.len(), enqueued, "tournament_started");
            Ok(created)
        })
        .await
    }

    /// Late joiner: one high-priority match against every existing program
    /// of the game, skipping the program itself and its own team.
    #[instrument(
        name = "scheduler.new_program",
        skip(self),
        fields(tournament_id = %tournament_id, program_id = %program_id)
    )]
    pub async fn schedule_new_program(
        &self,
        tournament_id: Uuid,
        game_type: &str,
        program_id: Uuid,
    ) -> CoreResult<Vec<Match>> {
        let key = lock_key(tournament_id);
        with_lock(self.lock.as_ref(), &key, LOCK_TTL, || async move {
            let tournament = self
                .database
                .get_tournament(tournament_id)
                .await?
                .ok_or_else(|| CoreError::Validation(format!("tournament {tournament_id} not found")))?;
            if tournament.status != TournamentStatus::Active {
                return Err(CoreError::Conflict(format!(
                    "tournament {} is not active",
                    tournament.code
                )));
            }
            let new_program = self
                .database
                .get_program(program_id)
                .await?
                .ok_or_else(|| CoreError::Validation(format!("program {program_id} not found")))?;

            let round = self.database.current_round(tournament_id, game_type).await?;
            let others = self.database.list_programs(tournament_id, game_type).await?;
            let batch: Vec<NewMatch> = others
                .iter()
                .filter(|other| other.id != new_program.id && !other.same_team(&new_program))
                .map(|other| NewMatch {
                    tournament_id,
                    game_type: game_type.to_string(),
                    program1_id: new_program.id,
                    program2_id: other.id,
                    priority: Priority::High,
                    round_number: round,
                })
                .collect();
            if batch.is_empty() {
                info!("no_opponents_for_late_joiner");
                return Ok(Vec::new());
            }

            let created = self.database.create_matches(&batch).await?;
            let enqueued = self.enqueue_all(&created).await;
            self.notify(
                tournament_id,
                NoticeKind::MatchesCreated,
                json!({ "count": created.len(), "enqueued": enqueued, "program_id": program_id }),
            )
            .await;
            info!(matches = created.len(), "late_joiner_scheduled");
            Ok(created)
        })
        .await
    }

    /// Re-admit everything pending; when nothing is pending, generate and
    /// admit a fresh round-robin round.
    #[instrument(name = "scheduler.run_all", skip(self), fields(tournament_id = %tournament_id))]
    pub async fn run_all(&self, tournament_id: Uuid) -> CoreResult<usize> {
        let tournament = self
            .database
            .get_tournament(tournament_id)
            .await?
            .ok_or_else(|| CoreError::Validation(format!("tournament {tournament_id} not found")))?;

        let mut to_enqueue = self
            .database
            .list_by_status(tournament_id, crate::MatchStatus::Pending)
            .await?;
        if to_enqueue.is_empty() {
            let mut batch = Vec::new();
            for game_type in &tournament.game_types {
                let round = self.database.bump_round(tournament_id, game_type).await?;
                let programs = self.database.list_programs(tournament_id, game_type).await?;
                batch.extend(round_robin(tournament_id, game_type, &programs, round));
            }
            if !batch.is_empty() {
                to_enqueue = self.database.create_matches(&batch).await?;
            }
        }

        let enqueued = self.enqueue_all(&to_enqueue).await;
        self.notify(
            tournament_id,
            NoticeKind::MatchesCreated,
            json!({ "count": to_enqueue.len(), "enqueued": enqueued }),
        )
        .await;
        info!(matches = to_enqueue.len(), enqueued, "run_all_admitted");
        Ok(enqueued)
    }

    /// Flip failed matches back to pending and re-admit them.
    #[instrument(name = "scheduler.retry_failed", skip(self), fields(tournament_id = %tournament_id))]
    pub async fn retry_failed(&self, tournament_id: Uuid) -> CoreResult<usize> {
        let rows = self.database.reset_failed(tournament_id).await?;
        let enqueued = self.enqueue_all(&rows).await;
        if !rows.is_empty() {
            self.notify(
                tournament_id,
                NoticeKind::MatchesCreated,
                json!({ "count": rows.len(), "enqueued": enqueued, "retried": true }),
            )
            .await;
        }
        info!(matches = rows.len(), enqueued, "failed_matches_retried");
        Ok(enqueued)
    }

    /// Explicit completion of an active tournament.
    #[instrument(name = "scheduler.complete", skip(self), fields(tournament_id = %tournament_id))]
    pub async fn complete(&self, tournament_id: Uuid) -> CoreResult<()> {
        if !self
            .database
            .complete_tournament(tournament_id, Utc::now())
            .await?
        {
            return Err(CoreError::Conflict(format!(
                "tournament {tournament_id} is not active"
            )));
        }
        self.notify(
            tournament_id,
            NoticeKind::TournamentUpdate,
            json!({ "status": TournamentStatus::Completed }),
        )
        .await;
        Ok(())
    }

    /// Per-enqueue failures are logged and counted; the inserted batch is
    /// never rolled back (recovery re-admits lost rows).
    async fn enqueue_all(&self, matches: &[Match]) -> usize {
        let mut enqueued = 0;
        for m in matches {
            let descriptor = MatchDescriptor::from(m);
            match self.queue.enqueue(&descriptor).await {
                Ok(()) => enqueued += 1,
                Err(e) => {
                    warn!(match_id = %m.id, error = %e, "enqueue_failed");
                    counter!("queue_enqueue_failures_total").increment(1);
                }
            }
        }
        counter!("matches_created_total").increment(matches.len() as u64);
        enqueued
    }

    async fn notify(&self, tournament_id: Uuid, kind: NoticeKind, payload: serde_json::Value) {
        let notice = TournamentNotice {
            tournament_id,
            kind,
            payload,
        };
        if let Err(e) = self.broadcast.publish(notice).await {
            warn!(error = %e, "scheduler_notice_dropped");
        }
    }
}

fn lock_key(tournament_id: Uuid) -> String {
    format!("tournament:{tournament_id}")
}

/// Every pair `(i, j) : i < j` in participant insertion order plays exactly
/// one match per round.
fn round_robin(
    tournament_id: Uuid,
    game_type: &str,
    programs: &[Program],
    round_number: i32,
) -> Vec<NewMatch> {
    let mut matches = Vec::with_capacity(programs.len() * programs.len().saturating_sub(1) / 2);
    for i in 0..programs.len() {
        for j in (i + 1)..programs.len() {
            matches.push(NewMatch {
                tournament_id,
                game_type: game_type.to_string(),
                program1_id: programs[i].id,
                program2_id: programs[j].id,
                priority: Priority::Medium,
                round_number,
            });
        }
    }
    matches
}

#[cfg(test)]
mod tests {
    use super::*;

    fn program(id_byte: u8) -> Program {
        Program {
            id: Uuid::from_bytes([id_byte; 16]),
            team_id: None,
            tournament_id: None,
            game_id: Uuid::nil(),
            code_path: format!("/programs/p{id_byte}"),
            version: 1,
        }
    }

    #[test]
    fn round_robin_produces_n_choose_two_pairs() {
        let programs: Vec<Program> = (1..=4).map(program).collect();
        let matches = round_robin(Uuid::nil(), "connect4", &programs, 1);
        assert_eq!(matches.len(), 6);

        // no self-pair, no repeated pair
        let mut seen = std::collections::HashSet::new();
        for m in &matches {
            assert_ne!(m.program1_id, m.program2_id);
            assert!(seen.insert((m.program1_id, m.program2_id)));
            assert!(!seen.contains(&(m.program2_id, m.program1_id)));
        }
    }

    #[test]
    fn round_robin_keeps_insertion_order() {
        let programs: Vec<Program> = (1..=3).map(program).collect();
        let matches = round_robin(Uuid::nil(), "connect4", &programs, 2);
        let pairs: Vec<(Uuid, Uuid)> = matches
            .iter()
            .map(|m| (m.program1_id, m.program2_id))
            .collect();
        assert_eq!(
            pairs,
            vec![
                (programs[0].id, programs[1].id),
                (programs[0].id, programs[2].id),
                (programs[1].id, programs[2].id),
            ]
        );
        assert!(matches.iter().all(|m| m.round_number == 2));
        assert!(matches.iter().all(|m| m.priority == Priority::Medium));
    }

    #[test]
    fn degenerate_inputs_yield_no_matches() {
        assert!(round_robin(Uuid::nil(), "g", &[], 1).is_empty());
        assert!(round_robin(Uuid::nil(), "g", &[program(1)], 1).is_empty());
    }
}
