//! Fake of the database port backed by mutex-guarded maps.

use arena_core::{
    ClaimOutcome, DatabasePort, DbError, DbResult, DbpLeaderboard, DbpMatch, DbpParticipant,
    DbpProgram, DbpTournament, LeaderboardEntry, Match, MatchOutcome, MatchStatus, NewMatch,
    Participant, Program, RatingUpdate, Tally, Tournament, TournamentStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use uuid::Uuid;

/// one rating-history append
#[derive(Debug, Clone, PartialEq)]
pub struct RatingHistoryRow {
    pub tournament_id: Uuid,
    pub program_id: Uuid,
    pub match_id: Uuid,
    pub old_rating: i32,
    pub new_rating: i32,
    pub delta: i32,
}

#[derive(Default)]
pub struct FakeDatabasePort {
    pub tournaments: Mutex<HashMap<Uuid, Tournament>>,
    /// (tournament, game_type) -> current round
    pub rounds: Mutex<HashMap<(Uuid, String), i32>>,
    /// game_type -> game id
    pub games: Mutex<HashMap<String, Uuid>>,
    pub multipliers: Mutex<HashMap<String, i32>>,
    pub programs: Mutex<HashMap<Uuid, Program>>,
    /// insertion order is participant order
    pub participants: Mutex<Vec<Participant>>,
    pub matches: Mutex<HashMap<Uuid, Match>>,
    pub rating_history: Mutex<Vec<RatingHistoryRow>>,
    pub refresh_count: AtomicUsize,
    pub fail_next_create_matches: Mutex<bool>,
    pub fail_next_mark_running: Mutex<bool>,
    clock: AtomicUsize,
}

impl FakeDatabasePort {
    pub fn new() -> Self {
        Self::default()
    }

    /// strictly increasing timestamps for deterministic ordering
    fn tick(&self) -> DateTime<Utc> {
        let n = self.clock.fetch_add(1, Ordering::Relaxed) as i64;
        Utc::now() + ChronoDuration::microseconds(n)
    }

    pub fn add_game(&self, game_type: &str) -> Uuid {
        let game_id = Uuid::new_v4();
        self.games
            .lock()
            .unwrap()
            .insert(game_type.to_string(), game_id);
        game_id
    }

    pub fn add_tournament(&self, game_types: &[&str], status: TournamentStatus) -> Uuid {
        let id = Uuid::new_v4();
        for game in game_types {
            if !self.games.lock().unwrap().contains_key(*game) {
                self.add_game(game);
            }
            self.rounds
                .lock()
                .unwrap()
                .insert((id, game.to_string()), 1);
        }
        self.tournaments.lock().unwrap().insert(
            id,
            Tournament {
                id,
                code: format!("T-{}", &id.to_string()[..8]),
                name: "test tournament".to_string(),
                game_types: game_types.iter().map(|g| g.to_string()).collect(),
                status,
                max_participants: None,
                max_team_size: 4,
                start_time: None,
                end_time: None,
            },
        );
        id
    }

    /// register a program and join it to the tournament
    pub fn add_participant(
        &self,
        tournament_id: Uuid,
        game_type: &str,
        team_id: Option<Uuid>,
    ) -> Uuid {
        let game_id = *self
            .games
            .lock()
            .unwrap()
            .get(game_type)
            .expect("unknown game");
        let program_id = Uuid::new_v4();
        self.programs.lock().unwrap().insert(
            program_id,
            Program {
                id: program_id,
                team_id,
                tournament_id: Some(tournament_id),
                game_id,
                code_path: format!("/programs/{program_id}"),
                version: 1,
            },
        );
        self.participants.lock().unwrap().push(Participant {
            tournament_id,
            program_id,
            rating: 0,
            wins: 0,
            losses: 0,
            draws: 0,
            joined_at: self.tick(),
        });
        program_id
    }

    pub fn get_match_row(&self, id: Uuid) -> Option<Match> {
        self.matches.lock().unwrap().get(&id).cloned()
    }

    pub fn set_match_status(&self, id: Uuid, status: MatchStatus, started_at: Option<DateTime<Utc>>) {
        let mut guard = self.matches.lock().unwrap();
        let m = guard.get_mut(&id).expect("unknown match");
        m.status = status;
        m.started_at = started_at;
    }

    fn take_flag(flag: &Mutex<bool>) -> bool {
        let mut guard = flag.lock().unwrap();
        std::mem::take(&mut *guard)
    }
}

#[async_trait]
impl DatabasePort for FakeDatabasePort {
    async fn ping_db(&self) -> DbResult<()> {
        Ok(())
    }
}

#[async_trait]
impl DbpTournament for FakeDatabasePort {
    async fn get_tournament(&self, id: Uuid) -> DbResult<Option<Tournament>> {
        Ok(self.tournaments.lock().unwrap().get(&id).cloned())
    }

    async fn activate_tournament(&self, id: Uuid, start_time: DateTime<Utc>) -> DbResult<bool> {
        let mut guard = self.tournaments.lock().unwrap();
        match guard.get_mut(&id) {
            Some(t) if t.status == TournamentStatus::Pending => {
                t.status = TournamentStatus::Active;
                t.start_time = Some(start_time);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn complete_tournament(&self, id: Uuid, end_time: DateTime<Utc>) -> DbResult<bool> {
        let mut guard = self.tournaments.lock().unwrap();
        match guard.get_mut(&id) {
            Some(t) if t.status == TournamentStatus::Active => {
                t.status = TournamentStatus::Completed;
                t.end_time = Some(end_time);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn current_round(&self, tournament_id: Uuid, game_type: &str) -> DbResult<i32> {
        self.rounds
            .lock()
            .unwrap()
            .get(&(tournament_id, game_type.to_string()))
            .copied()
            .ok_or(DbError::NotFound)
    }

    async fn bump_round(&self, tournament_id: Uuid, game_type: &str) -> DbResult<i32> {
        let mut guard = self.rounds.lock().unwrap();
        let round = guard
            .get_mut(&(tournament_id, game_type.to_string()))
            .ok_or(DbError::NotFound)?;
        *round += 1;
        Ok(*round)
    }

    async fn game_multiplier(&self, game_type: &str) -> DbResult<i32> {
        Ok(self
            .multipliers
            .lock()
            .unwrap()
            .get(game_type)
            .copied()
            .unwrap_or(1))
    }
}

#[async_trait]
impl DbpProgram for FakeDatabasePort {
    async fn get_program(&self, id: Uuid) -> DbResult<Option<Program>> {
        Ok(self.programs.lock().unwrap().get(&id).cloned())
    }

    async fn list_programs(&self, tournament_id: Uuid, game_type: &str) -> DbResult<Vec<Program>> {
        let game_id = match self.games.lock().unwrap().get(game_type) {
            Some(id) => *id,
            None => return Ok(Vec::new()),
        };
        let programs = self.programs.lock().unwrap();
        Ok(self
            .participants
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.tournament_id == tournament_id)
            .filter_map(|p| programs.get(&p.program_id))
            .filter(|program| program.game_id == game_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl DbpMatch for FakeDatabasePort {
    async fn create_matches(&self, new_matches: &[NewMatch]) -> DbResult<Vec<Match>> {
        if Self::take_flag(&self.fail_next_create_matches) {
            return Err(DbError::Other(anyhow::anyhow!("injected insert failure")));
        }
        let mut guard = self.matches.lock().unwrap();
        let mut created = Vec::with_capacity(new_matches.len());
        for m in new_matches {
            let row = Match {
                id: Uuid::new_v4(),
                tournament_id: m.tournament_id,
                game_type: m.game_type.clone(),
                program1_id: m.program1_id,
                program2_id: m.program2_id,
                status: MatchStatus::Pending,
                priority: m.priority,
                round_number: m.round_number,
                score1: None,
                score2: None,
                winner: None,
                error_code: None,
                error_message: None,
                started_at: None,
                completed_at: None,
                created_at: self.tick(),
            };
            guard.insert(row.id, row.clone());
            created.push(row);
        }
        Ok(created)
    }

    async fn get_match(&self, id: Uuid) -> DbResult<Option<Match>> {
        Ok(self.matches.lock().unwrap().get(&id).cloned())
    }

    async fn mark_running(&self, id: Uuid) -> DbResult<ClaimOutcome> {
        if Self::take_flag(&self.fail_next_mark_running) {
            return Err(DbError::Other(anyhow::anyhow!("injected claim failure")));
        }
        let mut guard = self.matches.lock().unwrap();
        match guard.get_mut(&id) {
            None => Ok(ClaimOutcome::Missing),
            Some(m) => match m.status {
                MatchStatus::Pending => {
                    m.status = MatchStatus::Running;
                    m.started_at = Some(Utc::now());
                    Ok(ClaimOutcome::Claimed)
                }
                MatchStatus::Running => Ok(ClaimOutcome::AlreadyRunning),
                status => Ok(ClaimOutcome::Stale(status)),
            },
        }
    }

    async fn complete_match(
        &self,
        id: Uuid,
        outcome: &MatchOutcome,
        status: MatchStatus,
    ) -> DbResult<Match> {
        let mut guard = self.matches.lock().unwrap();
        let m = guard.get_mut(&id).ok_or(DbError::NotFound)?;
        m.status = status;
        m.score1 = Some(outcome.score1);
        m.score2 = Some(outcome.score2);
        m.winner = outcome.winner;
        m.error_code = Some(outcome.error_code);
        m.error_message = outcome.error_message.clone();
        // sticks to the first terminal write
        m.completed_at.get_or_insert_with(Utc::now);
        Ok(m.clone())
    }

    async fn record_error(&self, id: Uuid, error_code: i32, message: &str) -> DbResult<()> {
        let mut guard = self.matches.lock().unwrap();
        let m = guard.get_mut(&id).ok_or(DbError::NotFound)?;
        m.error_code = Some(error_code);
        m.error_message = Some(message.to_string());
        Ok(())
    }

    async fn finalize_failed(&self, id: Uuid, message: &str) -> DbResult<Match> {
        let mut guard = self.matches.lock().unwrap();
        let m = guard.get_mut(&id).ok_or(DbError::NotFound)?;
        if m.status != MatchStatus::Completed {
            m.status = MatchStatus::Failed;
            m.error_message = Some(message.to_string());
            m.error_code.get_or_insert(1);
            m.completed_at.get_or_insert_with(Utc::now);
        }
        Ok(m.clone())
    }

    async fn list_by_status(
        &self,
        tournament_id: Uuid,
        status: MatchStatus,
    ) -> DbResult<Vec<Match>> {
        let mut rows: Vec<Match> = self
            .matches
            .lock()
            .unwrap()
            .values()
            .filter(|m| m.tournament_id == tournament_id && m.status == status)
            .cloned()
            .collect();
        rows.sort_by_key(|m| (m.created_at, m.id));
        Ok(rows)
    }

    async fn list_pending(
        &self,
        limit: i64,
        after: Option<(DateTime<Utc>, Uuid)>,
    ) -> DbResult<Vec<Match>> {
        let mut rows: Vec<Match> = self
            .matches
            .lock()
            .unwrap()
            .values()
            .filter(|m| m.status == MatchStatus::Pending)
            .filter(|m| match after {
                Some((at, id)) => (m.created_at, m.id) > (at, id),
                None => true,
            })
            .cloned()
            .collect();
        rows.sort_by_key(|m| (m.created_at, m.id));
        rows.truncate(limit as usize);
        Ok(rows)
    }

    async fn reclaim_stuck(&self, stuck_for: Duration, limit: i64) -> DbResult<Vec<Match>> {
        let cutoff = Utc::now() - ChronoDuration::from_std(stuck_for).unwrap_or_default();
        let mut guard = self.matches.lock().unwrap();
        let mut flipped = Vec::new();
        for m in guard.values_mut() {
            if flipped.len() as i64 >= limit {
                break;
            }
            if m.status == MatchStatus::Running
                && m.started_at.is_some_and(|at| at < cutoff)
            {
                m.status = MatchStatus::Pending;
                m.started_at = None;
                flipped.push(m.clone());
            }
        }
        Ok(flipped)
    }

    async fn reset_failed(&self, tournament_id: Uuid) -> DbResult<Vec<Match>> {
        let mut guard = self.matches.lock().unwrap();
        let mut reset = Vec::new();
        for m in guard.values_mut() {
            if m.tournament_id == tournament_id && m.status == MatchStatus::Failed {
                m.status = MatchStatus::Pending;
                m.score1 = None;
                m.score2 = None;
                m.winner = None;
                m.error_code = None;
                m.error_message = None;
                m.started_at = None;
                m.completed_at = None;
                reset.push(m.clone());
            }
        }
        reset.sort_by_key(|m| (m.created_at, m.id));
        Ok(reset)
    }
}

#[async_trait]
impl DbpParticipant for FakeDatabasePort {
    async fn list_participants(&self, tournament_id: Uuid) -> DbResult<Vec<Participant>> {
        Ok(self
            .participants
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.tournament_id == tournament_id)
            .cloned()
            .collect())
    }

    async fn get_participant(
        &self,
        tournament_id: Uuid,
        program_id: Uuid,
    ) -> DbResult<Option<Participant>> {
        Ok(self
            .participants
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.tournament_id == tournament_id && p.program_id == program_id)
            .cloned())
    }

    async fn apply_match_result(
        &self,
        tournament_id: Uuid,
        match_id: Uuid,
        updates: &[RatingUpdate],
    ) -> DbResult<()> {
        let mut participants = self.participants.lock().unwrap();
        let mut history = self.rating_history.lock().unwrap();
        // a match is tallied once, however many leases commit it
        if history.iter().any(|r| r.match_id == match_id) {
            return Ok(());
        }
        for update in updates {
            let p = participants
                .iter_mut()
                .find(|p| p.tournament_id == tournament_id && p.program_id == update.program_id)
                .ok_or(DbError::NotFound)?;
            let old_rating = p.rating;
            p.rating += update.delta;
            match update.tally {
                Tally::Win => p.wins += 1,
                Tally::Loss => p.losses += 1,
                Tally::Draw => p.draws += 1,
            }
            history.push(RatingHistoryRow {
                tournament_id,
                program_id: update.program_id,
                match_id,
                old_rating,
                new_rating: p.rating,
                delta: update.delta,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl DbpLeaderboard for FakeDatabasePort {
    async fn refresh_leaderboards(&self) -> DbResult<()> {
        self.refresh_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn leaderboard_top(
        &self,
        tournament_id: Uuid,
        limit: i64,
    ) -> DbResult<Vec<LeaderboardEntry>> {
        let mut full = self.leaderboard_full(tournament_id).await?;
        full.truncate(limit as usize);
        Ok(full)
    }

    async fn leaderboard_full(&self, tournament_id: Uuid) -> DbResult<Vec<LeaderboardEntry>> {
        let mut rows: Vec<Participant> = self
            .participants
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.tournament_id == tournament_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            b.rating
                .cmp(&a.rating)
                .then(b.wins.cmp(&a.wins))
                .then(a.joined_at.cmp(&b.joined_at))
        });
        Ok(rows
            .into_iter()
            .enumerate()
            .map(|(i, p)| LeaderboardEntry {
                tournament_id,
                program_id: p.program_id,
                rank: i as i64 + 1,
                rating: p.rating,
                wins: p.wins,
                losses: p.losses,
                draws: p.draws,
                last_updated: Utc::now(),
            })
            .collect())
    }
}
