// database port

use crate::{
    LeaderboardEntry, Match, MatchOutcome, MatchStatus, NewMatch, Participant, Program,
    RatingUpdate, Tournament,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// database port trait
#[async_trait]
pub trait DatabasePort:
    DbpTournament + DbpProgram + DbpMatch + DbpParticipant + DbpLeaderboard
{
    async fn ping_db(&self) -> DbResult<()>;
}

/// database port trait for tournaments
#[async_trait]
pub trait DbpTournament: Send + Sync {
    async fn get_tournament(&self, id: Uuid) -> DbResult<Option<Tournament>>;

    /// `pending -> active`, recording `start_time`; false when the
    /// precondition does not hold
    async fn activate_tournament(&self, id: Uuid, start_time: DateTime<Utc>) -> DbResult<bool>;

    /// `active -> completed`, recording `end_time`
    async fn complete_tournament(&self, id: Uuid, end_time: DateTime<Utc>) -> DbResult<bool>;

    /// current round counter of `(tournament, game)`
    async fn current_round(&self, tournament_id: Uuid, game_type: &str) -> DbResult<i32>;

    /// increment the round counter and clear the round-completed flag,
    /// returning the new round number
    async fn bump_round(&self, tournament_id: Uuid, game_type: &str) -> DbResult<i32>;

    /// score multiplier configured for a game (1 when unconfigured)
    async fn game_multiplier(&self, game_type: &str) -> DbResult<i32>;
}

/// database port trait for programs
#[async_trait]
pub trait DbpProgram: Send + Sync {
    async fn get_program(&self, id: Uuid) -> DbResult<Option<Program>>;

    /// programs participating in `(tournament, game)`, in participant
    /// insertion order
    async fn list_programs(&self, tournament_id: Uuid, game_type: &str) -> DbResult<Vec<Program>>;
}

/// result of a worker claiming a match descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// this call performed the `pending -> running` transition
    Claimed,
    /// another claim got there first; duplicate dequeue proceeds
    AlreadyRunning,
    /// row is terminal; the descriptor is stale and must be discarded
    Stale(MatchStatus),
    /// row disappeared underneath the queue
    Missing,
}

/// database port trait for match rows
#[async_trait]
pub trait DbpMatch: Send + Sync {
    /// all-or-nothing batch insert of a generated match set
    async fn create_matches(&self, matches: &[NewMatch]) -> DbResult<Vec<Match>>;

    async fn get_match(&self, id: Uuid) -> DbResult<Option<Match>>;

    /// idempotent `pending -> running` transition recording `started_at`
    async fn mark_running(&self, id: Uuid) -> DbResult<ClaimOutcome>;

    /// last-writer-wins terminal write of the executor outcome; safe under
    /// duplicate invocation with the same outcome
    async fn complete_match(
        &self,
        id: Uuid,
        outcome: &MatchOutcome,
        status: MatchStatus,
    ) -> DbResult<Match>;

    /// record executor error details without a terminal transition; the
    /// worker lease keeps retrying the running row
    async fn record_error(&self, id: Uuid, error_code: i32, message: &str) -> DbResult<()>;

    /// terminal `-> failed` after retry exhaustion
    async fn finalize_failed(&self, id: Uuid, message: &str) -> DbResult<Match>;

    async fn list_by_status(
        &self,
        tournament_id: Uuid,
        status: MatchStatus,
    ) -> DbResult<Vec<Match>>;

    /// keyset page of pending rows ordered by `(created_at, id)`
    async fn list_pending(
        &self,
        limit: i64,
        after: Option<(DateTime<Utc>, Uuid)>,
    ) -> DbResult<Vec<Match>>;

    /// bulk-flip `running` rows older than `stuck_for` back to `pending`,
    /// at most `limit` rows, returning the flipped rows
    async fn reclaim_stuck(&self, stuck_for: Duration, limit: i64) -> DbResult<Vec<Match>>;

    /// bulk-flip `failed` rows of a tournament back to `pending`,
    /// returning the flipped rows
    async fn reset_failed(&self, tournament_id: Uuid) -> DbResult<Vec<Match>>;
}

/// database port trait for participant aggregates
#[async_trait]
pub trait DbpParticipant: Send + Sync {
    /// participants of a tournament in insertion order
    async fn list_participants(&self, tournament_id: Uuid) -> DbResult<Vec<Participant>>;

    async fn get_participant(
        &self,
        tournament_id: Uuid,
        program_id: Uuid,
    ) -> DbResult<Option<Participant>>;

    /// apply both sides of a match result in one transaction, serialized by
    /// row-level locking, appending rating-history rows
    async fn apply_match_result(
        &self,
        tournament_id: Uuid,
        match_id: Uuid,
        updates: &[RatingUpdate],
    ) -> DbResult<()>;
}

/// database port trait for the leaderboard projections
#[async_trait]
pub trait DbpLeaderboard: Send + Sync {
    /// non-blocking concurrent refresh of the materialized projections
    async fn refresh_leaderboards(&self) -> DbResult<()>;

    async fn leaderboard_top(
        &self,
        tournament_id: Uuid,
        limit: i64,
    ) -> DbResult<Vec<LeaderboardEntry>>;

    async fn leaderboard_full(&self, tournament_id: Uuid) -> DbResult<Vec<LeaderboardEntry>>;
}

#[derive(Debug, Error)]
pub enum DbError {
    /// ID does not exist
    #[error("entity not found")]
    NotFound,

    /// constraint name if it is returned from db
    #[error("unique violation{0:?}")]
    UniqueViolation(Option<String>),

    /// constraint name if it is returned from db
    #[error("foreign key violation{0:?}")]
    ForeignKeyViolation(Option<String>),

    /// constraint name if it is returned from db
    #[error("check violation{0:?}")]
    CheckViolation(Option<String>),

    // transient DB problems (retry may work)
    #[error("serialization failure")]
    SerializationFailure,

    // connection, pool, or other DB errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DbError {
    /// worth retrying with backoff at the worker
    pub fn is_transient(&self) -> bool {
        matches!(self, DbError::SerializationFailure | DbError::Other(_))
    }
}

pub type DbResult<T> = Result<T, DbError>;
