//! implementation of the match port

use crate::{
    DbMatchPriority, DbMatchStatus, PgDb, db_err,
    schema::{matches, matches::dsl::*},
};
use arena_core::{
    ClaimOutcome, DbError, DbResult, DbpMatch, Match, MatchOutcome, MatchStatus, NewMatch,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::{
    dsl::sql,
    prelude::{
        BoolExpressionMethods, ExpressionMethods, Insertable, OptionalExtension, QueryDsl,
        Queryable,
    },
    sql_types::{Int4, Nullable, Timestamptz},
};
use diesel_async::RunQueryDsl;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

// ------------------- DB-Row (SELECT/RETURNING) -------------------
#[derive(Debug, Queryable)]
pub struct DbMatch {
    pub id: Uuid,
    pub tournament_id: Uuid,
    pub game_type: String,
    pub program1_id: Uuid,
    pub program2_id: Uuid,
    pub status: DbMatchStatus,
    pub priority: DbMatchPriority,
    pub round_number: i32,
    pub score1: Option<i32>,
    pub score2: Option<i32>,
    pub winner: Option<i16>,
    pub error_code: Option<i32>,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

// Mapping DB -> Core
impl From<DbMatch> for Match {
    fn from(r: DbMatch) -> Self {
        Match {
            id: r.id,
            tournament_id: r.tournament_id,
            game_type: r.game_type,
            program1_id: r.program1_id,
            program2_id: r.program2_id,
            status: r.status.into(),
            priority: r.priority.into(),
            round_number: r.round_number,
            score1: r.score1,
            score2: r.score2,
            winner: r.winner,
            error_code: r.error_code,
            error_message: r.error_message,
            started_at: r.started_at,
            completed_at: r.completed_at,
            created_at: r.created_at,
        }
    }
}

// ------------------- INSERT -------------------
#[derive(Debug, Insertable)]
#[diesel(table_name = matches)]
pub struct WriteDbMatch<'a> {
    pub tournament_id: Uuid,
    pub game_type: &'a str,
    pub program1_id: Uuid,
    pub program2_id: Uuid,
    pub status: DbMatchStatus,
    pub priority: DbMatchPriority,
    pub round_number: i32,
}

impl<'a> From<&'a NewMatch> for WriteDbMatch<'a> {
    fn from(m: &'a NewMatch) -> Self {
        WriteDbMatch {
            tournament_id: m.tournament_id,
            game_type: &m.game_type,
            program1_id: m.program1_id,
            program2_id: m.program2_id,
            status: DbMatchStatus::Pending,
            priority: m.priority.into(),
            round_number: m.round_number,
        }
    }
}

// ------------------- Impl trait --------------------

#[async_trait]
impl DbpMatch for PgDb {
    #[instrument(name = "db.match.create_batch", skip(self, new_matches), fields(count = new_matches.len()))]
    async fn create_matches(&self, new_matches: &[NewMatch]) -> DbResult<Vec<Match>> {
        if new_matches.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.new_connection().await?;
        let writes: Vec<WriteDbMatch<'_>> = new_matches.iter().map(WriteDbMatch::from).collect();

        // one statement, all-or-nothing
        let rows = diesel::insert_into(matches)
            .values(&writes)
            .returning(matches::all_columns)
            .get_results::<DbMatch>(&mut conn)
            .await
            .map_err(db_err)?;

        info!(inserted = rows.len(), "batch_insert_ok");
        Ok(rows.into_iter().map(Match::from).collect())
    }

    #[instrument(name = "db.match.get", skip(self), fields(id = %match_id))]
    async fn get_match(&self, match_id: Uuid) -> DbResult<Option<Match>> {
        let mut conn = self.new_connection().await?;
        let row = matches
            .filter(id.eq(match_id))
            .first::<DbMatch>(&mut conn)
            .await
            .optional()
            .map_err(db_err)?;
        Ok(row.map(Match::from))
    }

    #[instrument(name = "db.match.mark_running", skip(self), fields(id = %match_id))]
    async fn mark_running(&self, match_id: Uuid) -> DbResult<ClaimOutcome> {
        let mut conn = self.new_connection().await?;
        let updated = diesel::update(
            matches.filter(id.eq(match_id).and(status.eq(DbMatchStatus::Pending))),
        )
        .set((
            status.eq(DbMatchStatus::Running),
            started_at.eq(diesel::dsl::now),
        ))
        .execute(&mut conn)
        .await
        .map_err(db_err)?;

        if updated > 0 {
            debug!("claimed");
            return Ok(ClaimOutcome::Claimed);
        }

        // someone else transitioned the row; report what it became
        let current = matches
            .filter(id.eq(match_id))
            .select(status)
            .first::<DbMatchStatus>(&mut conn)
            .await
            .optional()
            .map_err(db_err)?;
        let outcome = match current {
            None => ClaimOutcome::Missing,
            Some(DbMatchStatus::Running) => ClaimOutcome::AlreadyRunning,
            Some(s) => ClaimOutcome::Stale(MatchStatus::from(s)),
        };
        debug!(?outcome, "claim_contended");
        Ok(outcome)
    }

    #[instrument(name = "db.match.complete", skip(self, outcome), fields(id = %match_id))]
    async fn complete_match(
        &self,
        match_id: Uuid,
        outcome: &MatchOutcome,
        terminal: MatchStatus,
    ) -> DbResult<Match> {
        let mut conn = self.new_connection().await?;
        // last-writer-wins; completed_at sticks to the first terminal write
        // so re-processing with identical output stores an identical row
        let row = diesel::update(matches.filter(id.eq(match_id)))
            .set((
                status.eq(DbMatchStatus::from(terminal)),
                score1.eq(outcome.score1),
                score2.eq(outcome.score2),
                winner.eq(outcome.winner),
                error_code.eq(outcome.error_code),
                error_message.eq(outcome.error_message.as_deref()),
                completed_at.eq(sql::<Nullable<Timestamptz>>("COALESCE(completed_at, now())")),
            ))
            .returning(matches::all_columns)
            .get_result::<DbMatch>(&mut conn)
            .await
            .map_err(db_err)?;
        info!(status = ?row.status, error_code = ?row.error_code, "terminal_write_ok");
        Ok(row.into())
    }

    #[instrument(name = "db.match.record_error", skip(self, message), fields(id = %match_id))]
    async fn record_error(&self, match_id: Uuid, code: i32, message: &str) -> DbResult<()> {
        let mut conn = self.new_connection().await?;
        diesel::update(matches.filter(id.eq(match_id)))
            .set((error_code.eq(code), error_message.eq(message)))
            .execute(&mut conn)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    #[instrument(name = "db.match.finalize_failed", skip(self, message), fields(id = %match_id))]
    async fn finalize_failed(&self, match_id: Uuid, message: &str) -> DbResult<Match> {
        let mut conn = self.new_connection().await?;
        // never clobber a completed result with a late failure report
        let row = diesel::update(
            matches.filter(id.eq(match_id).and(status.ne(DbMatchStatus::Completed))),
        )
        .set((
            status.eq(DbMatchStatus::Failed),
            error_message.eq(message),
            error_code.eq(sql::<Nullable<Int4>>("COALESCE(error_code, 1)")),
            completed_at.eq(sql::<Nullable<Timestamptz>>("COALESCE(completed_at, now())")),
        ))
        .returning(matches::all_columns)
        .get_result::<DbMatch>(&mut conn)
        .await
        .optional()
        .map_err(db_err)?;

        match row {
            Some(row) => {
                warn!("match_failed_terminally");
                Ok(row.into())
            }
            None => {
                // already completed or gone; hand back whatever exists
                let existing = matches
                    .filter(id.eq(match_id))
                    .first::<DbMatch>(&mut conn)
                    .await
                    .optional()
                    .map_err(db_err)?;
                existing.map(Match::from).ok_or(DbError::NotFound)
            }
        }
    }

    #[instrument(name = "db.match.list_by_status", skip(self), fields(tournament_id = %tournament))]
    async fn list_by_status(
        &self,
        tournament: Uuid,
        match_status: MatchStatus,
    ) -> DbResult<Vec<Match>> {
        let mut conn = self.new_connection().await?;
        let rows = matches
            .filter(
                tournament_id
                    .eq(tournament)
                    .and(status.eq(DbMatchStatus::from(match_status))),
            )
            .order((created_at.asc(), id.asc()))
            .load::<DbMatch>(&mut conn)
            .await
            .map_err(db_err)?;
        Ok(rows.into_iter().map(Match::from).collect())
    }

    #[instrument(name = "db.match.list_pending", skip(self))]
    async fn list_pending(
        &self,
        limit: i64,
        after: Option<(DateTime<Utc>, Uuid)>,
    ) -> DbResult<Vec<Match>> {
        let mut conn = self.new_connection().await?;
        let mut query = matches
            .filter(status.eq(DbMatchStatus::Pending))
            .into_boxed::<diesel::pg::Pg>();
        if let Some((cursor_at, cursor_id)) = after {
            query = query.filter(
                created_at
                    .gt(cursor_at)
                    .or(created_at.eq(cursor_at).and(id.gt(cursor_id))),
            );
        }
        let rows = query
            .order((created_at.asc(), id.asc()))
            .limit(limit)
            .load::<DbMatch>(&mut conn)
            .await
            .map_err(db_err)?;
        Ok(rows.into_iter().map(Match::from).collect())
    }

    #[instrument(name = "db.match.reclaim_stuck", skip(self))]
    async fn reclaim_stuck(&self, stuck_for: Duration, limit: i64) -> DbResult<Vec<Match>> {
        let mut conn = self.new_connection().await?;
        let cutoff = Utc::now() - chrono::Duration::from_std(stuck_for).unwrap_or_default();

        let stuck_ids: Vec<Uuid> = matches
            .filter(status.eq(DbMatchStatus::Running).and(started_at.lt(cutoff)))
            .order(started_at.asc())
            .select(id)
            .limit(limit)
            .load(&mut conn)
            .await
            .map_err(db_err)?;
        if stuck_ids.is_empty() {
            return Ok(Vec::new());
        }

        // re-check the status so a match completing in between is untouched
        let rows = diesel::update(
            matches.filter(id.eq_any(&stuck_ids).and(status.eq(DbMatchStatus::Running))),
        )
        .set((
            status.eq(DbMatchStatus::Pending),
            started_at.eq(None::<DateTime<Utc>>),
        ))
        .returning(matches::all_columns)
        .get_results::<DbMatch>(&mut conn)
        .await
        .map_err(db_err)?;

        info!(reclaimed = rows.len(), "stuck_matches_reclaimed");
        Ok(rows.into_iter().map(Match::from).collect())
    }

    #[instrument(name = "db.match.reset_failed", skip(self), fields(tournament_id = %tournament))]
    async fn reset_failed(&self, tournament: Uuid) -> DbResult<Vec<Match>> {
        let mut conn = self.new_connection().await?;
        let rows = diesel::update(
            matches.filter(
                tournament_id
                    .eq(tournament)
                    .and(status.eq(DbMatchStatus::Failed)),
            ),
        )
        .set((
            status.eq(DbMatchStatus::Pending),
            score1.eq(None::<i32>),
            score2.eq(None::<i32>),
            winner.eq(None::<i16>),
            error_code.eq(None::<i32>),
            error_message.eq(None::<String>),
            started_at.eq(None::<DateTime<Utc>>),
            completed_at.eq(None::<DateTime<Utc>>),
        ))
        .returning(matches::all_columns)
        .get_results::<DbMatch>(&mut conn)
        .await
        .map_err(db_err)?;

        info!(reset = rows.len(), "failed_matches_reset");
        Ok(rows.into_iter().map(Match::from).collect())
    }
}
