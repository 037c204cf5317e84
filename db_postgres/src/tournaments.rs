//! implementation of the tournament port

use crate::{
    DbTournamentStatus, PgDb, db_err,
    schema::{games, tournament_games, tournaments::dsl::*},
};
use arena_core::{DbError, DbResult, DbpTournament, Tournament};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::{
    BoolExpressionMethods, ExpressionMethods, JoinOnDsl, OptionalExtension, QueryDsl, Queryable,
};
use diesel_async::RunQueryDsl;
use tracing::{debug, info, instrument};
use uuid::Uuid;

// ------------------- DB-Row (SELECT/RETURNING) -------------------
#[derive(Debug, Queryable)]
pub struct DbTournament {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub status: DbTournamentStatus,
    pub max_participants: Option<i32>,
    pub max_team_size: i32,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl DbTournament {
    fn into_core(self, game_types: Vec<String>) -> Tournament {
        Tournament {
            id: self.id,
            code: self.code,
            name: self.name,
            game_types,
            status: self.status.into(),
            max_participants: self.max_participants,
            max_team_size: self.max_team_size,
            start_time: self.start_time,
            end_time: self.end_time,
        }
    }
}

// ------------------- Impl trait --------------------

#[async_trait]
impl DbpTournament for PgDb {
    #[instrument(name = "db.tournament.get", skip(self), fields(id = %t_id))]
    async fn get_tournament(&self, t_id: Uuid) -> DbResult<Option<Tournament>> {
        let mut conn = self.new_connection().await?;
        let row = tournaments
            .filter(id.eq(t_id))
            .first::<DbTournament>(&mut conn)
            .await
            .optional()
            .map_err(db_err)?;
        let Some(row) = row else {
            debug!("tournament_not_found");
            return Ok(None);
        };

        let game_types: Vec<String> = tournament_games::table
            .inner_join(games::table.on(games::id.eq(tournament_games::game_id)))
            .filter(
                tournament_games::tournament_id
                    .eq(t_id)
                    .and(tournament_games::is_active.eq(true)),
            )
            .order(games::name.asc())
            .select(games::name)
            .load(&mut conn)
            .await
            .map_err(db_err)?;

        debug!("found_tournament");
        Ok(Some(row.into_core(game_types)))
    }

    #[instrument(name = "db.tournament.activate", skip(self), fields(id = %t_id))]
    async fn activate_tournament(&self, t_id: Uuid, start: DateTime<Utc>) -> DbResult<bool> {
        let mut conn = self.new_connection().await?;
        let updated = diesel::update(
            tournaments.filter(id.eq(t_id).and(status.eq(DbTournamentStatus::Pending))),
        )
        .set((
            status.eq(DbTournamentStatus::Active),
            start_time.eq(start),
        ))
        .execute(&mut conn)
        .await
        .map_err(db_err)?;
        info!(activated = updated > 0, "activate_done");
        Ok(updated > 0)
    }

    #[instrument(name = "db.tournament.complete", skip(self), fields(id = %t_id))]
    async fn complete_tournament(&self, t_id: Uuid, end: DateTime<Utc>) -> DbResult<bool> {
        let mut conn = self.new_connection().await?;
        let updated = diesel::update(
            tournaments.filter(id.eq(t_id).and(status.eq(DbTournamentStatus::Active))),
        )
        .set((
            status.eq(DbTournamentStatus::Completed),
            end_time.eq(end),
        ))
        .execute(&mut conn)
        .await
        .map_err(db_err)?;
        info!(completed = updated > 0, "complete_done");
        Ok(updated > 0)
    }

    #[instrument(name = "db.tournament.current_round", skip(self), fields(id = %t_id))]
    async fn current_round(&self, t_id: Uuid, game_type: &str) -> DbResult<i32> {
        let mut conn = self.new_connection().await?;
        let round: Option<i32> = tournament_games::table
            .inner_join(games::table.on(games::id.eq(tournament_games::game_id)))
            .filter(
                tournament_games::tournament_id
                    .eq(t_id)
                    .and(games::name.eq(game_type)),
            )
            .select(tournament_games::current_round)
            .first(&mut conn)
            .await
            .optional()
            .map_err(db_err)?;
        round.ok_or(DbError::NotFound)
    }

    #[instrument(name = "db.tournament.bump_round", skip(self), fields(id = %t_id))]
    async fn bump_round(&self, t_id: Uuid, game_type: &str) -> DbResult<i32> {
        let mut conn = self.new_connection().await?;
        let game_ids = games::table
            .filter(games::name.eq(game_type))
            .select(games::id);
        let round: Option<i32> = diesel::update(
            tournament_games::table.filter(
                tournament_games::tournament_id
                    .eq(t_id)
                    .and(tournament_games::game_id.eq_any(game_ids)),
            ),
        )
        .set((
            tournament_games::current_round.eq(tournament_games::current_round + 1),
            tournament_games::round_completed.eq(false),
        ))
        .returning(tournament_games::current_round)
        .get_result(&mut conn)
        .await
        .optional()
        .map_err(db_err)?;

        let round = round.ok_or(DbError::NotFound)?;
        info!(round, "round_bumped");
        Ok(round)
    }

    #[instrument(name = "db.tournament.game_multiplier", skip(self))]
    async fn game_multiplier(&self, game_type: &str) -> DbResult<i32> {
        let mut conn = self.new_connection().await?;
        let multiplier: Option<i32> = games::table
            .filter(games::name.eq(game_type))
            .select(games::score_multiplier)
            .first(&mut conn)
            .await
            .optional()
            .map_err(db_err)?;
        Ok(multiplier.unwrap_or(1))
    }
}
