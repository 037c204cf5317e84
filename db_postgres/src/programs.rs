//! implementation of the program port

use crate::{
    PgDb, db_err,
    schema::{games, programs, programs::dsl::*, tournament_participants},
};
use arena_core::{DbResult, DbpProgram, Program};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::{
    BoolExpressionMethods, ExpressionMethods, JoinOnDsl, OptionalExtension, QueryDsl, Queryable,
};
use diesel_async::RunQueryDsl;
use tracing::{debug, instrument};
use uuid::Uuid;

// ------------------- DB-Row (SELECT/RETURNING) -------------------
#[derive(Debug, Queryable)]
pub struct DbProgram {
    pub id: Uuid,
    pub team_id: Option<Uuid>,
    pub tournament_id: Option<Uuid>,
    pub game_id: Uuid,
    pub code_path: String,
    pub version: i32,
    pub created_at: DateTime<Utc>,
}

impl From<DbProgram> for Program {
    fn from(r: DbProgram) -> Self {
        Program {
            id: r.id,
            team_id: r.team_id,
            tournament_id: r.tournament_id,
            game_id: r.game_id,
            code_path: r.code_path,
            version: r.version,
        }
    }
}

// ------------------- Impl trait --------------------

#[async_trait]
impl DbpProgram for PgDb {
    #[instrument(name = "db.program.get", skip(self), fields(id = %program_id))]
    async fn get_program(&self, program_id: Uuid) -> DbResult<Option<Program>> {
        let mut conn = self.new_connection().await?;
        let row = programs
            .filter(id.eq(program_id))
            .first::<DbProgram>(&mut conn)
            .await
            .optional()
            .map_err(db_err)?;
        Ok(row.map(Program::from))
    }

    #[instrument(name = "db.program.list", skip(self), fields(tournament_id = %tournament))]
    async fn list_programs(&self, tournament: Uuid, game_type: &str) -> DbResult<Vec<Program>> {
        let mut conn = self.new_connection().await?;
        // participant insertion order decides match generation order
        let rows = programs
            .inner_join(
                tournament_participants::table
                    .on(tournament_participants::program_id.eq(programs::id)),
            )
            .inner_join(games::table.on(games::id.eq(programs::game_id)))
            .filter(
                tournament_participants::tournament_id
                    .eq(tournament)
                    .and(games::name.eq(game_type)),
            )
            .order(tournament_participants::joined_at.asc())
            .select(programs::all_columns)
            .load::<DbProgram>(&mut conn)
            .await
            .map_err(db_err)?;
        debug!(count = rows.len(), "list_ok");
        Ok(rows.into_iter().map(Program::from).collect())
    }
}
