//! implementation of the leaderboard projection port

use crate::{
    PgDb, db_err,
    schema::leaderboard_tournament::dsl::*,
};
use arena_core::{DbResult, DbpLeaderboard, LeaderboardEntry};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::{ExpressionMethods, QueryDsl, Queryable};
use diesel::sql_query;
use diesel_async::RunQueryDsl;
use tracing::{debug, info, instrument};
use uuid::Uuid;

#[derive(Debug, Queryable)]
pub struct DbLeaderboardEntry {
    pub tournament_id: Uuid,
    pub program_id: Uuid,
    pub rank: i64,
    pub rating: i32,
    pub wins: i32,
    pub losses: i32,
    pub draws: i32,
    pub last_updated: DateTime<Utc>,
}

impl From<DbLeaderboardEntry> for LeaderboardEntry {
    fn from(r: DbLeaderboardEntry) -> Self {
        LeaderboardEntry {
            tournament_id: r.tournament_id,
            program_id: r.program_id,
            rank: r.rank,
            rating: r.rating,
            wins: r.wins,
            losses: r.losses,
            draws: r.draws,
            last_updated: r.last_updated,
        }
    }
}

#[async_trait]
impl DbpLeaderboard for PgDb {
    /// Concurrent refresh keeps readers unblocked; the unique indexes on
    /// both views make it legal.
    #[instrument(name = "db.leaderboard.refresh", skip(self))]
    async fn refresh_leaderboards(&self) -> DbResult<()> {
        let mut conn = self.new_connection().await?;
        sql_query("REFRESH MATERIALIZED VIEW CONCURRENTLY leaderboard_tournament")
            .execute(&mut conn)
            .await
            .map_err(db_err)?;
        sql_query("REFRESH MATERIALIZED VIEW CONCURRENTLY leaderboard_global")
            .execute(&mut conn)
            .await
            .map_err(db_err)?;
        info!("refresh_ok");
        Ok(())
    }

    #[instrument(name = "db.leaderboard.top", skip(self), fields(tournament_id = %tournament))]
    async fn leaderboard_top(
        &self,
        tournament: Uuid,
        limit: i64,
    ) -> DbResult<Vec<LeaderboardEntry>> {
        let mut conn = self.new_connection().await?;
        let rows = leaderboard_tournament
            .filter(tournament_id.eq(tournament))
            .order(rank.asc())
            .limit(limit)
            .load::<DbLeaderboardEntry>(&mut conn)
            .await
            .map_err(db_err)?;
        debug!(count = rows.len(), "top_ok");
        Ok(rows.into_iter().map(LeaderboardEntry::from).collect())
    }

    #[instrument(name = "db.leaderboard.full", skip(self), fields(tournament_id = %tournament))]
    async fn leaderboard_full(&self, tournament: Uuid) -> DbResult<Vec<LeaderboardEntry>> {
        let mut conn = self.new_connection().await?;
        let rows = leaderboard_tournament
            .filter(tournament_id.eq(tournament))
            .order(rank.asc())
            .load::<DbLeaderboardEntry>(&mut conn)
            .await
            .map_err(db_err)?;
        Ok(rows.into_iter().map(LeaderboardEntry::from).collect())
    }
}
