//! implementation of the participant port

use crate::{
    PgDb, TxError, db_err,
    schema::{rating_history, tournament_participants::dsl::*},
};
use arena_core::{DbError, DbResult, DbpParticipant, Participant, RatingUpdate, Tally};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::{
    BoolExpressionMethods, ExpressionMethods, Insertable, OptionalExtension, QueryDsl, Queryable,
};
use diesel_async::{AsyncConnection, RunQueryDsl, scoped_futures::ScopedFutureExt};
use tracing::{debug, info, instrument};
use uuid::Uuid;

// ------------------- DB-Row (SELECT/RETURNING) -------------------
#[derive(Debug, Queryable)]
pub struct DbParticipant {
    pub tournament_id: Uuid,
    pub program_id: Uuid,
    pub rating: i32,
    pub wins: i32,
    pub losses: i32,
    pub draws: i32,
    pub joined_at: DateTime<Utc>,
}

impl From<DbParticipant> for Participant {
    fn from(r: DbParticipant) -> Self {
        Participant {
            tournament_id: r.tournament_id,
            program_id: r.program_id,
            rating: r.rating,
            wins: r.wins,
            losses: r.losses,
            draws: r.draws,
            joined_at: r.joined_at,
        }
    }
}

// ------------------- INSERT (rating history) -------------------
#[derive(Debug, Insertable)]
#[diesel(table_name = rating_history)]
struct NewRatingHistory {
    tournament_id: Uuid,
    program_id: Uuid,
    match_id: Uuid,
    old_rating: i32,
    new_rating: i32,
    delta: i32,
}

// ------------------- Impl trait --------------------

#[async_trait]
impl DbpParticipant for PgDb {
    #[instrument(name = "db.participant.list", skip(self), fields(tournament_id = %tournament))]
    async fn list_participants(&self, tournament: Uuid) -> DbResult<Vec<Participant>> {
        let mut conn = self.new_connection().await?;
        let rows = tournament_participants
            .filter(tournament_id.eq(tournament))
            .order(joined_at.asc())
            .load::<DbParticipant>(&mut conn)
            .await
            .map_err(db_err)?;
        debug!(count = rows.len(), "list_ok");
        Ok(rows.into_iter().map(Participant::from).collect())
    }

    #[instrument(
        name = "db.participant.get",
        skip(self),
        fields(tournament_id = %tournament, program_id = %program)
    )]
    async fn get_participant(
        &self,
        tournament: Uuid,
        program: Uuid,
    ) -> DbResult<Option<Participant>> {
        let mut conn = self.new_connection().await?;
        let row = tournament_participants
            .filter(tournament_id.eq(tournament).and(program_id.eq(program)))
            .first::<DbParticipant>(&mut conn)
            .await
            .optional()
            .map_err(db_err)?;
        Ok(row.map(Participant::from))
    }

    /// Exactly-once per match: both aggregates are locked up front (sorted,
    /// so concurrent appliers cannot deadlock), then the history table
    /// decides whether this match was already committed by another lease.
    /// The history table is partitioned, which rules out a plain unique
    /// index on `(match_id, program_id)`.
    #[instrument(
        name = "db.participant.apply",
        skip(self, updates),
        fields(tournament_id = %tournament, match_id = %m_id)
    )]
    async fn apply_match_result(
        &self,
        tournament: Uuid,
        m_id: Uuid,
        updates: &[RatingUpdate],
    ) -> DbResult<()> {
        let mut ordered: Vec<&RatingUpdate> = updates.iter().collect();
        ordered.sort_by_key(|u| u.program_id);

        let mut conn = self.new_connection().await?;
        let applied = conn
            .transaction::<_, TxError, _>(|conn| {
                let ordered = &ordered;
                async move {
                    let mut locked = Vec::with_capacity(ordered.len());
                    for update in ordered {
                        let row = tournament_participants
                            .filter(
                                tournament_id
                                    .eq(tournament)
                                    .and(program_id.eq(update.program_id)),
                            )
                            .for_update()
                            .first::<DbParticipant>(conn)
                            .await
                            .optional()?
                            .ok_or(TxError::Missing)?;
                        locked.push(row);
                    }

                    let seen: i64 = rating_history::table
                        .filter(rating_history::match_id.eq(m_id))
                        .count()
                        .get_result(conn)
                        .await?;
                    if seen > 0 {
                        return Ok(false);
                    }

                    for (row, update) in locked.iter().zip(ordered.iter()) {
                        let (win_inc, loss_inc, draw_inc) = match update.tally {
                            Tally::Win => (1, 0, 0),
                            Tally::Loss => (0, 1, 0),
                            Tally::Draw => (0, 0, 1),
                        };
                        diesel::update(
                            tournament_participants.filter(
                                tournament_id
                                    .eq(tournament)
                                    .and(program_id.eq(update.program_id)),
                            ),
                        )
                        .set((
                            rating.eq(row.rating + update.delta),
                            wins.eq(row.wins + win_inc),
                            losses.eq(row.losses + loss_inc),
                            draws.eq(row.draws + draw_inc),
                        ))
                        .execute(conn)
                        .await?;

                        diesel::insert_into(rating_history::table)
                            .values(NewRatingHistory {
                                tournament_id: tournament,
                                program_id: update.program_id,
                                match_id: m_id,
                                old_rating: row.rating,
                                new_rating: row.rating + update.delta,
                                delta: update.delta,
                            })
                            .execute(conn)
                            .await?;
                    }
                    Ok(true)
                }
                .scope_boxed()
            })
            .await
            .map_err(DbError::from)?;

        if applied {
            info!(updates = updates.len(), "result_applied");
        } else {
            debug!("result_already_applied");
        }
        Ok(())
    }
}
