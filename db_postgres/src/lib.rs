// diesel postgres implementation of the database port

pub mod schema;
pub mod types;

mod leaderboard;
mod matches;
mod participants;
mod programs;
mod tournaments;

pub use types::*;

use anyhow::{Result, anyhow};
use arena_core::{DatabasePort, DbError, DbResult};
use async_trait::async_trait;
use diesel::result::{DatabaseErrorInformation, DatabaseErrorKind, Error as DieselError};
use diesel::sql_query;
use diesel_async::{
    AsyncMigrationHarness, AsyncPgConnection, RunQueryDsl,
    pooled_connection::{
        AsyncDieselConnectionManager,
        bb8::{Pool, PooledConnection},
    },
};
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use metrics::counter;
use tracing::{info, instrument, warn};

/// embed migrations
pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!();

pub struct PgDb {
    pool: Pool<AsyncPgConnection>,
}

impl PgDb {
    pub async fn new(database_url: &str, max_size: u32) -> Result<Self> {
        let config = AsyncDieselConnectionManager::new(database_url);
        Ok(PgDb {
            pool: Pool::builder().max_size(max_size).build(config).await?,
        })
    }

    /// Apply pending embedded migrations. The harness is synchronous, so it
    /// runs on the blocking pool with a connection checked out for the
    /// duration.
    #[instrument(name = "db.migration", skip(self))]
    pub async fn run_migration(&self) -> DbResult<()> {
        let conn = self
            .pool
            .get_owned()
            .await
            .map_err(|e| DbError::Other(e.into()))?;
        let applied = tokio::task::spawn_blocking(move || {
            AsyncMigrationHarness::new(conn)
                .run_pending_migrations(MIGRATIONS)
                .map(|versions| versions.len())
                .map_err(|e| anyhow!("migration failed: {e}"))
        })
        .await
        .map_err(|e| DbError::Other(anyhow!("migration task panicked: {e}")))??;

        info!(applied, "migrations_done");
        Ok(())
    }

    #[instrument(name = "db.conn.get", skip(self))]
    pub(crate) async fn new_connection(&self) -> DbResult<PooledConnection<'_, AsyncPgConnection>> {
        self.pool.get().await.map_err(|e| {
            // checkout fails when the pool is exhausted or postgres is gone
            warn!(error = %e, "checkout_failed");
            counter!("db_pool_get_failures_total").increment(1);
            DbError::Other(e.into())
        })
    }
}

#[async_trait]
impl DatabasePort for PgDb {
    #[instrument(name = "db.ping", skip(self))]
    async fn ping_db(&self) -> DbResult<()> {
        let mut conn = self.new_connection().await?;
        sql_query("SELECT 1")
            .execute(&mut conn)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}

fn constraint_of(info: &(dyn DatabaseErrorInformation + Send + Sync)) -> Option<String> {
    info.constraint_name().map(str::to_owned)
}

/// Collapse diesel's error surface into the port taxonomy. Constraint names
/// ride along where postgres reports them, so callers can tell which
/// invariant tripped.
pub(crate) fn db_err(e: DieselError) -> DbError {
    use DatabaseErrorKind as Kind;
    match e {
        DieselError::NotFound => DbError::NotFound,
        DieselError::DatabaseError(Kind::SerializationFailure, _) => DbError::SerializationFailure,
        DieselError::DatabaseError(Kind::UniqueViolation, info) => {
            DbError::UniqueViolation(constraint_of(info.as_ref()))
        }
        DieselError::DatabaseError(Kind::ForeignKeyViolation, info) => {
            DbError::ForeignKeyViolation(constraint_of(info.as_ref()))
        }
        DieselError::DatabaseError(Kind::CheckViolation, info) => {
            DbError::CheckViolation(constraint_of(info.as_ref()))
        }
        other => DbError::Other(anyhow!(other)),
    }
}

/// error type usable inside diesel-async transactions; folded into
/// [`DbError`] at the adapter boundary
#[derive(Debug, thiserror::Error)]
pub(crate) enum TxError {
    #[error(transparent)]
    Diesel(#[from] DieselError),

    #[error("entity not found")]
    Missing,
}

impl From<TxError> for DbError {
    fn from(e: TxError) -> Self {
        match e {
            TxError::Diesel(inner) => db_err(inner),
            TxError::Missing => DbError::NotFound,
        }
    }
}
