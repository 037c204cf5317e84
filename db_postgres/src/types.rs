// enum mappings between core and the postgres enum types

use arena_core::{MatchStatus, Priority, TournamentStatus};
use diesel_derive_enum::DbEnum;

#[derive(Debug, Clone, Copy, PartialEq, Eq, DbEnum)]
#[ExistingTypePath = "crate::schema::sql_types::TournamentStatus"]
pub enum DbTournamentStatus {
    Pending,
    Active,
    Completed,
    Cancelled,
}

impl From<DbTournamentStatus> for TournamentStatus {
    fn from(s: DbTournamentStatus) -> Self {
        match s {
            DbTournamentStatus::Pending => TournamentStatus::Pending,
            DbTournamentStatus::Active => TournamentStatus::Active,
            DbTournamentStatus::Completed => TournamentStatus::Completed,
            DbTournamentStatus::Cancelled => TournamentStatus::Cancelled,
        }
    }
}

impl From<TournamentStatus> for DbTournamentStatus {
    fn from(s: TournamentStatus) -> Self {
        match s {
            TournamentStatus::Pending => DbTournamentStatus::Pending,
            TournamentStatus::Active => DbTournamentStatus::Active,
            TournamentStatus::Completed => DbTournamentStatus::Completed,
            TournamentStatus::Cancelled => DbTournamentStatus::Cancelled,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, DbEnum)]
#[ExistingTypePath = "crate::schema::sql_types::MatchStatus"]
pub enum DbMatchStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl From<DbMatchStatus> for MatchStatus {
    fn from(s: DbMatchStatus) -> Self {
        match s {
            DbMatchStatus::Pending => MatchStatus::Pending,
            DbMatchStatus::Running => MatchStatus::Running,
            DbMatchStatus::Completed => MatchStatus::Completed,
            DbMatchStatus::Failed => MatchStatus::Failed,
        }
    }
}

impl From<MatchStatus> for DbMatchStatus {
    fn from(s: MatchStatus) -> Self {
        match s {
            MatchStatus::Pending => DbMatchStatus::Pending,
            MatchStatus::Running => DbMatchStatus::Running,
            MatchStatus::Completed => DbMatchStatus::Completed,
            MatchStatus::Failed => DbMatchStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, DbEnum)]
#[ExistingTypePath = "crate::schema::sql_types::MatchPriority"]
pub enum DbMatchPriority {
    High,
    Medium,
    Low,
}

impl From<DbMatchPriority> for Priority {
    fn from(p: DbMatchPriority) -> Self {
        match p {
            DbMatchPriority::High => Priority::High,
            DbMatchPriority::Medium => Priority::Medium,
            DbMatchPriority::Low => Priority::Low,
        }
    }
}

impl From<Priority> for DbMatchPriority {
    fn from(p: Priority) -> Self {
        match p {
            Priority::High => DbMatchPriority::High,
            Priority::Medium => DbMatchPriority::Medium,
            Priority::Low => DbMatchPriority::Low,
        }
    }
}
