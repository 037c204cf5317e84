// tournament entity and status machine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// state of tournament orchestration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TournamentStatus {
    /// created, accepting participants
    #[default]
    Pending,
    /// started, matches are generated and executed
    Active,
    /// explicitly completed
    Completed,
    /// abandoned before or after start
    Cancelled,
}

/// tournament owning its matches and participants
#[derive(Debug, Clone, PartialEq)]
pub struct Tournament {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub game_types: Vec<String>,
    pub status: TournamentStatus,
    pub max_participants: Option<i32>,
    pub max_team_size: i32,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl Tournament {
    pub fn is_full(&self, participant_count: usize) -> bool {
        match self.max_participants {
            Some(max) => participant_count as i32 >= max,
            None => false,
        }
    }
}

/// per-game round bookkeeping of a tournament
#[derive(Debug, Clone, PartialEq)]
pub struct TournamentGame {
    pub tournament_id: Uuid,
    pub game_type: String,
    pub is_active: bool,
    pub current_round: i32,
    pub round_completed: bool,
}
