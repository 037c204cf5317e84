// participant aggregates and rating updates

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// per-tournament aggregate of one program
#[derive(Debug, Clone, PartialEq)]
pub struct Participant {
    pub tournament_id: Uuid,
    pub program_id: Uuid,
    pub rating: i32,
    pub wins: i32,
    pub losses: i32,
    pub draws: i32,
    pub joined_at: DateTime<Utc>,
}

impl Participant {
    pub fn matches_played(&self) -> i32 {
        self.wins + self.losses + self.draws
    }
}

/// outcome of one match from one participant's perspective
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tally {
    Win,
    Loss,
    Draw,
}

/// one participant's share of a committed match result
#[derive(Debug, Clone, PartialEq)]
pub struct RatingUpdate {
    pub program_id: Uuid,
    pub delta: i32,
    pub tally: Tally,
}

/// materialized leaderboard row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub tournament_id: Uuid,
    pub program_id: Uuid,
    pub rank: i64,
    pub rating: i32,
    pub wins: i32,
    pub losses: i32,
    pub draws: i32,
    pub last_updated: DateTime<Utc>,
}
