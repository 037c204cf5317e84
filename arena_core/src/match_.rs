// match of tournament and its wire descriptor

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// lifecycle of a match row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    /// waiting for a worker
    #[default]
    Pending,
    /// claimed by a worker, executor running
    Running,
    /// terminal, result recorded
    Completed,
    /// terminal, infrastructure failure recorded
    Failed,
}

impl MatchStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, MatchStatus::Completed | MatchStatus::Failed)
    }
}

/// admission band of the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    /// backing store list key of the band
    pub fn queue_key(&self) -> &'static str {
        match self {
            Priority::High => "queue:high",
            Priority::Medium => "queue:medium",
            Priority::Low => "queue:low",
        }
    }

    /// dequeue order: highest band first
    pub const ORDERED: [Priority; 3] = [Priority::High, Priority::Medium, Priority::Low];
}

/// match of a tournament; the database row is authoritative
#[derive(Debug, Clone, PartialEq)]
pub struct Match {
    pub id: Uuid,
    pub tournament_id: Uuid,
    pub game_type: String,
    pub program1_id: Uuid,
    pub program2_id: Uuid,
    pub status: MatchStatus,
    pub priority: Priority,
    pub round_number: i32,
    pub score1: Option<i32>,
    pub score2: Option<i32>,
    /// 0 draw, 1 program1, 2 program2; unset while pending or on infra failure
    pub winner: Option<i16>,
    pub error_code: Option<i32>,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// insert form of a match row
#[derive(Debug, Clone)]
pub struct NewMatch {
    pub tournament_id: Uuid,
    pub game_type: String,
    pub program1_id: Uuid,
    pub program2_id: Uuid,
    pub priority: Priority,
    pub round_number: i32,
}

/// transient copy of a match carried through the queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchDescriptor {
    pub id: Uuid,
    pub tournament_id: Uuid,
    pub program1_id: Uuid,
    pub program2_id: Uuid,
    pub game_type: String,
    pub priority: Priority,
    pub status: MatchStatus,
    pub created_at: DateTime<Utc>,
}

impl From<&Match> for MatchDescriptor {
    fn from(m: &Match) -> Self {
        MatchDescriptor {
            id: m.id,
            tournament_id: m.tournament_id,
            program1_id: m.program1_id,
            program2_id: m.program2_id,
            game_type: m.game_type.clone(),
            priority: m.priority,
            status: m.status,
            created_at: m.created_at,
        }
    }
}

/// structured result of one sandbox execution
#[derive(Debug, Clone, PartialEq)]
pub struct MatchOutcome {
    pub score1: i32,
    pub score2: i32,
    /// None when the failure leaves no meaningful winner
    pub winner: Option<i16>,
    /// 0 ok, 1 program1 faulted, 2 program2 faulted, other values are
    /// infrastructure failures
    pub error_code: i32,
    pub error_message: Option<String>,
    pub duration: Duration,
}

impl MatchOutcome {
    /// winner derived from the scores of a clean run
    pub fn winner_from_scores(score1: i32, score2: i32) -> i16 {
        use std::cmp::Ordering::*;
        match score1.cmp(&score2) {
            Greater => 1,
            Less => 2,
            Equal => 0,
        }
    }

    /// a fault of one side still yields a completed match with a derived winner
    pub fn is_match_level(&self) -> bool {
        matches!(self.error_code, 0 | 1 | 2)
    }

    pub fn terminal_status(&self) -> MatchStatus {
        if self.is_match_level() {
            MatchStatus::Completed
        } else {
            MatchStatus::Failed
        }
    }
}

/// inputs handed to the sandbox for one match
#[derive(Debug, Clone, PartialEq)]
pub struct MatchJob {
    pub game_type: String,
    pub program1_path: String,
    pub program2_path: String,
    pub iterations: u32,
    pub verbose: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn winner_follows_score_ordering() {
        assert_eq!(MatchOutcome::winner_from_scores(3, 1), 1);
        assert_eq!(MatchOutcome::winner_from_scores(1, 3), 2);
        assert_eq!(MatchOutcome::winner_from_scores(2, 2), 0);
    }

    #[test]
    fn fault_codes_complete_the_match() {
        let mut outcome = MatchOutcome {
            score1: 0,
            score2: 0,
            winner: Some(2),
            error_code: 1,
            error_message: Some("segfault".into()),
            duration: Duration::from_secs(1),
        };
        assert_eq!(outcome.terminal_status(), MatchStatus::Completed);

        outcome.error_code = 3;
        outcome.winner = None;
        assert_eq!(outcome.terminal_status(), MatchStatus::Failed);
    }

    #[test]
    fn descriptor_wire_format_keeps_priority_band() {
        let now = Utc::now();
        let descriptor = MatchDescriptor {
            id: Uuid::new_v4(),
            tournament_id: Uuid::new_v4(),
            program1_id: Uuid::new_v4(),
            program2_id: Uuid::new_v4(),
            game_type: "connect4".into(),
            priority: Priority::High,
            status: MatchStatus::Pending,
            created_at: now,
        };
        let json = serde_json::to_string(&descriptor).unwrap();
        assert!(json.contains("\"priority\":\"high\""));
        let back: MatchDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(back, descriptor);
    }
}
