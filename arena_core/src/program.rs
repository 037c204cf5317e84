// program entity

use uuid::Uuid;

/// user-submitted program; code lives out-of-band at `code_path`
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub id: Uuid,
    pub team_id: Option<Uuid>,
    pub tournament_id: Option<Uuid>,
    pub game_id: Uuid,
    pub code_path: String,
    pub version: i32,
}

impl Program {
    /// same-team programs never play each other
    pub fn same_team(&self, other: &Program) -> bool {
        match (self.team_id, other.team_id) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}
