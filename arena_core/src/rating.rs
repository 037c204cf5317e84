//! Rating policies and the standings engine.
//!
//! The rating function is pluggable: it must be pure in its inputs and
//! produce a bounded integer delta. Two policies ship with the crate, the
//! score-summation default and a classic Elo variant.

use crate::{
    BroadcastPort, CoreResult, DatabasePort, Match, NoticeKind, RatingUpdate, Tally,
    TournamentNotice,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// hard cap on a single rating movement, whatever the policy says
pub const MAX_RATING_DELTA: i32 = 10_000;

/// pure inputs of one rating application
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RatingInput {
    pub rating1: i32,
    pub rating2: i32,
    pub score1: i32,
    pub score2: i32,
    /// 0 draw, 1 program1 won, 2 program2 won
    pub winner: i16,
    /// per-game multiplier (1 when unconfigured)
    pub multiplier: i32,
}

/// rating policy trait
pub trait RatingPolicy: Send + Sync {
    /// deltas for (program1, program2)
    fn deltas(&self, input: &RatingInput) -> (i32, i32);

    fn name(&self) -> &'static str;
}

/// reference policy: each side collects its own score times the game
/// multiplier
#[derive(Debug, Clone, Copy, Default)]
pub struct ScoreSum;

impl RatingPolicy for ScoreSum {
    fn deltas(&self, input: &RatingInput) -> (i32, i32) {
        let d1 = input.score1.saturating_mul(input.multiplier);
        let d2 = input.score2.saturating_mul(input.multiplier);
        (clamp_delta(d1), clamp_delta(d2))
    }

    fn name(&self) -> &'static str {
        "score_sum"
    }
}

/// classic Elo with a fixed K factor
#[derive(Debug, Clone, Copy)]
pub struct Elo {
    pub k: f64,
}

impl Default for Elo {
    fn default() -> Self {
        Elo { k: 32.0 }
    }
}

impl RatingPolicy for Elo {
    fn deltas(&self, input: &RatingInput) -> (i32, i32) {
        let expected1 =
            1.0 / (1.0 + 10f64.powf((input.rating2 - input.rating1) as f64 / 400.0));
        let actual1 = match input.winner {
            1 => 1.0,
            2 => 0.0,
            _ => 0.5,
        };
        let d1 = (self.k * (actual1 - expected1)).round() as i32;
        (clamp_delta(d1), clamp_delta(-d1))
    }

    fn name(&self) -> &'static str {
        "elo"
    }
}

fn clamp_delta(delta: i32) -> i32 {
    delta.clamp(-MAX_RATING_DELTA, MAX_RATING_DELTA)
}

/// Applies a committed match result to the persistent aggregates.
///
/// Only clean results (`error_code = 0`) reach this point; one-sided faults
/// and infrastructure failures leave ratings untouched.
pub struct StandingsEngine {
    database: Arc<dyn DatabasePort>,
    broadcast: Arc<dyn BroadcastPort>,
    policy: Arc<dyn RatingPolicy>,
}

impl StandingsEngine {
    pub fn new(
        database: Arc<dyn DatabasePort>,
        broadcast: Arc<dyn BroadcastPort>,
        policy: Arc<dyn RatingPolicy>,
    ) -> Self {
        StandingsEngine {
            database,
            broadcast,
            policy,
        }
    }

    #[instrument(name = "standings.apply", skip(self, m), fields(match_id = %m.id))]
    pub async fn apply(&self, m: &Match) -> CoreResult<()> {
        let (Some(score1), Some(score2), Some(winner)) = (m.score1, m.score2, m.winner) else {
            debug!("no_scores_to_apply");
            return Ok(());
        };

        let p1 = self
            .database
            .get_participant(m.tournament_id, m.program1_id)
            .await?;
        let p2 = self
            .database
            .get_participant(m.tournament_id, m.program2_id)
            .await?;
        let (Some(p1), Some(p2)) = (p1, p2) else {
            // late-deleted participant; the match result stays, standings skip it
            warn!("participant_missing");
            return Ok(());
        };

        let multiplier = self.database.game_multiplier(&m.game_type).await?;
        let input = RatingInput {
            rating1: p1.rating,
            rating2: p2.rating,
            score1,
            score2,
            winner,
            multiplier,
        };
        let (delta1, delta2) = self.policy.deltas(&input);
        let (tally1, tally2) = match winner {
            1 => (Tally::Win, Tally::Loss),
            2 => (Tally::Loss, Tally::Win),
            _ => (Tally::Draw, Tally::Draw),
        };

        let updates = [
            RatingUpdate {
                program_id: m.program1_id,
                delta: delta1,
                tally: tally1,
            },
            RatingUpdate {
                program_id: m.program2_id,
                delta: delta2,
                tally: tally2,
            },
        ];
        self.database
            .apply_match_result(m.tournament_id, m.id, &updates)
            .await?;
        debug!(policy = self.policy.name(), delta1, delta2, "ratings_applied");

        // best-effort push; losing a notice never fails the pipeline
        if let Err(e) = self
            .broadcast
            .publish(TournamentNotice {
                tournament_id: m.tournament_id,
                kind: NoticeKind::LeaderboardUpdate,
                payload: json!({
                    "match_id": m.id,
                    "program1_id": m.program1_id,
                    "program2_id": m.program2_id,
                    "delta1": delta1,
                    "delta2": delta2,
                }),
            })
            .await
        {
            warn!(error = %e, "leaderboard_notice_dropped");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_sum_applies_multiplier() {
        let policy = ScoreSum;
        let input = RatingInput {
            rating1: 1000,
            rating2: 1000,
            score1: 12,
            score2: 7,
            winner: 1,
            multiplier: 3,
        };
        assert_eq!(policy.deltas(&input), (36, 21));
    }

    #[test]
    fn score_sum_clamps_runaway_scores() {
        let policy = ScoreSum;
        let input = RatingInput {
            rating1: 0,
            rating2: 0,
            score1: i32::MAX,
            score2: 0,
            winner: 1,
            multiplier: 2,
        };
        assert_eq!(policy.deltas(&input).0, MAX_RATING_DELTA);
    }

    #[test]
    fn elo_is_zero_sum() {
        let policy = Elo::default();
        let input = RatingInput {
            rating1: 1200,
            rating2: 1000,
            score1: 1,
            score2: 0,
            winner: 1,
            multiplier: 1,
        };
        let (d1, d2) = policy.deltas(&input);
        assert_eq!(d1 + d2, 0);
        assert!(d1 > 0 && d1 < 16, "favorite wins small: {d1}");
    }

    #[test]
    fn elo_upset_moves_more_points() {
        let policy = Elo::default();
        let upset = RatingInput {
            rating1: 1000,
            rating2: 1400,
            score1: 1,
            score2: 0,
            winner: 1,
            multiplier: 1,
        };
        let (d1, _) = policy.deltas(&upset);
        assert!(d1 > 16, "underdog win is rewarded: {d1}");
    }
}
