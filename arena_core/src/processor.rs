//! Per-match pipeline invoked by a worker.
//!
//! The processor owns exactly one mutation surface: the match row. It claims
//! the row, runs the sandbox, persists the terminal result idempotently and
//! hands clean results to the standings engine.

use crate::{
    BroadcastPort, ClaimOutcome, CoreError, DatabasePort, Match, MatchDescriptor, MatchJob,
    MatchOutcome, NoticeKind, SandboxError, SandboxPort, StandingsEngine, TournamentNotice,
};
use metrics::{counter, histogram};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// error code persisted when the executor itself failed to deliver a verdict
const EXECUTOR_ERROR_CODE: i32 = 1;

/// how one processing attempt ended
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    /// terminal transition written
    Finished(Match),
    /// stale descriptor: the row was already terminal or gone
    Skipped,
}

/// error surfaced to the worker's retry logic
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// never retried; the worker finalizes the match as failed
    #[error("match rejected: {0}")]
    Terminal(String),

    /// retried with backoff inside the worker lease
    #[error(transparent)]
    Transient(#[from] CoreError),
}

pub struct MatchProcessor {
    database: Arc<dyn DatabasePort>,
    sandbox: Arc<dyn SandboxPort>,
    broadcast: Arc<dyn BroadcastPort>,
    standings: StandingsEngine,
    iterations: u32,
    verbose: bool,
    // per-process result cache by match id
    results: Mutex<HashMap<Uuid, MatchOutcome>>,
}

impl MatchProcessor {
    pub fn new(
        database: Arc<dyn DatabasePort>,
        sandbox: Arc<dyn SandboxPort>,
        broadcast: Arc<dyn BroadcastPort>,
        standings: StandingsEngine,
        iterations: u32,
        verbose: bool,
    ) -> Self {
        MatchProcessor {
            database,
            sandbox,
            broadcast,
            standings,
            iterations,
            verbose,
            results: Mutex::new(HashMap::new()),
        }
    }

    /// cached executor outcome of an already-processed match
    pub fn cached_result(&self, match_id: Uuid) -> Option<MatchOutcome> {
        self.results.lock().expect("poisoned").get(&match_id).cloned()
    }

    #[instrument(name = "processor.process", skip(self, descriptor), fields(match_id = %descriptor.id))]
    pub async fn process(
        &self,
        descriptor: &MatchDescriptor,
    ) -> Result<ProcessOutcome, ProcessError> {
        // 1. claim the row; duplicates of a crashed claim proceed, stale
        //    descriptors are dropped. Only the claiming lease counts the
        //    terminal metrics; the store serializes the rating side.
        let claimed = match self
            .database
            .mark_running(descriptor.id)
            .await
            .map_err(CoreError::from)?
        {
            ClaimOutcome::Claimed => true,
            ClaimOutcome::AlreadyRunning => {
                debug!("duplicate_claim");
                false
            }
            ClaimOutcome::Stale(status) => {
                debug!(?status, "stale_descriptor");
                return Ok(ProcessOutcome::Skipped);
            }
            ClaimOutcome::Missing => {
                warn!("descriptor_without_row");
                return Ok(ProcessOutcome::Skipped);
            }
        };

        // 2. load both programs; a missing program is terminal
        let program1 = self
            .database
            .get_program(descriptor.program1_id)
            .await
            .map_err(CoreError::from)?
            .ok_or_else(|| ProcessError::Terminal(format!(
                "program {} not found",
                descriptor.program1_id
            )))?;
        let program2 = self
            .database
            .get_program(descriptor.program2_id)
            .await
            .map_err(CoreError::from)?
            .ok_or_else(|| ProcessError::Terminal(format!(
                "program {} not found",
                descriptor.program2_id
            )))?;

        // 3. run the sandbox
        let job = MatchJob {
            game_type: descriptor.game_type.clone(),
            program1_path: program1.code_path.clone(),
            program2_path: program2.code_path.clone(),
            iterations: self.iterations,
            verbose: self.verbose,
        };
        let outcome = match self.sandbox.run(&job).await {
            Ok(outcome) => outcome,
            Err(e) => {
                // 4. keep the row running, record the error, surface for retry
                let message = match &e {
                    SandboxError::Timeout => "match execution timeout".to_string(),
                    SandboxError::Runtime(inner) => inner.to_string(),
                };
                if let Err(db_err) = self
                    .database
                    .record_error(descriptor.id, EXECUTOR_ERROR_CODE, &message)
                    .await
                {
                    warn!(error = %db_err, "error_record_failed");
                }
                return Err(ProcessError::Transient(CoreError::Sandbox(e)));
            }
        };

        // 5. terminal write, idempotent under duplicate invocation
        let status = outcome.terminal_status();
        let row = self
            .database
            .complete_match(descriptor.id, &outcome, status)
            .await
            .map_err(CoreError::from)?;

        if claimed {
            counter!(
                "matches_total",
                "state" => status_label(status),
                "game" => descriptor.game_type.clone()
            )
            .increment(1);
            histogram!("match_duration_seconds", "game" => descriptor.game_type.clone())
                .record(outcome.duration.as_secs_f64());
        }

        // 6. cache by match id
        self.results
            .lock()
            .expect("poisoned")
            .insert(descriptor.id, outcome.clone());

        // 7. standings, clean results only; `apply_match_result` commits a
        //    match at most once, so a racing duplicate lease cannot double
        //    the tallies
        if outcome.error_code == 0 && matches!(outcome.winner, Some(0..=2)) {
            self.standings.apply(&row).await?;
        }

        self.notify(&row).await;
        info!(
            status = status_label(row.status),
            error_code = outcome.error_code,
            "match_done"
        );
        Ok(ProcessOutcome::Finished(row))
    }

    /// terminal failure after the worker exhausted its retry budget
    #[instrument(name = "processor.fail", skip(self))]
    pub async fn finalize_failed(&self, match_id: Uuid, message: &str) -> Result<Match, CoreError> {
        let row = self.database.finalize_failed(match_id, message).await?;
        counter!(
            "matches_total",
            "state" => "failed",
            "game" => row.game_type.clone()
        )
        .increment(1);
        self.notify(&row).await;
        Ok(row)
    }

    async fn notify(&self, row: &Match) {
        let notice = TournamentNotice {
            tournament_id: row.tournament_id,
            kind: NoticeKind::MatchUpdate,
            payload: json!({
                "match_id": row.id,
                "status": row.status,
                "score1": row.score1,
                "score2": row.score2,
                "winner": row.winner,
                "error_code": row.error_code,
            }),
        };
        if let Err(e) = self.broadcast.publish(notice).await {
            warn!(error = %e, "match_notice_dropped");
        }
    }
}

fn status_label(status: crate::MatchStatus) -> &'static str {
    match status {
        crate::MatchStatus::Pending => "pending",
        crate::MatchStatus::Running => "running",
        crate::MatchStatus::Completed => "completed",
        crate::MatchStatus::Failed => "failed",
    }
}
