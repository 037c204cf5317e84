//! Per-match pipeline: terminal writes, faults, standings, idempotence.

mod common;

use arena_core::{
    DbpMatch, DbpParticipant, MatchDescriptor, MatchStatus, ProcessError, ProcessOutcome,
    RatingUpdate, Tally, TournamentStatus,
};
use common::Harness;
use integration_testing::ScriptedRun;
use uuid::Uuid;

struct Pipeline {
    h: Harness,
    tournament: Uuid,
    p1: Uuid,
    p2: Uuid,
    descriptor: MatchDescriptor,
}

/// one started tournament with a single enqueued match between two programs
async fn pipeline() -> Pipeline {
    let h = Harness::new();
    let tournament = h.db.add_tournament(&["connect4"], TournamentStatus::Pending);
    let p1 = h.db.add_participant(tournament, "connect4", None);
    let p2 = h.db.add_participant(tournament, "connect4", None);
    let created = h.scheduler().start(tournament).await.unwrap();
    let descriptor = MatchDescriptor::from(&created[0]);
    Pipeline {
        h,
        tournament,
        p1,
        p2,
        descriptor,
    }
}

#[tokio::test]
async fn clean_result_completes_and_updates_standings() {
    let p = pipeline().await;
    p.h.sandbox.push_scores(3, 1);

    let processor = p.h.processor();
    let outcome = processor.process(&p.descriptor).await.unwrap();
    let ProcessOutcome::Finished(row) = outcome else {
        panic!("expected a finished match");
    };

    assert_eq!(row.status, MatchStatus::Completed);
    assert_eq!((row.score1, row.score2), (Some(3), Some(1)));
    assert_eq!(row.winner, Some(1));
    assert_eq!(row.error_code, Some(0));
    assert!(row.started_at.is_some());
    assert!(row.completed_at.is_some());

    // standings: winner/loser tallies and score-sum ratings
    let part1 = p
        .h
        .db
        .get_participant(p.tournament, p.p1)
        .await
        .unwrap()
        .unwrap();
    let part2 = p
        .h
        .db
        .get_participant(p.tournament, p.p2)
        .await
        .unwrap()
        .unwrap();
    assert_eq!((part1.wins, part1.losses, part1.draws), (1, 0, 0));
    assert_eq!((part2.wins, part2.losses, part2.draws), (0, 1, 0));
    assert_eq!(part1.rating, 3);
    assert_eq!(part2.rating, 1);
    // every played match is tallied exactly once
    assert_eq!(part1.matches_played(), 1);
    assert_eq!(part2.matches_played(), 1);

    let history = p.h.db.rating_history.lock().unwrap();
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|r| r.match_id == p.descriptor.id));

    // result cache serves the executor outcome by match id
    let cached = processor.cached_result(p.descriptor.id).unwrap();
    assert_eq!((cached.score1, cached.score2), (3, 1));
}

#[tokio::test]
async fn faulting_program_completes_with_derived_winner() {
    let p = pipeline().await;
    // inner exit code 1, empty stdout, stderr carries the reason
    p.h.sandbox.push_fault(1, "segfault");

    let processor = p.h.processor();
    let ProcessOutcome::Finished(row) = processor.process(&p.descriptor).await.unwrap() else {
        panic!("expected a finished match");
    };

    assert_eq!(row.status, MatchStatus::Completed);
    assert_eq!(row.error_code, Some(1));
    assert_eq!(row.winner, Some(2));
    assert_eq!((row.score1, row.score2), (Some(0), Some(0)));
    assert_eq!(row.error_message.as_deref(), Some("segfault"));

    // faults leave ratings untouched
    let part1 = p
        .h
        .db
        .get_participant(p.tournament, p.p1)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(part1.rating, 0);
    assert_eq!(part1.matches_played(), 0);
    assert!(p.h.db.rating_history.lock().unwrap().is_empty());
}

#[tokio::test]
async fn infra_exit_code_fails_the_match() {
    let p = pipeline().await;
    p.h.sandbox.push(ScriptedRun::Outcome(arena_core::MatchOutcome {
        score1: 0,
        score2: 0,
        winner: None,
        error_code: 137,
        error_message: Some("game binary exited with 137".to_string()),
        duration: std::time::Duration::from_millis(5),
    }));

    let processor = p.h.processor();
    let ProcessOutcome::Finished(row) = processor.process(&p.descriptor).await.unwrap() else {
        panic!("expected a finished match");
    };
    assert_eq!(row.status, MatchStatus::Failed);
    assert_eq!(row.winner, None);
    assert_eq!(row.error_code, Some(137));
}

#[tokio::test]
async fn stale_descriptor_is_skipped_without_execution() {
    let p = pipeline().await;
    p.h.db
        .set_match_status(p.descriptor.id, MatchStatus::Completed, None);

    let processor = p.h.processor();
    let outcome = processor.process(&p.descriptor).await.unwrap();
    assert!(matches!(outcome, ProcessOutcome::Skipped));
    assert_eq!(p.h.sandbox.jobs_run(), 0);
}

#[tokio::test]
async fn duplicate_claim_still_processes() {
    let p = pipeline().await;
    // a crashed worker left the row running
    p.h.db.set_match_status(
        p.descriptor.id,
        MatchStatus::Running,
        Some(chrono::Utc::now()),
    );
    p.h.sandbox.push_scores(2, 2);

    let processor = p.h.processor();
    let ProcessOutcome::Finished(row) = processor.process(&p.descriptor).await.unwrap() else {
        panic!("expected a finished match");
    };
    assert_eq!(row.status, MatchStatus::Completed);
    assert_eq!(row.winner, Some(0));
}

#[tokio::test]
async fn racing_duplicate_lease_tallies_the_match_once() {
    let p = pipeline().await;
    p.h.sandbox.push_scores(3, 1);
    let processor = p.h.processor();
    processor.process(&p.descriptor).await.unwrap();

    // the other lease of the same match commits its identical result late
    let updates = [
        RatingUpdate {
            program_id: p.p1,
            delta: 3,
            tally: Tally::Win,
        },
        RatingUpdate {
            program_id: p.p2,
            delta: 1,
            tally: Tally::Loss,
        },
    ];
    p.h.db
        .apply_match_result(p.tournament, p.descriptor.id, &updates)
        .await
        .unwrap();

    // one completed match, one tally, one history pair
    let part1 = p
        .h
        .db
        .get_participant(p.tournament, p.p1)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(part1.matches_played(), 1);
    assert_eq!(part1.rating, 3);
    assert_eq!(p.h.db.rating_history.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn missing_program_rejects_terminally() {
    let p = pipeline().await;
    p.h.db.programs.lock().unwrap().remove(&p.descriptor.program2_id);

    let processor = p.h.processor();
    let err = processor.process(&p.descriptor).await.unwrap_err();
    assert!(matches!(err, ProcessError::Terminal(_)), "{err}");
    assert_eq!(p.h.sandbox.jobs_run(), 0);
}

#[tokio::test]
async fn executor_timeout_is_retriable_then_fails_terminally() {
    let p = pipeline().await;
    p.h.sandbox.push(ScriptedRun::Timeout);

    let processor = p.h.processor();
    let err = processor.process(&p.descriptor).await.unwrap_err();
    assert!(matches!(err, ProcessError::Transient(_)), "{err}");

    // row is still running with the error recorded, so the lease can retry
    let row = p.h.db.get_match_row(p.descriptor.id).unwrap();
    assert_eq!(row.status, MatchStatus::Running);
    assert_eq!(
        row.error_message.as_deref(),
        Some("match execution timeout")
    );

    // retry budget exhausted: the worker finalizes the failure
    let row = processor
        .finalize_failed(p.descriptor.id, "match execution timeout")
        .await
        .unwrap();
    assert_eq!(row.status, MatchStatus::Failed);
    assert!(row.error_message.unwrap().contains("timeout"));
}

#[tokio::test]
async fn transient_store_failure_is_retriable() {
    let p = pipeline().await;
    *p.h.db.fail_next_mark_running.lock().unwrap() = true;

    let processor = p.h.processor();
    let err = processor.process(&p.descriptor).await.unwrap_err();
    assert!(matches!(err, ProcessError::Transient(_)), "{err}");
    assert_eq!(p.h.sandbox.jobs_run(), 0);

    // the lease retries and the claim goes through on the next attempt
    p.h.sandbox.push_scores(1, 0);
    let outcome = processor.process(&p.descriptor).await.unwrap();
    assert!(matches!(outcome, ProcessOutcome::Finished(_)));
}

#[tokio::test]
async fn terminal_write_is_idempotent() {
    let p = pipeline().await;
    let outcome = arena_core::MatchOutcome {
        score1: 5,
        score2: 2,
        winner: Some(1),
        error_code: 0,
        error_message: None,
        duration: std::time::Duration::from_millis(10),
    };

    let first = p
        .h
        .db
        .complete_match(p.descriptor.id, &outcome, MatchStatus::Completed)
        .await
        .unwrap();
    let second = p
        .h
        .db
        .complete_match(p.descriptor.id, &outcome, MatchStatus::Completed)
        .await
        .unwrap();
    // same executor output twice stores the identical row
    assert_eq!(first, second);
}
