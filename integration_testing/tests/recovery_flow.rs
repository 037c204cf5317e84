//! Crash recovery: stuck reclaim and queue repopulation.

mod common;

use arena_core::{DbpMatch, MatchStatus, ProcessOutcome, QueuePort, TournamentStatus};
use chrono::{Duration as ChronoDuration, Utc};
use common::Harness;
use std::time::Duration;

#[tokio::test]
async fn stuck_match_is_reclaimed_and_then_completed() {
    let h = Harness::new();
    let tournament = h.db.add_tournament(&["connect4"], TournamentStatus::Pending);
    for _ in 0..2 {
        h.db.add_participant(tournament, "connect4", None);
    }
    let created = h.scheduler().start(tournament).await.unwrap();
    let match_id = created[0].id;

    // a worker died mid-match: running far beyond the stuck threshold
    let stale =
        Utc::now() - ChronoDuration::from_std(h.config.recovery.stuck_duration * 2).unwrap();
    h.db.set_match_status(match_id, MatchStatus::Running, Some(stale));
    h.queue.clear().await.unwrap();

    let report = h.recovery().recover_on_startup().await.unwrap();
    assert_eq!(report.reclaimed, 1);
    assert!(report.enqueued >= 1);

    let row = h.db.get_match_row(match_id).unwrap();
    assert_eq!(row.status, MatchStatus::Pending);
    assert_eq!(row.started_at, None);

    // the descriptor is back in the queue; a worker cycle completes it
    let descriptor = h
        .queue
        .dequeue(Duration::from_millis(50))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(descriptor.id, match_id);
    h.sandbox.push_scores(4, 2);
    let processor = h.processor();
    let ProcessOutcome::Finished(row) = processor.process(&descriptor).await.unwrap() else {
        panic!("expected a finished match");
    };
    assert_eq!(row.status, MatchStatus::Completed);
}

#[tokio::test]
async fn healthy_running_matches_are_left_alone() {
    let h = Harness::new();
    let tournament = h.db.add_tournament(&["connect4"], TournamentStatus::Pending);
    for _ in 0..2 {
        h.db.add_participant(tournament, "connect4", None);
    }
    let created = h.scheduler().start(tournament).await.unwrap();
    h.db.set_match_status(created[0].id, MatchStatus::Running, Some(Utc::now()));

    let report = h.recovery().recover_on_startup().await.unwrap();
    assert_eq!(report.reclaimed, 0);
    let row = h.db.get_match_row(created[0].id).unwrap();
    assert_eq!(row.status, MatchStatus::Running);
}

#[tokio::test]
async fn lost_descriptors_are_reenqueued_on_startup() {
    let h = Harness::new();
    let tournament = h.db.add_tournament(&["connect4"], TournamentStatus::Pending);
    for _ in 0..3 {
        h.db.add_participant(tournament, "connect4", None);
    }
    let created = h.scheduler().start(tournament).await.unwrap();
    // the queue evaporated (backing store wiped) while rows stayed pending
    h.queue.clear().await.unwrap();
    assert_eq!(h.queue.total_size().await.unwrap(), 0);

    let report = h.recovery().recover_on_startup().await.unwrap();
    assert_eq!(report.enqueued, created.len());
    assert_eq!(h.queue.total_size().await.unwrap(), created.len() as u64);
}

#[tokio::test]
async fn terminal_matches_are_never_recovered() {
    let h = Harness::new();
    let tournament = h.db.add_tournament(&["connect4"], TournamentStatus::Pending);
    for _ in 0..2 {
        h.db.add_participant(tournament, "connect4", None);
    }
    let created = h.scheduler().start(tournament).await.unwrap();
    h.db.set_match_status(created[0].id, MatchStatus::Completed, None);
    h.queue.clear().await.unwrap();

    let report = h.recovery().recover_on_startup().await.unwrap();
    assert_eq!(report.reclaimed, 0);
    assert_eq!(report.enqueued, 0);
    assert_eq!(
        h.db.get_match_row(created[0].id).unwrap().status,
        MatchStatus::Completed
    );
    let _ = h.db.list_pending(10, None).await.unwrap();
}
