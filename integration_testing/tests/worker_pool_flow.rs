//! End-to-end worker cycles over the fakes: dequeue, process, commit.

mod common;

use arena_core::{MatchStatus, QueuePort, TournamentStatus, WorkerPool};
use common::Harness;
use integration_testing::ScriptedRun;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// poll until the predicate holds or the deadline passes
async fn wait_for(mut predicate: impl FnMut() -> bool, deadline: Duration) -> bool {
    let started = tokio::time::Instant::now();
    while started.elapsed() < deadline {
        if predicate() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    predicate()
}

#[tokio::test(flavor = "multi_thread")]
async fn pool_drains_the_queue() {
    let h = Harness::new();
    let tournament = h.db.add_tournament(&["connect4"], TournamentStatus::Pending);
    for _ in 0..4 {
        h.db.add_participant(tournament, "connect4", None);
    }
    let created = h.scheduler().start(tournament).await.unwrap();
    assert_eq!(created.len(), 6);
    for _ in 0..6 {
        h.sandbox.push_scores(2, 1);
    }

    let pool = WorkerPool::new(
        h.processor(),
        h.queue.clone(),
        h.config.worker.clone(),
        CancellationToken::new(),
    );
    WorkerPool::start(&pool);
    assert_eq!(pool.pool_size(), h.config.worker.min_workers);

    let done = wait_for(|| pool.matches_processed() == 6, Duration::from_secs(5)).await;
    assert!(done, "pool processed {} of 6", pool.matches_processed());
    pool.drain().await;

    for m in &created {
        assert_eq!(
            h.db.get_match_row(m.id).unwrap().status,
            MatchStatus::Completed
        );
    }
    assert_eq!(h.queue.total_size().await.unwrap(), 0);
    assert_eq!(pool.matches_failed(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn retry_exhaustion_marks_the_match_failed() {
    let h = Harness::new();
    let tournament = h.db.add_tournament(&["connect4"], TournamentStatus::Pending);
    for _ in 0..2 {
        h.db.add_participant(tournament, "connect4", None);
    }
    let created = h.scheduler().start(tournament).await.unwrap();
    let match_id = created[0].id;
    // every attempt hits a broken runtime: 1 try + retry_attempts retries
    for _ in 0..(h.config.worker.retry_attempts + 1) {
        h.sandbox
            .push(ScriptedRun::Runtime("runtime down".to_string()));
    }

    let pool = WorkerPool::new(
        h.processor(),
        h.queue.clone(),
        h.config.worker.clone(),
        CancellationToken::new(),
    );
    WorkerPool::start(&pool);

    let done = wait_for(|| pool.matches_failed() == 1, Duration::from_secs(5)).await;
    assert!(done, "match never failed");
    pool.drain().await;

    let row = h.db.get_match_row(match_id).unwrap();
    assert_eq!(row.status, MatchStatus::Failed);
    assert!(row.error_message.unwrap().contains("runtime down"));
    // the whole retry budget was spent inside one lease
    assert_eq!(
        h.sandbox.jobs_run() as u32,
        h.config.worker.retry_attempts + 1
    );
    assert_eq!(pool.matches_processed(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn drain_stops_idle_workers_promptly() {
    let h = Harness::new();
    let pool = WorkerPool::new(
        h.processor(),
        h.queue.clone(),
        h.config.worker.clone(),
        CancellationToken::new(),
    );
    WorkerPool::start(&pool);

    let drained = tokio::time::timeout(Duration::from_secs(5), pool.drain()).await;
    assert!(drained.is_ok(), "drain hung on idle workers");
}
