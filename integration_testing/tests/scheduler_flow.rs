//! Tournament start, late joiners and re-admission.

mod common;

use arena_core::{
    CoreError, DbpMatch, DbpTournament, MatchStatus, NoticeKind, Priority, QueuePort,
    TournamentStatus,
};
use common::Harness;
use std::collections::HashSet;
use std::time::Duration;

#[tokio::test]
async fn start_generates_full_round_robin() {
    let h = Harness::new();
    let tournament = h.db.add_tournament(&["connect4"], TournamentStatus::Pending);
    let programs: Vec<_> = (0..4)
        .map(|_| h.db.add_participant(tournament, "connect4", None))
        .collect();

    let created = h.scheduler().start(tournament).await.unwrap();

    assert_eq!(created.len(), 6);
    let expected: HashSet<_> = [
        (programs[0], programs[1]),
        (programs[0], programs[2]),
        (programs[0], programs[3]),
        (programs[1], programs[2]),
        (programs[1], programs[3]),
        (programs[2], programs[3]),
    ]
    .into_iter()
    .collect();
    let got: HashSet<_> = created
        .iter()
        .map(|m| (m.program1_id, m.program2_id))
        .collect();
    assert_eq!(got, expected);

    for m in &created {
        assert_eq!(m.status, MatchStatus::Pending);
        assert_eq!(m.priority, Priority::Medium);
        assert_eq!(m.round_number, 1);
    }

    let row = h.db.get_tournament(tournament).await.unwrap().unwrap();
    assert_eq!(row.status, TournamentStatus::Active);
    assert!(row.start_time.is_some());

    assert_eq!(h.queue.total_size().await.unwrap(), 6);
    let kinds = h.broadcast.kinds_for(tournament);
    assert!(kinds.contains(&NoticeKind::TournamentUpdate));
    assert!(kinds.contains(&NoticeKind::MatchesCreated));
}

#[tokio::test]
async fn start_needs_at_least_two_participants() {
    let h = Harness::new();
    let tournament = h.db.add_tournament(&["connect4"], TournamentStatus::Pending);
    h.db.add_participant(tournament, "connect4", None);

    let err = h.scheduler().start(tournament).await.unwrap_err();
    assert!(matches!(err, CoreError::Validation(_)), "{err}");
}

#[tokio::test]
async fn start_rejects_active_tournament() {
    let h = Harness::new();
    let tournament = h.db.add_tournament(&["connect4"], TournamentStatus::Active);
    for _ in 0..2 {
        h.db.add_participant(tournament, "connect4", None);
    }

    let err = h.scheduler().start(tournament).await.unwrap_err();
    assert!(err.is_conflict(), "{err}");
}

#[tokio::test]
async fn start_fails_fast_under_lock_contention() {
    let h = Harness::new();
    let tournament = h.db.add_tournament(&["connect4"], TournamentStatus::Pending);
    for _ in 0..2 {
        h.db.add_participant(tournament, "connect4", None);
    }
    h.lock.hold(&format!("tournament:{tournament}"));

    let err = h.scheduler().start(tournament).await.unwrap_err();
    assert!(err.is_conflict(), "{err}");
    // nothing was generated while the lock was held elsewhere
    assert_eq!(h.queue.total_size().await.unwrap(), 0);
}

#[tokio::test]
async fn late_joiner_gets_high_priority_matches() {
    let h = Harness::new();
    let tournament = h.db.add_tournament(&["connect4"], TournamentStatus::Active);
    let team_c = uuid::Uuid::new_v4();
    let a = h.db.add_participant(tournament, "connect4", None);
    let b = h.db.add_participant(tournament, "connect4", None);
    let c = h.db.add_participant(tournament, "connect4", Some(team_c));
    let d = h.db.add_participant(tournament, "connect4", Some(team_c));

    // X arrives on its own team and plays everyone
    let team_x = uuid::Uuid::new_v4();
    let x = h.db.add_participant(tournament, "connect4", Some(team_x));
    let created = h
        .scheduler()
        .schedule_new_program(tournament, "connect4", x)
        .await
        .unwrap();

    let opponents: HashSet<_> = created.iter().map(|m| m.program2_id).collect();
    assert_eq!(opponents, HashSet::from([a, b, c, d]));
    assert!(created.iter().all(|m| m.program1_id == x));
    assert!(created.iter().all(|m| m.priority == Priority::High));
    assert_eq!(h.queue.size(Priority::High).await.unwrap(), 4);
}

#[tokio::test]
async fn late_joiner_skips_own_team() {
    let h = Harness::new();
    let tournament = h.db.add_tournament(&["connect4"], TournamentStatus::Active);
    let team_c = uuid::Uuid::new_v4();
    let a = h.db.add_participant(tournament, "connect4", None);
    let b = h.db.add_participant(tournament, "connect4", None);
    let _c = h.db.add_participant(tournament, "connect4", Some(team_c));
    let _d = h.db.add_participant(tournament, "connect4", Some(team_c));

    // X shares a team with C and D; those pairs are excluded
    let x = h.db.add_participant(tournament, "connect4", Some(team_c));
    let created = h
        .scheduler()
        .schedule_new_program(tournament, "connect4", x)
        .await
        .unwrap();

    let opponents: HashSet<_> = created.iter().map(|m| m.program2_id).collect();
    assert_eq!(opponents, HashSet::from([a, b]));
}

#[tokio::test]
async fn enqueue_failure_does_not_roll_back_the_batch() {
    let h = Harness::new();
    let tournament = h.db.add_tournament(&["connect4"], TournamentStatus::Pending);
    for _ in 0..3 {
        h.db.add_participant(tournament, "connect4", None);
    }
    *h.queue.fail_next_enqueue.lock().unwrap() = true;

    let created = h.scheduler().start(tournament).await.unwrap();
    assert_eq!(created.len(), 3);
    // one descriptor was lost; the rows all exist and recovery re-admits
    assert_eq!(h.queue.total_size().await.unwrap(), 2);
    assert_eq!(h.db.matches.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn run_all_regenerates_a_round_when_nothing_is_pending() {
    let h = Harness::new();
    let tournament = h.db.add_tournament(&["connect4"], TournamentStatus::Pending);
    for _ in 0..3 {
        h.db.add_participant(tournament, "connect4", None);
    }
    let created = h.scheduler().start(tournament).await.unwrap();
    // all of round one finishes
    for m in &created {
        h.db.set_match_status(m.id, MatchStatus::Completed, None);
    }
    h.queue.clear().await.unwrap();

    let enqueued = h.scheduler().run_all(tournament).await.unwrap();
    assert_eq!(enqueued, 3);
    let pending = h
        .db
        .list_by_status(tournament, MatchStatus::Pending)
        .await
        .unwrap();
    assert_eq!(pending.len(), 3);
    assert!(pending.iter().all(|m| m.round_number == 2));
}

#[tokio::test]
async fn retry_failed_readmits_reset_rows() {
    let h = Harness::new();
    let tournament = h.db.add_tournament(&["connect4"], TournamentStatus::Pending);
    for _ in 0..2 {
        h.db.add_participant(tournament, "connect4", None);
    }
    let created = h.scheduler().start(tournament).await.unwrap();
    let failed_id = created[0].id;
    {
        let mut guard = h.db.matches.lock().unwrap();
        let m = guard.get_mut(&failed_id).unwrap();
        m.status = MatchStatus::Failed;
        m.error_code = Some(137);
        m.error_message = Some("oom".to_string());
    }
    h.queue.clear().await.unwrap();

    let enqueued = h.scheduler().retry_failed(tournament).await.unwrap();
    assert_eq!(enqueued, 1);

    let row = h.db.get_match_row(failed_id).unwrap();
    assert_eq!(row.status, MatchStatus::Pending);
    assert_eq!(row.error_code, None);
    assert_eq!(row.error_message, None);

    let descriptor = h
        .queue
        .dequeue(Duration::from_millis(50))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(descriptor.id, failed_id);
}
