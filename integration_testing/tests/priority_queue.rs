//! Queue contract: strict band priority, FIFO within a band.

use arena_core::{MatchDescriptor, MatchStatus, Priority, QueuePort};
use chrono::Utc;
use integration_testing::FakeQueue;
use std::time::Duration;
use uuid::Uuid;

fn descriptor(priority: Priority) -> MatchDescriptor {
    MatchDescriptor {
        id: Uuid::new_v4(),
        tournament_id: Uuid::new_v4(),
        program1_id: Uuid::new_v4(),
        program2_id: Uuid::new_v4(),
        game_type: "connect4".to_string(),
        priority,
        status: MatchStatus::Pending,
        created_at: Utc::now(),
    }
}

const TIMEOUT: Duration = Duration::from_millis(50);

#[tokio::test]
async fn high_band_preempts_earlier_medium_entries() {
    let queue = FakeQueue::new();
    let mediums: Vec<_> = (0..10).map(|_| descriptor(Priority::Medium)).collect();
    for d in &mediums {
        queue.enqueue(d).await.unwrap();
    }
    let high = descriptor(Priority::High);
    queue.enqueue(&high).await.unwrap();

    // the late high-priority entry comes out first
    let first = queue.dequeue(TIMEOUT).await.unwrap().unwrap();
    assert_eq!(first.id, high.id);

    // then the mediums, in enqueue order
    for expected in &mediums {
        let got = queue.dequeue(TIMEOUT).await.unwrap().unwrap();
        assert_eq!(got.id, expected.id);
    }
    assert!(queue.dequeue(TIMEOUT).await.unwrap().is_none());
}

#[tokio::test]
async fn low_band_drains_last() {
    let queue = FakeQueue::new();
    let low = descriptor(Priority::Low);
    let medium = descriptor(Priority::Medium);
    let high = descriptor(Priority::High);
    queue.enqueue(&low).await.unwrap();
    queue.enqueue(&medium).await.unwrap();
    queue.enqueue(&high).await.unwrap();

    let order: Vec<Uuid> = [
        queue.dequeue(TIMEOUT).await.unwrap().unwrap().id,
        queue.dequeue(TIMEOUT).await.unwrap().unwrap().id,
        queue.dequeue(TIMEOUT).await.unwrap().unwrap().id,
    ]
    .to_vec();
    assert_eq!(order, vec![high.id, medium.id, low.id]);
}

#[tokio::test]
async fn dequeue_blocks_until_timeout_on_empty_queue() {
    let queue = FakeQueue::new();
    let started = std::time::Instant::now();
    let got = queue.dequeue(Duration::from_millis(30)).await.unwrap();
    assert!(got.is_none());
    assert!(started.elapsed() >= Duration::from_millis(30));
}

#[tokio::test]
async fn sizes_and_clear_are_per_band() {
    let queue = FakeQueue::new();
    queue.enqueue(&descriptor(Priority::High)).await.unwrap();
    queue.enqueue(&descriptor(Priority::Medium)).await.unwrap();
    queue.enqueue(&descriptor(Priority::Medium)).await.unwrap();

    assert_eq!(queue.size(Priority::High).await.unwrap(), 1);
    assert_eq!(queue.size(Priority::Medium).await.unwrap(), 2);
    assert_eq!(queue.size(Priority::Low).await.unwrap(), 0);
    assert_eq!(queue.total_size().await.unwrap(), 3);

    queue.clear_priority(Priority::Medium).await.unwrap();
    assert_eq!(queue.total_size().await.unwrap(), 1);

    queue.clear().await.unwrap();
    assert_eq!(queue.total_size().await.unwrap(), 0);
}
