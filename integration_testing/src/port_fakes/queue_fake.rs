//! Fake of the queue port: three in-memory FIFO bands.

use arena_core::{MatchDescriptor, Priority, QueueError, QueuePort, QueueResult};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

const POLL_INTERVAL: Duration = Duration::from_millis(5);

#[derive(Default)]
pub struct FakeQueue {
    bands: Mutex<HashMap<Priority, VecDeque<MatchDescriptor>>>,
    pub fail_next_enqueue: Mutex<bool>,
}

impl FakeQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn pop_highest(&self) -> Option<MatchDescriptor> {
        let mut bands = self.bands.lock().unwrap();
        for priority in Priority::ORDERED {
            if let Some(band) = bands.get_mut(&priority) {
                if let Some(descriptor) = band.pop_front() {
                    return Some(descriptor);
                }
            }
        }
        None
    }
}

#[async_trait]
impl QueuePort for FakeQueue {
    async fn enqueue(&self, descriptor: &MatchDescriptor) -> QueueResult<()> {
        let mut fail = self.fail_next_enqueue.lock().unwrap();
        if std::mem::take(&mut *fail) {
            return Err(QueueError::Unavailable(anyhow::anyhow!(
                "injected enqueue failure"
            )));
        }
        drop(fail);
        self.bands
            .lock()
            .unwrap()
            .entry(descriptor.priority)
            .or_default()
            .push_back(descriptor.clone());
        Ok(())
    }

    async fn dequeue(&self, timeout: Duration) -> QueueResult<Option<MatchDescriptor>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(descriptor) = self.pop_highest() {
                return Ok(Some(descriptor));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn size(&self, priority: Priority) -> QueueResult<u64> {
        Ok(self
            .bands
            .lock()
            .unwrap()
            .get(&priority)
            .map_or(0, |band| band.len() as u64))
    }

    async fn total_size(&self) -> QueueResult<u64> {
        let bands = self.bands.lock().unwrap();
        Ok(bands.values().map(|band| band.len() as u64).sum())
    }

    async fn clear_priority(&self, priority: Priority) -> QueueResult<()> {
        self.bands.lock().unwrap().remove(&priority);
        Ok(())
    }

    async fn clear(&self) -> QueueResult<()> {
        self.bands.lock().unwrap().clear();
        Ok(())
    }
}
