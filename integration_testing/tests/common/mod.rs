//! Shared harness wiring the engine to the port fakes.
#![allow(dead_code)] // not every test binary touches every handle

use arena_core::{
    AppConfig, Core, CoreBuilder, MatchProcessor, RecoveryService, ScoreSum, TournamentScheduler,
};
use integration_testing::{FakeDatabasePort, FakeLock, FakeQueue, FakeSandbox, RecordingBroadcast};
use std::sync::Arc;
use std::time::Duration;

pub struct Harness {
    pub db: Arc<FakeDatabasePort>,
    pub queue: Arc<FakeQueue>,
    pub sandbox: Arc<FakeSandbox>,
    pub broadcast: Arc<RecordingBroadcast>,
    pub lock: Arc<FakeLock>,
    pub core: Arc<Core>,
    pub config: AppConfig,
}

impl Harness {
    pub fn new() -> Self {
        let db = Arc::new(FakeDatabasePort::new());
        let queue = Arc::new(FakeQueue::new());
        let sandbox = Arc::new(FakeSandbox::new());
        let broadcast = Arc::new(RecordingBroadcast::new());
        let lock = Arc::new(FakeLock::new());
        let core = Arc::new(
            CoreBuilder::new()
                .set_db(db.clone())
                .set_queue(queue.clone())
                .set_sandbox(sandbox.clone())
                .set_broadcast(broadcast.clone())
                .set_lock(lock.clone())
                .build(),
        );

        let mut config = AppConfig {
            database_url: "postgres://test".to_string(),
            ..AppConfig::default()
        };
        config.executor.image = "bot-arena/runner:test".to_string();
        // tight timings keep the tests fast
        config.worker.min_workers = 2;
        config.worker.max_workers = 4;
        config.worker.timeout = Duration::from_secs(5);
        config.worker.retry_attempts = 2;
        config.worker.retry_delay = Duration::from_millis(10);
        config.executor.timeout = Duration::from_secs(2);
        config.recovery.stuck_duration = Duration::from_secs(60);
        config.recovery.batch_size = 100;

        Harness {
            db,
            queue,
            sandbox,
            broadcast,
            lock,
            core,
            config,
        }
    }

    pub fn scheduler(&self) -> TournamentScheduler {
        self.core.scheduler()
    }

    pub fn processor(&self) -> Arc<MatchProcessor> {
        Arc::new(self.core.processor(&self.config, Arc::new(ScoreSum)))
    }

    pub fn recovery(&self) -> RecoveryService {
        self.core.recovery(&self.config)
    }
}
