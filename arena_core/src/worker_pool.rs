//! Elastic pool of match-consuming workers.
//!
//! Workers are tokio tasks looping over dequeue -> process -> commit. A
//! single control task autoscales the pool from the queue backlog; downscale
//! is soft: surplus workers observe their cancelled token at the next idle
//! check and exit, never mid-match.

use crate::{
    MatchDescriptor, MatchProcessor, ProcessError, QueuePort, Priority, WorkerConfig,
};
use metrics::{counter, gauge, histogram};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// dequeue block per loop turn; bounds reaction time to shutdown
const DEQUEUE_TIMEOUT: Duration = Duration::from_secs(1);
/// floor for backoff after a queue error
const ERROR_BACKOFF: Duration = Duration::from_secs(1);
const AUTOSCALE_INTERVAL: Duration = Duration::from_secs(10);
const GAUGE_INTERVAL: Duration = Duration::from_secs(5);

struct WorkerHandle {
    id: u64,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct PoolState {
    workers: Vec<WorkerHandle>,
    next_id: u64,
}

pub struct WorkerPool {
    processor: Arc<MatchProcessor>,
    queue: Arc<dyn QueuePort>,
    config: WorkerConfig,
    shutdown: CancellationToken,
    state: Mutex<PoolState>,
    active: AtomicUsize,
    matches_processed: AtomicU64,
    matches_failed: AtomicU64,
}

impl WorkerPool {
    pub fn new(
        processor: Arc<MatchProcessor>,
        queue: Arc<dyn QueuePort>,
        config: WorkerConfig,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(WorkerPool {
            processor,
            queue,
            config,
            shutdown,
            state: Mutex::new(PoolState::default()),
            active: AtomicUsize::new(0),
            matches_processed: AtomicU64::new(0),
            matches_failed: AtomicU64::new(0),
        })
    }

    /// Bring the pool up to its configured minimum.
    pub fn start(pool: &Arc<Self>) {
        Self::spawn_workers(pool, pool.config.min_workers);
        info!(workers = pool.config.min_workers, "worker_pool_started");
    }

    pub fn pool_size(&self) -> usize {
        self.state.lock().expect("poisoned").workers.len()
    }

    pub fn active_workers(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    pub fn matches_processed(&self) -> u64 {
        self.matches_processed.load(Ordering::Relaxed)
    }

    pub fn matches_failed(&self) -> u64 {
        self.matches_failed.load(Ordering::Relaxed)
    }

    fn spawn_workers(pool: &Arc<Self>, count: usize) {
        let mut state = pool.state.lock().expect("poisoned");
        for _ in 0..count {
            let id = state.next_id;
            state.next_id += 1;
            let token = pool.shutdown.child_token();
            let pool = Arc::clone(pool);
            let worker_token = token.clone();
            let handle = tokio::spawn(async move {
                pool.worker_loop(id, worker_token).await;
            });
            state.workers.push(WorkerHandle { id, token, handle });
        }
    }

    /// Soft downscale: cancel the newest `count` workers and let them drain.
    fn downscale(&self, count: usize) {
        let state = self.state.lock().expect("poisoned");
        for worker in state.workers.iter().rev().take(count) {
            worker.token.cancel();
        }
    }

    fn reap_finished(&self) {
        let mut state = self.state.lock().expect("poisoned");
        state.workers.retain(|w| !w.handle.is_finished());
    }

    /// Autoscaling control task; one per pool.
    pub async fn run_autoscaler(self: Arc<Self>) {
        let mut interval = tokio::time::interval(AUTOSCALE_INTERVAL);
        interval.tick().await; // first tick completes immediately, skip it
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }
            self.reap_finished();
            let backlog = match self.queue.total_size().await {
                Ok(size) => size,
                Err(e) => {
                    warn!(error = %e, "autoscaler_queue_unavailable");
                    continue;
                }
            };
            Self::rescale(&self, backlog);
        }
        debug!("autoscaler_stopped");
    }

    #[instrument(name = "pool.rescale", skip(pool))]
    fn rescale(pool: &Arc<Self>, backlog: u64) {
        let current = pool.pool_size();
        let active = pool.active_workers();
        let desired = desired_pool_size(
            backlog,
            current,
            active,
            pool.config.min_workers,
            pool.config.max_workers,
        );
        if desired > current {
            info!(backlog, current, desired, "scaling_up");
            Self::spawn_workers(pool, desired - current);
        } else if desired < current {
            info!(backlog, current, desired, "scaling_down");
            pool.downscale(current - desired);
        }
    }

    /// Gauge sampling task: pool shape and per-band queue depth.
    pub async fn run_gauge_sampler(self: Arc<Self>) {
        let mut interval = tokio::time::interval(GAUGE_INTERVAL);
        interval.tick().await;
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }
            gauge!("worker_pool_size").set(self.pool_size() as f64);
            gauge!("workers_active").set(self.active_workers() as f64);
            for priority in Priority::ORDERED {
                match self.queue.size(priority).await {
                    Ok(size) => {
                        gauge!("queue_size", "priority" => priority.queue_key())
                            .set(size as f64);
                    }
                    Err(e) => warn!(error = %e, "queue_size_unavailable"),
                }
            }
        }
        debug!("gauge_sampler_stopped");
    }

    /// Drain: in-flight matches finish their current executor invocation;
    /// anything still running afterwards is reclaimed by recovery on the
    /// next startup.
    pub async fn drain(&self) {
        self.shutdown.cancel();
        let workers = {
            let mut state = self.state.lock().expect("poisoned");
            std::mem::take(&mut state.workers)
        };
        for worker in workers {
            if let Err(e) = worker.handle.await {
                warn!(worker = worker.id, error = %e, "worker_join_failed");
            }
        }
        info!("worker_pool_drained");
    }

    async fn worker_loop(self: Arc<Self>, id: u64, token: CancellationToken) {
        debug!(worker = id, "worker_started");
        loop {
            if token.is_cancelled() {
                break;
            }
            let dequeued = tokio::select! {
                _ = token.cancelled() => break,
                result = self.queue.dequeue(DEQUEUE_TIMEOUT) => result,
            };
            match dequeued {
                Ok(None) => continue,
                Ok(Some(descriptor)) => {
                    self.active.fetch_add(1, Ordering::Relaxed);
                    self.handle_descriptor(&descriptor, &token).await;
                    self.active.fetch_sub(1, Ordering::Relaxed);
                }
                Err(e) => {
                    warn!(worker = id, error = %e, "dequeue_failed");
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = tokio::time::sleep(ERROR_BACKOFF) => {}
                    }
                }
            }
        }
        debug!(worker = id, "worker_stopped");
    }

    /// One lease over a descriptor: process with a per-match deadline and a
    /// bounded retry budget. Reclaimed matches start over with a fresh
    /// budget on another lease.
    async fn handle_descriptor(&self, descriptor: &MatchDescriptor, token: &CancellationToken) {
        let waited = (chrono::Utc::now() - descriptor.created_at)
            .to_std()
            .unwrap_or_default();
        histogram!("queue_wait_seconds").record(waited.as_secs_f64());

        let mut retries: u32 = 0;
        loop {
            let attempt =
                tokio::time::timeout(self.config.timeout, self.processor.process(descriptor)).await;
            let error_text = match attempt {
                Ok(Ok(_)) => {
                    self.matches_processed.fetch_add(1, Ordering::Relaxed);
                    counter!("matches_processed_total").increment(1);
                    return;
                }
                Ok(Err(ProcessError::Terminal(message))) => {
                    self.fail_match(descriptor, &message).await;
                    return;
                }
                Ok(Err(ProcessError::Transient(e))) => e.to_string(),
                Err(_) => "match processing timeout".to_string(),
            };

            retries += 1;
            if retries > self.config.retry_attempts {
                self.fail_match(descriptor, &error_text).await;
                return;
            }
            warn!(match_id = %descriptor.id, retries, error = %error_text, "match_retry");
            let delay = self.config.retry_delay * retries;
            tokio::select! {
                // shutdown mid-retry: leave the running row to recovery
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn fail_match(&self, descriptor: &MatchDescriptor, message: &str) {
        self.matches_failed.fetch_add(1, Ordering::Relaxed);
        counter!("matches_failed_total").increment(1);
        if let Err(e) = self.processor.finalize_failed(descriptor.id, message).await {
            // the row stays running; recovery reclaims it
            warn!(match_id = %descriptor.id, error = %e, "finalize_failed_errored");
        }
    }
}

/// Backlog-driven pool sizing, clamped to the configured bounds. Downscale
/// only fires when most of the pool is idle.
fn desired_pool_size(
    backlog: u64,
    current: usize,
    active: usize,
    min_workers: usize,
    max_workers: usize,
) -> usize {
    let desired = if backlog > 100 {
        current + 10
    } else if backlog > 50 {
        current + 5
    } else if backlog < 10 && active < current / 2 {
        current.saturating_sub(5)
    } else {
        current
    };
    desired.clamp(min_workers, max_workers)
}
