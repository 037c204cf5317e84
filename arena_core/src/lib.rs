// contains core functionality

mod config;
mod errors;
mod match_;
mod participant;
mod ports;
mod processor;
mod program;
mod rating;
mod recovery;
mod scheduler;
mod tournament;
mod worker_pool;

pub use config::*;
pub use errors::*;
pub use match_::*;
pub use participant::*;
pub use ports::*;
pub use processor::*;
pub use program::*;
pub use rating::*;
pub use recovery::*;
pub use scheduler::*;
pub use tournament::*;
pub use worker_pool::*;

use std::sync::Arc;

/// Core wires the engine services to their ports:
/// - match admission and generation (scheduler)
/// - per-match execution pipeline (processor, worker pool)
/// - queue/database reconciliation (recovery)
///
/// Core holds connections to all required ports (database, priority queue,
/// sandbox, broadcaster, distributed lock); adapters are injected at
/// construction, never reached through globals.
pub struct Core {
    pub database: Arc<dyn DatabasePort>,
    pub queue: Arc<dyn QueuePort>,
    pub sandbox: Arc<dyn SandboxPort>,
    pub broadcast: Arc<dyn BroadcastPort>,
    pub lock: Arc<dyn LockPort>,
}

impl Core {
    pub fn scheduler(&self) -> TournamentScheduler {
        TournamentScheduler::new(
            self.database.clone(),
            self.queue.clone(),
            self.broadcast.clone(),
            self.lock.clone(),
        )
    }

    pub fn processor(&self, config: &AppConfig, policy: Arc<dyn RatingPolicy>) -> MatchProcessor {
        let standings = StandingsEngine::new(self.database.clone(), self.broadcast.clone(), policy);
        MatchProcessor::new(
            self.database.clone(),
            self.sandbox.clone(),
            self.broadcast.clone(),
            standings,
            config.executor.default_iterations,
            config.executor.verbose,
        )
    }

    pub fn recovery(&self, config: &AppConfig) -> RecoveryService {
        RecoveryService::new(
            self.database.clone(),
            self.queue.clone(),
            config.recovery.clone(),
        )
    }
}

pub struct NoDB {}
pub struct NoQ {}
pub struct NoSB {}
pub struct NoBC {}
pub struct NoLK {}

pub struct DynDB(Arc<dyn DatabasePort>);
pub struct DynQ(Arc<dyn QueuePort>);
pub struct DynSB(Arc<dyn SandboxPort>);
pub struct DynBC(Arc<dyn BroadcastPort>);
pub struct DynLK(Arc<dyn LockPort>);

/// Typestate builder: `build()` only exists once every port is set.
pub struct CoreBuilder<DB, Q, SB, BC, LK> {
    state_db: DB,
    state_q: Q,
    state_sb: SB,
    state_bc: BC,
    state_lk: LK,
}

impl CoreBuilder<NoDB, NoQ, NoSB, NoBC, NoLK> {
    pub fn new() -> Self {
        CoreBuilder {
            state_db: NoDB {},
            state_q: NoQ {},
            state_sb: NoSB {},
            state_bc: NoBC {},
            state_lk: NoLK {},
        }
    }
}

impl Default for CoreBuilder<NoDB, NoQ, NoSB, NoBC, NoLK> {
    fn default() -> Self {
        Self::new()
    }
}

impl<DB, Q, SB, BC, LK> CoreBuilder<DB, Q, SB, BC, LK> {
    pub fn set_db(self, database: Arc<dyn DatabasePort>) -> CoreBuilder<DynDB, Q, SB, BC, LK> {
        CoreBuilder {
            state_db: DynDB(database),
            state_q: self.state_q,
            state_sb: self.state_sb,
            state_bc: self.state_bc,
            state_lk: self.state_lk,
        }
    }

    pub fn set_queue(self, queue: Arc<dyn QueuePort>) -> CoreBuilder<DB, DynQ, SB, BC, LK> {
        CoreBuilder {
            state_db: self.state_db,
            state_q: DynQ(queue),
            state_sb: self.state_sb,
            state_bc: self.state_bc,
            state_lk: self.state_lk,
        }
    }

    pub fn set_sandbox(self, sandbox: Arc<dyn SandboxPort>) -> CoreBuilder<DB, Q, DynSB, BC, LK> {
        CoreBuilder {
            state_db: self.state_db,
            state_q: self.state_q,
            state_sb: DynSB(sandbox),
            state_bc: self.state_bc,
            state_lk: self.state_lk,
        }
    }

    pub fn set_broadcast(
        self,
        broadcast: Arc<dyn BroadcastPort>,
    ) -> CoreBuilder<DB, Q, SB, DynBC, LK> {
        CoreBuilder {
            state_db: self.state_db,
            state_q: self.state_q,
            state_sb: self.state_sb,
            state_bc: DynBC(broadcast),
            state_lk: self.state_lk,
        }
    }

    pub fn set_lock(self, lock: Arc<dyn LockPort>) -> CoreBuilder<DB, Q, SB, BC, DynLK> {
        CoreBuilder {
            state_db: self.state_db,
            state_q: self.state_q,
            state_sb: self.state_sb,
            state_bc: self.state_bc,
            state_lk: DynLK(lock),
        }
    }
}

impl CoreBuilder<DynDB, DynQ, DynSB, DynBC, DynLK> {
    pub fn build(self) -> Core {
        Core {
            database: self.state_db.0,
            queue: self.state_q.0,
            sandbox: self.state_sb.0,
            broadcast: self.state_bc.0,
            lock: self.state_lk.0,
        }
    }
}
