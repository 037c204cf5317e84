//! Fake of the sandbox port with scripted outcomes.

use arena_core::{MatchJob, MatchOutcome, SandboxError, SandboxPort, SandboxResult};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

/// storable form of one scripted run
#[derive(Debug, Clone)]
pub enum ScriptedRun {
    Outcome(MatchOutcome),
    Timeout,
    Runtime(String),
}

pub struct FakeSandbox {
    script: Mutex<VecDeque<ScriptedRun>>,
    /// every job handed to the sandbox, in order
    pub jobs: Mutex<Vec<MatchJob>>,
}

impl FakeSandbox {
    pub fn new() -> Self {
        FakeSandbox {
            script: Mutex::new(VecDeque::new()),
            jobs: Mutex::new(Vec::new()),
        }
    }

    /// queue a scripted run; consumed in order
    pub fn push(&self, run: ScriptedRun) {
        self.script.lock().unwrap().push_back(run);
    }

    /// clean result helper
    pub fn push_scores(&self, score1: i32, score2: i32) {
        self.push(ScriptedRun::Outcome(MatchOutcome {
            score1,
            score2,
            winner: Some(MatchOutcome::winner_from_scores(score1, score2)),
            error_code: 0,
            error_message: None,
            duration: Duration::from_millis(10),
        }));
    }

    /// one-sided fault helper (inner exit code 1 or 2)
    pub fn push_fault(&self, exit_code: i32, stderr: &str) {
        self.push(ScriptedRun::Outcome(MatchOutcome {
            score1: 0,
            score2: 0,
            winner: Some(if exit_code == 1 { 2 } else { 1 }),
            error_code: exit_code,
            error_message: (!stderr.is_empty()).then(|| stderr.to_string()),
            duration: Duration::from_millis(10),
        }));
    }

    pub fn jobs_run(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }
}

impl Default for FakeSandbox {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SandboxPort for FakeSandbox {
    async fn run(&self, job: &MatchJob) -> SandboxResult<MatchOutcome> {
        self.jobs.lock().unwrap().push(job.clone());
        let scripted = self.script.lock().unwrap().pop_front();
        match scripted {
            // out of script: default clean draw
            None => Ok(MatchOutcome {
                score1: 1,
                score2: 1,
                winner: Some(0),
                error_code: 0,
                error_message: None,
                duration: Duration::from_millis(10),
            }),
            Some(ScriptedRun::Outcome(outcome)) => Ok(outcome),
            Some(ScriptedRun::Timeout) => Err(SandboxError::Timeout),
            Some(ScriptedRun::Runtime(message)) => {
                Err(SandboxError::Runtime(anyhow::anyhow!("{message}")))
            }
        }
    }
}
