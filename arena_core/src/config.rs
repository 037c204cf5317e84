// typed process configuration, loaded from the environment

use crate::{CoreError, CoreResult};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// worker pool options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    pub min_workers: usize,
    pub max_workers: usize,
    /// per-match deadline of one processing attempt
    pub timeout: Duration,
    pub retry_attempts: u32,
    /// base delay; attempt n sleeps `retry_delay * n`
    pub retry_delay: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            min_workers: 2,
            max_workers: 20,
            timeout: Duration::from_secs(90),
            retry_attempts: 3,
            retry_delay: Duration::from_secs(2),
        }
    }
}

/// sandbox executor options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// wall-clock limit of one match
    pub timeout: Duration,
    /// cfs quota in microseconds per 100ms period
    pub cpu_quota: i64,
    /// total memory cap in bytes; swap is capped to the same value
    pub memory_limit: i64,
    pub pids_limit: i64,
    pub default_iterations: u32,
    pub verbose: bool,
    pub seccomp_profile: Option<String>,
    pub apparmor_profile: Option<String>,
    pub cpuset_cpus: Option<String>,
    pub image: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        ExecutorConfig {
            timeout: Duration::from_secs(60),
            cpu_quota: 100_000,
            memory_limit: 256 * 1024 * 1024,
            pids_limit: 100,
            default_iterations: 1,
            verbose: false,
            seccomp_profile: None,
            apparmor_profile: None,
            cpuset_cpus: None,
            image: String::new(),
        }
    }
}

/// queue backing store options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    pub backing_address: String,
    pub pool_size: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        QueueConfig {
            backing_address: "redis://127.0.0.1:6379".into(),
            pool_size: 8,
        }
    }
}

/// recovery service options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryConfig {
    /// a running match older than this is presumed orphaned
    pub stuck_duration: Duration,
    pub batch_size: i64,
    pub periodic_interval: Duration,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        RecoveryConfig {
            stuck_duration: Duration::from_secs(600),
            batch_size: 1000,
            periodic_interval: Duration::from_secs(300),
        }
    }
}

/// metrics endpoint options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        MetricsConfig {
            enabled: true,
            port: 9090,
        }
    }
}

/// program store layout: host directory bind-mounted read-only into the
/// sandbox; path translation is a pure prefix replacement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramStoreConfig {
    pub host_dir: String,
    pub container_dir: String,
}

impl Default for ProgramStoreConfig {
    fn default() -> Self {
        ProgramStoreConfig {
            host_dir: "/var/lib/bot-arena/programs".into(),
            container_dir: "/programs".into(),
        }
    }
}

/// full process configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub worker: WorkerConfig,
    pub executor: ExecutorConfig,
    pub queue: QueueConfig,
    pub recovery: RecoveryConfig,
    pub metrics: MetricsConfig,
    pub programs: ProgramStoreConfig,
    pub database_url: String,
    pub database_pool_size: u32,
    pub leaderboard_refresh_interval: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            worker: WorkerConfig::default(),
            executor: ExecutorConfig::default(),
            queue: QueueConfig::default(),
            recovery: RecoveryConfig::default(),
            metrics: MetricsConfig::default(),
            programs: ProgramStoreConfig::default(),
            database_url: String::new(),
            database_pool_size: 16,
            leaderboard_refresh_interval: Duration::from_secs(30),
        }
    }
}

impl AppConfig {
    /// Load from the environment. Secrets accept a `*_FILE` indirection
    /// pointing to a readable path.
    pub fn from_env() -> CoreResult<Self> {
        let mut config = AppConfig {
            database_url: env_or_file("DATABASE_URL")?
                .ok_or_else(|| CoreError::Config("DATABASE_URL must be set".into()))?,
            database_pool_size: parse_env("DATABASE_POOL_SIZE", 16u32)?,
            leaderboard_refresh_interval: Duration::from_secs(parse_env(
                "LEADERBOARD_REFRESH_INTERVAL_SECS",
                30u64,
            )?),
            ..AppConfig::default()
        };

        config.worker = WorkerConfig {
            min_workers: parse_env("WORKER_MIN_WORKERS", config.worker.min_workers)?,
            max_workers: parse_env("WORKER_MAX_WORKERS", config.worker.max_workers)?,
            timeout: secs_env("WORKER_TIMEOUT_SECS", config.worker.timeout)?,
            retry_attempts: parse_env("WORKER_RETRY_ATTEMPTS", config.worker.retry_attempts)?,
            retry_delay: millis_env("WORKER_RETRY_DELAY_MS", config.worker.retry_delay)?,
        };

        config.executor = ExecutorConfig {
            timeout: secs_env("EXECUTOR_TIMEOUT_SECS", config.executor.timeout)?,
            cpu_quota: parse_env("EXECUTOR_CPU_QUOTA", config.executor.cpu_quota)?,
            memory_limit: parse_env("EXECUTOR_MEMORY_LIMIT", config.executor.memory_limit)?,
            pids_limit: parse_env("EXECUTOR_PIDS_LIMIT", config.executor.pids_limit)?,
            default_iterations: parse_env(
                "EXECUTOR_DEFAULT_ITERATIONS",
                config.executor.default_iterations,
            )?,
            verbose: parse_env("EXECUTOR_VERBOSE", config.executor.verbose)?,
            seccomp_profile: opt_env("EXECUTOR_SECCOMP_PROFILE"),
            apparmor_profile: opt_env("EXECUTOR_APPARMOR_PROFILE"),
            cpuset_cpus: opt_env("EXECUTOR_CPUSET_CPUS"),
            image: env::var("EXECUTOR_IMAGE")
                .map_err(|_| CoreError::Config("EXECUTOR_IMAGE must be set".into()))?,
        };

        config.queue = QueueConfig {
            backing_address: env_or_file("QUEUE_BACKING_ADDRESS")?
                .unwrap_or(config.queue.backing_address),
            pool_size: parse_env("QUEUE_POOL_SIZE", config.queue.pool_size)?,
        };

        config.recovery = RecoveryConfig {
            stuck_duration: secs_env("RECOVERY_STUCK_DURATION_SECS", config.recovery.stuck_duration)?,
            batch_size: parse_env("RECOVERY_BATCH_SIZE", config.recovery.batch_size)?,
            periodic_interval: secs_env(
                "RECOVERY_PERIODIC_INTERVAL_SECS",
                config.recovery.periodic_interval,
            )?,
        };

        config.metrics = MetricsConfig {
            enabled: parse_env("METRICS_ENABLED", config.metrics.enabled)?,
            port: parse_env("METRICS_PORT", config.metrics.port)?,
        };

        config.programs = ProgramStoreConfig {
            host_dir: env::var("PROGRAMS_HOST_DIR").unwrap_or(config.programs.host_dir),
            container_dir: env::var("PROGRAMS_CONTAINER_DIR").unwrap_or(config.programs.container_dir),
        };

        config.validate()?;
        Ok(config)
    }

    /// Refuse to start on invariant violations.
    pub fn validate(&self) -> CoreResult<()> {
        if self.worker.min_workers == 0 {
            return Err(CoreError::Config("worker.min_workers must be positive".into()));
        }
        if self.worker.max_workers < self.worker.min_workers {
            return Err(CoreError::Config(
                "worker.max_workers must not be below worker.min_workers".into(),
            ));
        }
        if self.worker.timeout.is_zero() {
            return Err(CoreError::Config("worker.timeout must be positive".into()));
        }
        if self.executor.timeout.is_zero() {
            return Err(CoreError::Config("executor.timeout must be positive".into()));
        }
        if self.executor.timeout > self.worker.timeout {
            return Err(CoreError::Config(
                "executor.timeout must fit inside worker.timeout".into(),
            ));
        }
        if self.executor.image.is_empty() {
            return Err(CoreError::Config("executor.image must be set".into()));
        }
        if self.executor.memory_limit <= 0 || self.executor.pids_limit <= 0 {
            return Err(CoreError::Config(
                "executor memory and pids limits must be positive".into(),
            ));
        }
        if self.executor.cpu_quota <= 0 {
            return Err(CoreError::Config("executor.cpu_quota must be positive".into()));
        }
        if self.recovery.batch_size <= 0 {
            return Err(CoreError::Config("recovery.batch_size must be positive".into()));
        }
        // stuck reclaim must never race healthy in-flight work
        if self.recovery.stuck_duration <= self.worker.timeout {
            return Err(CoreError::Config(
                "recovery.stuck_duration must exceed worker.timeout".into(),
            ));
        }
        if self.database_url.is_empty() {
            return Err(CoreError::Config("database url must not be empty".into()));
        }
        if self.database_pool_size == 0 {
            return Err(CoreError::Config("database pool size must be positive".into()));
        }
        if self.queue.pool_size == 0 {
            return Err(CoreError::Config("queue.pool_size must be positive".into()));
        }
        Ok(())
    }
}

/// read KEY, or the contents of the path in KEY_FILE (file-based secrets)
fn env_or_file(key: &str) -> CoreResult<Option<String>> {
    if let Ok(direct) = env::var(key) {
        return Ok(Some(direct));
    }
    let file_key = format!("{key}_FILE");
    match env::var(&file_key) {
        Ok(path) => {
            let contents = std::fs::read_to_string(&path).map_err(|e| {
                CoreError::Config(format!("could not read {file_key} at {path}: {e}"))
            })?;
            Ok(Some(contents.trim().to_string()))
        }
        Err(_) => Ok(None),
    }
}

fn opt_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn parse_env<T: FromStr>(key: &str, default: T) -> CoreResult<T> {
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|_| CoreError::Config(format!("could not parse {key}={raw}"))),
        Err(_) => Ok(default),
    }
}

fn secs_env(key: &str, default: Duration) -> CoreResult<Duration> {
    Ok(Duration::from_secs(parse_env(key, default.as_secs())?))
}

fn millis_env(key: &str, default: Duration) -> CoreResult<Duration> {
    Ok(Duration::from_millis(parse_env(
        key,
        default.as_millis() as u64,
    )?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> AppConfig {
        let mut config = AppConfig {
            database_url: "postgres://localhost/arena".into(),
            ..AppConfig::default()
        };
        config.executor.image = "bot-arena/runner:latest".into();
        config
    }

    #[test]
    fn default_shape_is_valid() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn rejects_inverted_worker_bounds() {
        let mut config = valid_config();
        config.worker.min_workers = 10;
        config.worker.max_workers = 2;
        assert!(matches!(config.validate(), Err(CoreError::Config(_))));
    }

    #[test]
    fn rejects_stuck_duration_below_match_timeout() {
        let mut config = valid_config();
        config.recovery.stuck_duration = Duration::from_secs(30);
        assert!(matches!(config.validate(), Err(CoreError::Config(_))));
    }

    #[test]
    fn rejects_missing_image() {
        let mut config = valid_config();
        config.executor.image.clear();
        assert!(matches!(config.validate(), Err(CoreError::Config(_))));
    }

    #[test]
    fn rejects_executor_timeout_beyond_worker_timeout() {
        let mut config = valid_config();
        config.executor.timeout = config.worker.timeout + Duration::from_secs(1);
        assert!(matches!(config.validate(), Err(CoreError::Config(_))));
    }
}
