//! Docker implementation of the sandbox port.
//!
//! Each match runs in a disposable container: read-only root filesystem,
//! all capabilities dropped, no network interfaces, a noexec tmpfs as the
//! only writable path, and hard caps on memory, cpu time, processes and
//! files. The programs directory is bind-mounted read-only; host paths are
//! translated into the mount by pure prefix replacement.

use anyhow::{Context, anyhow};
use arena_core::{
    ExecutorConfig, MatchJob, MatchOutcome, ProgramStoreConfig, SandboxError, SandboxPort,
    SandboxResult,
};
use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, WaitContainerOptions,
};
use bollard::models::{HostConfig, ResourcesUlimits};
use futures_util::StreamExt;
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// writable scratch space: small, non-executable, wiped with the container
const TMPFS_OPTIONS: &str = "rw,noexec,nosuid,size=64m";
/// open file cap, soft and hard
const NOFILE_LIMIT: i64 = 64;
/// new files are capped at 10MiB
const FSIZE_LIMIT: i64 = 10 * 1024 * 1024;
/// cfs scheduling period matching the configured quota
const CPU_PERIOD: i64 = 100_000;
/// error code for exit 0 with unusable stdout
const MALFORMED_OUTPUT_CODE: i32 = 3;

pub struct DockerSandbox {
    docker: Docker,
    config: ExecutorConfig,
    programs: ProgramStoreConfig,
}

impl DockerSandbox {
    pub fn new(config: ExecutorConfig, programs: ProgramStoreConfig) -> anyhow::Result<Self> {
        let docker =
            Docker::connect_with_local_defaults().context("container runtime unreachable")?;
        Ok(DockerSandbox {
            docker,
            config,
            programs,
        })
    }

    fn host_config(&self) -> HostConfig {
        let mut security_opt = vec!["no-new-privileges".to_string()];
        if let Some(profile) = &self.config.seccomp_profile {
            security_opt.push(format!("seccomp={profile}"));
        }
        if let Some(profile) = &self.config.apparmor_profile {
            security_opt.push(format!("apparmor={profile}"));
        }

        HostConfig {
            binds: Some(vec![format!(
                "{}:{}:ro",
                self.programs.host_dir, self.programs.container_dir
            )]),
            memory: Some(self.config.memory_limit),
            // swap equal to memory means no overcommit into swap
            memory_swap: Some(self.config.memory_limit),
            cpu_period: Some(CPU_PERIOD),
            cpu_quota: Some(self.config.cpu_quota),
            cpuset_cpus: self.config.cpuset_cpus.clone(),
            pids_limit: Some(self.config.pids_limit),
            readonly_rootfs: Some(true),
            cap_drop: Some(vec!["ALL".to_string()]),
            security_opt: Some(security_opt),
            network_mode: Some("none".to_string()),
            tmpfs: Some(HashMap::from([(
                "/tmp".to_string(),
                TMPFS_OPTIONS.to_string(),
            )])),
            ulimits: Some(vec![
                ResourcesUlimits {
                    name: Some("nofile".to_string()),
                    soft: Some(NOFILE_LIMIT),
                    hard: Some(NOFILE_LIMIT),
                },
                ResourcesUlimits {
                    name: Some("fsize".to_string()),
                    soft: Some(FSIZE_LIMIT),
                    hard: Some(FSIZE_LIMIT),
                },
                // no core files
                ResourcesUlimits {
                    name: Some("core".to_string()),
                    soft: Some(0),
                    hard: Some(0),
                },
            ]),
            ..Default::default()
        }
    }

    /// best-effort removal, attempted on every exit path
    async fn remove_container(&self, name: &str) {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        if let Err(e) = self.docker.remove_container(name, Some(options)).await {
            warn!(container = name, error = %e, "container_remove_failed");
        }
    }

    async fn collect_logs(&self, name: &str) -> anyhow::Result<(String, String)> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            ..Default::default()
        };
        let mut stream = self.docker.logs(name, Some(options));
        let mut stdout = String::new();
        let mut stderr = String::new();
        while let Some(frame) = stream.next().await {
            match frame.context("log stream broke")? {
                LogOutput::StdOut { message } => {
                    stdout.push_str(&String::from_utf8_lossy(&message));
                }
                LogOutput::StdErr { message } => {
                    stderr.push_str(&String::from_utf8_lossy(&message));
                }
                _ => {}
            }
        }
        Ok((strip_nul(&stdout), strip_nul(&stderr)))
    }
}

#[async_trait]
impl SandboxPort for DockerSandbox {
    #[instrument(name = "sandbox.run", skip(self, job), fields(game = %job.game_type))]
    async fn run(&self, job: &MatchJob) -> SandboxResult<MatchOutcome> {
        let name = format!("match-{}", Uuid::new_v4());
        let cmd = build_command(job, &self.programs);
        debug!(container = %name, ?cmd, "container_create");

        let config = Config::<String> {
            image: Some(self.config.image.clone()),
            cmd: Some(cmd),
            host_config: Some(self.host_config()),
            network_disabled: Some(true),
            ..Default::default()
        };
        self.docker
            .create_container(
                Some(CreateContainerOptions {
                    name: name.as_str(),
                    platform: None,
                }),
                config,
            )
            .await
            .map_err(|e| SandboxError::Runtime(anyhow!(e).context("container create failed")))?;

        let started = Instant::now();
        if let Err(e) = self
            .docker
            .start_container(&name, None::<StartContainerOptions<String>>)
            .await
        {
            self.remove_container(&name).await;
            return Err(SandboxError::Runtime(
                anyhow!(e).context("container start failed"),
            ));
        }

        let mut wait_stream = self
            .docker
            .wait_container(&name, None::<WaitContainerOptions<String>>);
        let exit_code = match tokio::time::timeout(self.config.timeout, wait_stream.next()).await {
            Err(_) => {
                warn!(container = %name, "match_timeout");
                self.remove_container(&name).await;
                return Err(SandboxError::Timeout);
            }
            Ok(None) => {
                self.remove_container(&name).await;
                return Err(SandboxError::Runtime(anyhow!(
                    "wait stream ended without a status"
                )));
            }
            Ok(Some(Ok(response))) => response.status_code,
            // a non-zero exit surfaces as an error variant carrying the code
            Ok(Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. }))) => code,
            Ok(Some(Err(e))) => {
                self.remove_container(&name).await;
                return Err(SandboxError::Runtime(
                    anyhow!(e).context("container wait failed"),
                ));
            }
        };
        let duration = started.elapsed();

        let logs = self.collect_logs(&name).await;
        self.remove_container(&name).await;
        let (stdout, stderr) = logs.map_err(SandboxError::Runtime)?;

        let outcome = outcome_from_exit(exit_code, &stdout, &stderr, duration);
        info!(
            exit_code,
            error_code = outcome.error_code,
            duration_ms = duration.as_millis() as u64,
            "container_done"
        );
        Ok(outcome)
    }
}

/// argv handed to the game binary:
/// `<game_type> [-i iterations] [-v] <program1> <program2>`
fn build_command(job: &MatchJob, programs: &ProgramStoreConfig) -> Vec<String> {
    let mut cmd = vec![job.game_type.clone()];
    if job.iterations > 0 {
        cmd.push("-i".to_string());
        cmd.push(job.iterations.to_string());
    }
    if job.verbose {
        cmd.push("-v".to_string());
    }
    cmd.push(container_path(&job.program1_path, programs));
    cmd.push(container_path(&job.program2_path, programs));
    cmd
}

/// pure prefix replacement from the host tree into the bind mount
fn container_path(host_path: &str, programs: &ProgramStoreConfig) -> String {
    match host_path.strip_prefix(&programs.host_dir) {
        Some(rest) => format!("{}{}", programs.container_dir, rest),
        None => host_path.to_string(),
    }
}

/// downstream storage rejects NUL bytes in text
fn strip_nul(s: &str) -> String {
    s.replace('\0', "")
}

/// Map the game binary's exit protocol onto an outcome: 0 with
/// `"s1 s2"` on stdout is a clean result, 1 and 2 blame one side, anything
/// else is an infrastructure failure.
fn outcome_from_exit(
    exit_code: i64,
    stdout: &str,
    stderr: &str,
    duration: std::time::Duration,
) -> MatchOutcome {
    let stderr_message = || {
        let trimmed = stderr.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    };

    match exit_code {
        0 => match parse_scores(stdout) {
            Some((score1, score2)) => MatchOutcome {
                score1,
                score2,
                winner: Some(MatchOutcome::winner_from_scores(score1, score2)),
                error_code: 0,
                error_message: None,
                duration,
            },
            None => MatchOutcome {
                score1: 0,
                score2: 0,
                winner: None,
                error_code: MALFORMED_OUTPUT_CODE,
                error_message: Some("malformed match output".to_string()),
                duration,
            },
        },
        1 => MatchOutcome {
            score1: 0,
            score2: 0,
            winner: Some(2),
            error_code: 1,
            error_message: stderr_message(),
            duration,
        },
        2 => MatchOutcome {
            score1: 0,
            score2: 0,
            winner: Some(1),
            error_code: 2,
            error_message: stderr_message(),
            duration,
        },
        other => MatchOutcome {
            score1: 0,
            score2: 0,
            winner: None,
            error_code: other as i32,
            error_message: stderr_message()
                .or_else(|| Some(format!("game binary exited with {other}"))),
            duration,
        },
    }
}

/// stdout of a clean run is exactly two whitespace-separated integers
fn parse_scores(stdout: &str) -> Option<(i32, i32)> {
    let mut parts = stdout.split_whitespace();
    let score1 = parts.next()?.parse().ok()?;
    let score2 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((score1, score2))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn store() -> ProgramStoreConfig {
        ProgramStoreConfig {
            host_dir: "/srv/programs".to_string(),
            container_dir: "/programs".to_string(),
        }
    }

    fn job() -> MatchJob {
        MatchJob {
            game_type: "connect4".to_string(),
            program1_path: "/srv/programs/team-a/bot".to_string(),
            program2_path: "/srv/programs/team-b/bot".to_string(),
            iterations: 5,
            verbose: false,
        }
    }

    #[test]
    fn command_follows_inner_protocol() {
        let cmd = build_command(&job(), &store());
        assert_eq!(
            cmd,
            vec![
                "connect4",
                "-i",
                "5",
                "/programs/team-a/bot",
                "/programs/team-b/bot"
            ]
        );
    }

    #[test]
    fn verbose_flag_precedes_programs() {
        let mut verbose_job = job();
        verbose_job.verbose = true;
        let cmd = build_command(&verbose_job, &store());
        assert_eq!(cmd[3], "-v");
    }

    #[test]
    fn path_translation_is_prefix_replacement() {
        assert_eq!(
            container_path("/srv/programs/x/y", &store()),
            "/programs/x/y"
        );
        // outside the store the path passes through untouched
        assert_eq!(container_path("/etc/passwd", &store()), "/etc/passwd");
    }

    #[test]
    fn clean_exit_parses_scores() {
        let outcome = outcome_from_exit(0, "12 7\n", "", Duration::from_secs(1));
        assert_eq!((outcome.score1, outcome.score2), (12, 7));
        assert_eq!(outcome.winner, Some(1));
        assert_eq!(outcome.error_code, 0);
        assert_eq!(outcome.error_message, None);
    }

    #[test]
    fn malformed_stdout_is_infrastructure_failure() {
        for bad in ["", "12", "a b", "1 2 3"] {
            let outcome = outcome_from_exit(0, bad, "", Duration::ZERO);
            assert_eq!(outcome.error_code, MALFORMED_OUTPUT_CODE, "stdout {bad:?}");
            assert_eq!(outcome.winner, None);
        }
    }

    #[test]
    fn fault_exit_codes_blame_one_side() {
        let outcome = outcome_from_exit(1, "", "segfault", Duration::ZERO);
        assert_eq!(outcome.winner, Some(2));
        assert_eq!(outcome.error_code, 1);
        assert_eq!(outcome.error_message.as_deref(), Some("segfault"));

        let outcome = outcome_from_exit(2, "", "", Duration::ZERO);
        assert_eq!(outcome.winner, Some(1));
        assert_eq!(outcome.error_message, None);
    }

    #[test]
    fn unknown_exit_code_has_no_winner() {
        let outcome = outcome_from_exit(137, "", "", Duration::ZERO);
        assert_eq!(outcome.winner, None);
        assert_eq!(outcome.error_code, 137);
        assert!(outcome.error_message.unwrap().contains("137"));
    }

    #[test]
    fn nul_bytes_are_stripped() {
        assert_eq!(strip_nul("seg\0fault\0"), "segfault");
    }
}
