use std::time::Duration;
use anyhow::bail;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use ovn_topology_schemas::settings::Settings;
use crate::error::{provision_error, stderr_is_transient, ProvisionError};

pub mod orchestrator;
pub mod instance;

/// This is a minimal set of data required by every component to build its commands. It is built
/// once per run from the topology settings and handed down by reference.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OrchestrationCommon {
    pub ovn_nb_connection: Option<String>,
    pub integration_bridge: String,
    pub dns_domain: String,
    pub dhcp_lease_time: u32,
    pub ra_min_interval: u32,
    pub ra_max_interval: u32,
}

impl OrchestrationCommon {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            ovn_nb_connection: settings.ovn_nb_connection.clone(),
            integration_bridge: settings.integration_bridge.clone(),
            dns_domain: settings.dns_domain.clone(),
            dhcp_lease_time: settings.dhcp_lease_time,
            ra_min_interval: settings.ra_min_interval,
            ra_max_interval: settings.ra_max_interval,
        }
    }

    /// Prefix the arguments with `ovn-nbctl` and the northbound database connection, if there is
    /// one configured.
    pub fn nbctl(&self, args: Vec<String>) -> Vec<String> {
        let mut cmd = vec!["ovn-nbctl".to_string()];
        if let Some(db) = &self.ovn_nb_connection {
            cmd.push("--db".to_string());
            cmd.push(db.clone());
        }
        cmd.extend(args);
        cmd
    }
}

impl Default for OrchestrationCommon {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

/// Everything that touches the host goes through this trait, one command as a list of arguments
/// at a time, and the stdout is handed back. Components only ever build commands and hand them to
/// a runner, so in unit testing we can send in a runner that records or simulates the command
/// rather than executing it.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run the command, a non-zero exit is an error.
    async fn run(&self, cmd: Vec<String>) -> anyhow::Result<String>;
    /// Run the command, a non-zero exit is logged and the (possibly empty) stdout returned.
    async fn run_allow_fail(&self, cmd: Vec<String>) -> anyhow::Result<String>;
    /// Run a command that adds something new every time it succeeds, such as a `create` of a
    /// database row. It is never repeated once it may have been applied.
    async fn run_non_idempotent(&self, cmd: Vec<String>) -> anyhow::Result<String> {
        self.run(cmd).await
    }
}

/// Upper bound for the wait between two attempts of a command.
pub const MAX_RETRY_BACKOFF: Duration = Duration::from_secs(30);

/// Runs commands as real subprocesses, optionally under sudo, each one bounded by a timeout and
/// retried with a backoff when the failure looks transient.
#[derive(Debug, Clone)]
pub struct SubprocessRunner {
    pub use_sudo: bool,
    pub timeout: Duration,
    pub retry_attempts: u32,
    pub retry_backoff: Duration,
}

impl SubprocessRunner {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            use_sudo: settings.use_sudo,
            timeout: Duration::from_secs(settings.command_timeout_secs),
            retry_attempts: settings.retry_attempts.max(1),
            retry_backoff: Duration::from_millis(settings.retry_backoff_ms),
        }
    }

    /// There is a `starting_command` as the sub process command needs you to specify the first
    /// command explicitly, then you can add arguments as a collection.
    async fn run_once(
        &self,
        cmd: &[String],
        allow_fail: bool,
    ) -> anyhow::Result<String> {
        if cmd.is_empty() {
            bail!(ProvisionError::validation("tried to run an empty command"));
        }
        let command_string = cmd.join(" ");
        tracing::debug!("running command: {command_string}");
        let (starting_command, args) = if self.use_sudo {
            ("sudo", cmd)
        } else {
            (cmd[0].as_str(), &cmd[1..])
        };

        let output = Command::new(starting_command)
            .args(args)
            .kill_on_drop(true)
            .output();
        let sub_process = match tokio::time::timeout(self.timeout, output).await {
            Ok(res) => res?,
            Err(_) => bail!(ProvisionError::TimedOut {
                command: command_string,
                timeout_secs: self.timeout.as_secs(),
            }),
        };

        if !sub_process.status.success() {
            let std_err = String::from_utf8_lossy(&sub_process.stderr).trim().to_string();
            if !allow_fail {
                bail!(ProvisionError::CommandFailed {
                    transient: stderr_is_transient(&std_err),
                    command: command_string,
                    stderr: std_err,
                });
            }
            // command failed but allowed to fail, log the reason
            tracing::warn!("command failed but allowed to fail ({command_string}), error: {std_err}");
        }
        Ok(String::from_utf8(sub_process.stdout)?)
    }

    /// Wait before attempt `attempt + 1`, doubling from `retry_backoff` up to `MAX_RETRY_BACKOFF`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        2u32.checked_pow(attempt.saturating_sub(1))
            .and_then(|factor| self.retry_backoff.checked_mul(factor))
            .map_or(MAX_RETRY_BACKOFF, |backoff| backoff.min(MAX_RETRY_BACKOFF))
    }

    /// With `repeatable` false, failures after which the command may still have been applied
    /// (timeouts) are returned rather than retried.
    async fn run_with_retry(
        &self,
        cmd: Vec<String>,
        allow_fail: bool,
        repeatable: bool,
    ) -> anyhow::Result<String> {
        let mut attempt = 1;
        loop {
            match self.run_once(&cmd, allow_fail).await {
                Ok(out) => return Ok(out),
                Err(err) => {
                    let retry = match provision_error(&err) {
                        Some(e) => e.is_transient() && (repeatable || !e.may_have_applied()),
                        None => false,
                    };
                    if !retry || attempt >= self.retry_attempts {
                        return Err(err);
                    }
                    let backoff = self.backoff(attempt);
                    tracing::warn!("attempt {attempt}/{} failed, retrying in {backoff:?}: {err:#}", self.retry_attempts);
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[async_trait]
impl CommandRunner for SubprocessRunner {
    async fn run(&self, cmd: Vec<String>) -> anyhow::Result<String> {
        self.run_with_retry(cmd, false, true).await
    }

    async fn run_allow_fail(&self, cmd: Vec<String>) -> anyhow::Result<String> {
        self.run_with_retry(cmd, true, true).await
    }

    async fn run_non_idempotent(&self, cmd: Vec<String>) -> anyhow::Result<String> {
        self.run_with_retry(cmd, false, false).await
    }
}

/// Helper to make the parsing of `--format=csv --no-headings --data=bare` output the same
/// everywhere, one value per non-empty line.
pub fn output_lines(output: &str) -> Vec<String> {
    output.lines()
        .map(|l| l.trim().trim_matches('"').to_string())
        .filter(|l| !l.is_empty())
        .collect()
}
