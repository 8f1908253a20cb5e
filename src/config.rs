//! Command line and environment configuration
//!
//! Settings are resolved once at startup, each from the first non-empty layer:
//!
//! 1. Explicit command line flag
//! 2. Primary environment variable (`LAGOON_CONFIG_*`, `NAMESPACE`, `TASK_DATA_ID`)
//! 3. Legacy environment variable (`TASK_SSH_*`, `TASK_API_HOST`)
//! 4. Built-in default
//!
//! Backup ID and restore filter come from the base64 JSON in `JSON_PAYLOAD`
//! when not given as flags.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing::warn;

use restore_task_common::telemetry::LogFormat;
use restore_task_common::Error;

use crate::task::{RestoreTask, TaskArgs, UploadEndpoints};

/// Mount path of the Lagoon SSH key secret in task pods
pub const SSH_KEY_MOUNT_PATH: &str = "/var/run/secrets/lagoon/ssh";
/// Default SSH private key used for token retrieval
pub const DEFAULT_SSH_KEY: &str = "/var/run/secrets/lagoon/ssh/ssh-privatekey";
/// Default mount path of the restored files
pub const DEFAULT_RESTORE_TARGET: &str = "/restore";
/// Default mount path of the archive output
pub const DEFAULT_ARCHIVE_TARGET: &str = "/archive";

/// Environment variable carrying the base64 JSON task arguments
pub const ENV_JSON_PAYLOAD: &str = "JSON_PAYLOAD";
/// Environment variable with the environment namespace
pub const ENV_NAMESPACE: &str = "NAMESPACE";
/// Environment variable with the Lagoon task ID
pub const ENV_TASK_ID: &str = "TASK_DATA_ID";
/// Environment variables with the token host, most specific first
pub const ENV_TOKEN_HOST: &[&str] = &["LAGOON_CONFIG_TOKEN_HOST", "TASK_SSH_HOST"];
/// Environment variables with the token port, most specific first
pub const ENV_TOKEN_PORT: &[&str] = &["LAGOON_CONFIG_TOKEN_PORT", "TASK_SSH_PORT"];
/// Environment variables with the API host, most specific first
pub const ENV_API_HOST: &[&str] = &["LAGOON_CONFIG_API_HOST", "TASK_API_HOST"];
/// Environment variable with this pod's own name
pub const ENV_POD_NAME: &str = "PODNAME";

/// Which phase this process runs
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum TaskCommand {
    /// Restore the backup into a PVC, then run the upload phase
    Restore,
    /// Archive the restored files and upload them to the Lagoon task
    Upload,
}

/// How the restore command runs the upload phase
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum UploadMode {
    /// Bootstrap a pod that mounts the restore PVC and runs `upload`
    #[default]
    Pod,
    /// Archive and upload from this process (restore PVC mounted locally)
    InProcess,
}

/// Log line format
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormatArg {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Text => LogFormat::Text,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}

/// Restore files from a k8up backup and upload them to a Lagoon task
#[derive(Parser, Debug, Clone)]
#[command(name = "restore-files-task", version, about, long_about = None)]
pub struct Cli {
    /// Phase to run
    #[arg(value_enum)]
    pub command: TaskCommand,

    /// Absolute path to a kubeconfig file (in-cluster config when unset)
    #[arg(long)]
    pub kubeconfig: Option<PathBuf>,

    /// Environment namespace
    #[arg(long = "ns")]
    pub namespace: Option<String>,

    /// Task ID
    #[arg(long = "tid")]
    pub task_id: Option<String>,

    /// Backup ID
    #[arg(long = "bid")]
    pub backup_id: Option<String>,

    /// Restore filter
    #[arg(long)]
    pub filter: Option<String>,

    /// Path to restored files
    #[arg(long, default_value = DEFAULT_RESTORE_TARGET)]
    pub restore_target: PathBuf,

    /// Path to archive of restored files
    #[arg(long, default_value = DEFAULT_ARCHIVE_TARGET)]
    pub archive_target: PathBuf,

    /// SSH token host
    #[arg(long)]
    pub token_host: Option<String>,

    /// SSH token port
    #[arg(long)]
    pub token_port: Option<String>,

    /// Lagoon API host
    #[arg(long)]
    pub api_host: Option<String>,

    /// Task image for the upload pod when this pod's image can't be discovered
    #[arg(long)]
    pub task_image: Option<String>,

    /// Skip the upload phase entirely
    #[arg(long)]
    pub skip_bootstrap: bool,

    /// How to run the upload phase
    #[arg(long, value_enum, default_value_t = UploadMode::Pod)]
    pub upload_mode: UploadMode,

    /// SSH private key for token retrieval
    #[arg(long, default_value = DEFAULT_SSH_KEY)]
    pub ssh_key: PathBuf,

    /// Give up waiting for the restore or upload pod after this many seconds
    /// (waits indefinitely when unset)
    #[arg(long, value_parser = parse_wait_timeout)]
    pub wait_timeout: Option<Duration>,

    /// Print the k8up restore job logs (exposes the backup webhook URL)
    #[arg(long)]
    pub restore_logs: bool,

    /// Log line format
    #[arg(long, value_enum, default_value_t = LogFormatArg::Text)]
    pub log_format: LogFormatArg,
}

fn parse_wait_timeout(s: &str) -> Result<Duration, String> {
    let secs: u64 = s
        .trim()
        .parse()
        .map_err(|_| format!("invalid wait timeout '{}', expected seconds", s))?;
    if secs == 0 {
        return Err("wait timeout must be greater than zero".to_string());
    }
    Ok(Duration::from_secs(secs))
}

/// Fully resolved configuration
#[derive(Clone, Debug, PartialEq)]
pub struct Settings {
    /// Phase to run
    pub command: TaskCommand,
    /// Kubeconfig path, `None` to infer
    pub kubeconfig: Option<PathBuf>,
    /// Environment namespace
    pub namespace: Option<String>,
    /// Lagoon task ID
    pub task_id: Option<String>,
    /// Backup ID and restore filter
    pub args: TaskArgs,
    /// Path to restored files
    pub restore_target: PathBuf,
    /// Path to the archive output
    pub archive_target: PathBuf,
    /// Token and API endpoints
    pub endpoints: UploadEndpoints,
    /// Explicit upload pod image
    pub task_image: Option<String>,
    /// This pod's name, used to discover its image
    pub pod_name: Option<String>,
    /// Skip the upload phase
    pub skip_bootstrap: bool,
    /// How to run the upload phase
    pub upload_mode: UploadMode,
    /// SSH private key for token retrieval
    pub ssh_key: PathBuf,
    /// Deadline for the restore and upload pod waits
    pub wait_timeout: Option<Duration>,
    /// Print k8up restore job logs
    pub restore_logs: bool,
    /// Log line format
    pub log_format: LogFormat,
}

impl Settings {
    /// Resolve settings from parsed flags and the process environment
    pub fn from_env(cli: Cli) -> Self {
        Self::resolve(cli, |key| std::env::var(key).ok())
    }

    /// Resolve settings from parsed flags and an environment lookup
    pub fn resolve<E>(cli: Cli, env: E) -> Self
    where
        E: Fn(&str) -> Option<String>,
    {
        let payload = env(ENV_JSON_PAYLOAD)
            .filter(|v| !v.is_empty())
            .and_then(|encoded| match TaskArgs::decode(&encoded) {
                Ok(args) => Some(args),
                Err(e) => {
                    warn!(error = %e, "Ignoring undecodable {}", ENV_JSON_PAYLOAD);
                    None
                }
            })
            .unwrap_or_default();

        let args = TaskArgs {
            backup_id: first_non_empty([cli.backup_id, Some(payload.backup_id)])
                .unwrap_or_default(),
            restore_filter: first_non_empty([cli.filter, Some(payload.restore_filter)])
                .unwrap_or_default(),
        };

        let endpoints = UploadEndpoints {
            token_host: layered(cli.token_host, &env, ENV_TOKEN_HOST).unwrap_or_default(),
            token_port: layered(cli.token_port, &env, ENV_TOKEN_PORT).unwrap_or_default(),
            api_host: layered(cli.api_host, &env, ENV_API_HOST).unwrap_or_default(),
        };

        Self {
            command: cli.command,
            kubeconfig: cli.kubeconfig,
            namespace: layered(cli.namespace, &env, &[ENV_NAMESPACE]),
            task_id: layered(cli.task_id, &env, &[ENV_TASK_ID]),
            args,
            restore_target: cli.restore_target,
            archive_target: cli.archive_target,
            endpoints,
            task_image: first_non_empty([cli.task_image]),
            pod_name: layered(None, &env, &[ENV_POD_NAME]),
            skip_bootstrap: cli.skip_bootstrap,
            upload_mode: cli.upload_mode,
            ssh_key: cli.ssh_key,
            wait_timeout: cli.wait_timeout,
            restore_logs: cli.restore_logs,
            log_format: cli.log_format.into(),
        }
    }

    /// Check that the parameters the command needs are present
    ///
    /// Runs before anything touches the cluster. Unless the upload phase is
    /// skipped, `restore` also checks what the upload will need, so a bad
    /// endpoint or task ID fails before the restore rather than after it.
    pub fn validate(&self) -> Result<(), Error> {
        match self.command {
            TaskCommand::Restore => {
                let task_id_required = !self.skip_bootstrap;
                if self.args.backup_id.is_empty()
                    || self.args.restore_filter.is_empty()
                    || self.namespace.is_none()
                    || (task_id_required && self.task_id.is_none())
                {
                    return Err(Error::config(
                        "missing one of: namespace, task id, backup id, or restore filter",
                    ));
                }
                if !self.skip_bootstrap {
                    self.validate_upload_endpoints()?;
                    self.validate_numeric_task_id()?;
                }
                if self.upload_mode == UploadMode::Pod
                    && !self.skip_bootstrap
                    && self.pod_name.is_none()
                    && self.task_image.is_none()
                {
                    return Err(Error::config(format!(
                        "failed to determine task image: set {} or --task-image",
                        ENV_POD_NAME
                    )));
                }
            }
            TaskCommand::Upload => {
                if self.args.backup_id.is_empty() || self.task_id.is_none() {
                    return Err(Error::config(
                        "missing one of: backup id, task id, token host, token port, api host",
                    ));
                }
                self.validate_upload_endpoints()?;
                self.validate_numeric_task_id()?;
            }
        }
        Ok(())
    }

    fn validate_numeric_task_id(&self) -> Result<(), Error> {
        match self.task_id.as_deref() {
            Some(id) if id.parse::<i64>().is_err() => Err(Error::config(format!(
                "task id '{}' is not numeric",
                id
            ))),
            _ => Ok(()),
        }
    }

    fn validate_upload_endpoints(&self) -> Result<(), Error> {
        let e = &self.endpoints;
        if e.token_host.is_empty() || e.token_port.is_empty() || e.api_host.is_empty() {
            return Err(Error::config(
                "missing one of: backup id, task id, token host, token port, api host",
            ));
        }
        e.token_port()?;
        Ok(())
    }

    /// Build the task these settings describe
    ///
    /// Call [`Settings::validate`] first; a missing namespace becomes empty and a
    /// missing task ID is replaced by a random one.
    pub fn task(&self, version: impl Into<String>) -> RestoreTask {
        RestoreTask::new(
            self.args.clone(),
            self.namespace.clone().unwrap_or_default(),
            self.task_id.clone(),
            self.endpoints.clone(),
            version,
        )
    }
}

fn first_non_empty<const N: usize>(layers: [Option<String>; N]) -> Option<String> {
    layers.into_iter().flatten().find(|v| !v.is_empty())
}

fn layered<E>(flag: Option<String>, env: &E, keys: &[&str]) -> Option<String>
where
    E: Fn(&str) -> Option<String>,
{
    if let Some(value) = flag.filter(|v| !v.is_empty()) {
        return Some(value);
    }
    keys.iter()
        .filter_map(|key| env(key))
        .find(|v| !v.is_empty())
}
