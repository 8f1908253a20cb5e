//! Upload pod bootstrap
//!
//! The upload pod reuses this pod's image and runs the `upload` command with
//! the restore claim, a fresh archive claim and the Lagoon SSH key mounted.
//! Task arguments and endpoints reach it through environment variables.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    Container, EnvVar, PersistentVolumeClaimVolumeSource, Pod, PodSpec, SecretVolumeSource,
    Volume, VolumeMount,
};
use kube::core::ObjectMeta;
use tracing::{debug, info, warn};

use restore_task_common::Error;

use crate::cleanup::{cleanup, Cleanup, TaskResources};
use crate::client::TaskClient;
use crate::config::{
    ENV_API_HOST, ENV_JSON_PAYLOAD, ENV_TASK_ID, ENV_TOKEN_HOST, ENV_TOKEN_PORT,
    SSH_KEY_MOUNT_PATH,
};
use crate::provision::{
    create_volume_claim, skip_backup_annotations, task_labels, DEFAULT_CLAIM_SIZE,
};
use crate::task::RestoreTask;
use crate::upload::UploadRunner;
use crate::watch::{pod_phase, wait_for_pod, POD_FAILED, POD_SUCCEEDED};

/// Binary path inside the task image
pub const TASK_BINARY: &str = "/usr/local/bin/restore-files-task";
/// Secret holding the Lagoon SSH key
pub const SSH_KEY_SECRET: &str = "lagoon-sshkey";
/// Service account of the upload pod
pub const UPLOAD_SERVICE_ACCOUNT: &str = "lagoon-deployer";
/// Name of the upload container
pub const UPLOAD_CONTAINER: &str = "uploader";

const RESTORE_VOLUME: &str = "restore-target";
const ARCHIVE_VOLUME: &str = "archive-target";
// 0644
const SSH_KEY_MODE: i32 = 420;

/// Everything the upload pod is built from
#[derive(Clone, Debug)]
pub struct UploadPodParams<'a> {
    /// Image to run
    pub image: &'a str,
    /// Claim holding the restored files
    pub restore_claim: &'a str,
    /// Claim the archive is written to
    pub archive_claim: &'a str,
    /// Mount path of the restore claim
    pub restore_target: &'a Path,
    /// Mount path of the archive claim
    pub archive_target: &'a Path,
    /// Base64 JSON task arguments
    pub payload: &'a str,
}

/// Pick the upload pod image
///
/// This pod's first container image wins when `pod_name` resolves; otherwise
/// `task_image` is used.
pub async fn resolve_image(
    client: &dyn TaskClient,
    pod_name: Option<&str>,
    task_image: Option<&str>,
) -> Result<String, Error> {
    if let Some(name) = pod_name {
        match client.get_pod(name).await {
            Ok(Some(pod)) => {
                let image = pod
                    .spec
                    .and_then(|s| s.containers.into_iter().next())
                    .and_then(|c| c.image)
                    .filter(|i| !i.is_empty());
                if let Some(image) = image {
                    return Ok(image);
                }
            }
            Ok(None) => debug!(pod = %name, "Own pod not found"),
            Err(e) => debug!(pod = %name, error = %e, "Failed to read own pod"),
        }
    }
    task_image
        .filter(|i| !i.is_empty())
        .map(str::to_string)
        .ok_or_else(|| Error::config("failed to determine task image"))
}

fn env(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        value_from: None,
    }
}

fn claim_volume(name: &str, claim: &str) -> Volume {
    Volume {
        name: name.to_string(),
        persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
            claim_name: claim.to_string(),
            read_only: None,
        }),
        ..Default::default()
    }
}

fn mount(name: &str, path: &Path, read_only: bool) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.display().to_string(),
        read_only: read_only.then_some(true),
        ..Default::default()
    }
}

/// Build the upload pod for a task
pub fn build_upload_pod(task: &RestoreTask, params: &UploadPodParams<'_>) -> Pod {
    let endpoints = &task.endpoints;
    let container = Container {
        name: UPLOAD_CONTAINER.to_string(),
        image: Some(params.image.to_string()),
        command: Some(vec![
            TASK_BINARY.to_string(),
            "--restore-target".to_string(),
            params.restore_target.display().to_string(),
            "--archive-target".to_string(),
            params.archive_target.display().to_string(),
            "upload".to_string(),
        ]),
        env: Some(vec![
            env(ENV_JSON_PAYLOAD, params.payload),
            env(ENV_TASK_ID, &task.task_id),
            env(ENV_TOKEN_HOST[0], &endpoints.token_host),
            env(ENV_TOKEN_PORT[0], &endpoints.token_port),
            env(ENV_API_HOST[0], &endpoints.api_host),
        ]),
        volume_mounts: Some(vec![
            mount(SSH_KEY_SECRET, Path::new(SSH_KEY_MOUNT_PATH), true),
            mount(RESTORE_VOLUME, params.restore_target, false),
            mount(ARCHIVE_VOLUME, params.archive_target, false),
        ]),
        ..Default::default()
    };

    Pod {
        metadata: ObjectMeta {
            name: Some(task.upload_pod_name()),
            namespace: Some(task.namespace.clone()),
            labels: Some(task_labels(task)),
            annotations: Some(skip_backup_annotations()),
            ..Default::default()
        },
        spec: Some(PodSpec {
            volumes: Some(vec![
                claim_volume(RESTORE_VOLUME, params.restore_claim),
                claim_volume(ARCHIVE_VOLUME, params.archive_claim),
                Volume {
                    name: SSH_KEY_SECRET.to_string(),
                    secret: Some(SecretVolumeSource {
                        secret_name: Some(SSH_KEY_SECRET.to_string()),
                        default_mode: Some(SSH_KEY_MODE),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            ]),
            containers: vec![container],
            restart_policy: Some("Never".to_string()),
            service_account_name: Some(UPLOAD_SERVICE_ACCOUNT.to_string()),
            ..Default::default()
        }),
        status: None,
    }
}

/// Result of a finished upload pod
pub fn upload_pod_result(pod: &Pod) -> Result<(), Error> {
    match pod_phase(pod) {
        Some(POD_SUCCEEDED) => Ok(()),
        Some(POD_FAILED) => {
            let message = pod
                .status
                .as_ref()
                .and_then(|s| s.message.clone())
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| "upload pod failed".to_string());
            Err(Error::upload_failed(message))
        }
        other => Err(Error::upload_failed(format!(
            "upload pod ended in phase {}",
            other.unwrap_or("Unknown")
        ))),
    }
}

/// [`UploadRunner`] that bootstraps an upload pod
pub struct PodUploadRunner {
    client: Arc<dyn TaskClient>,
    pod_name: Option<String>,
    task_image: Option<String>,
    restore_target: PathBuf,
    archive_target: PathBuf,
    wait_timeout: Option<Duration>,
}

impl PodUploadRunner {
    /// Create a runner; `pod_name` is this pod, used to discover the image
    pub fn new(
        client: Arc<dyn TaskClient>,
        pod_name: Option<String>,
        task_image: Option<String>,
        restore_target: impl Into<PathBuf>,
        archive_target: impl Into<PathBuf>,
    ) -> Self {
        Self {
            client,
            pod_name,
            task_image,
            restore_target: restore_target.into(),
            archive_target: archive_target.into(),
            wait_timeout: None,
        }
    }

    /// Bound the wait for the upload pod
    pub fn with_wait_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.wait_timeout = timeout;
        self
    }

    async fn print_upload_logs(&self, pod: &str) {
        info!("====== Upload logs ======");
        match self.client.pod_logs(pod).await {
            Ok(logs) => println!("{}", logs.trim_end()),
            Err(e) => warn!(pod = %pod, error = %e, "Failed to get logs"),
        }
    }

    async fn fail(&self, resources: TaskResources, err: Error) -> Error {
        cleanup(self.client.as_ref(), &resources).await;
        err
    }

    /// Wait for the pod and read its outcome; `Ok` only if it succeeded
    async fn await_pod(&self, name: &str) -> Result<(), Error> {
        wait_for_pod(self.client.as_ref(), name, self.wait_timeout).await?;
        let outcome = match self.client.get_pod(name).await {
            Ok(Some(pod)) => upload_pod_result(&pod),
            Ok(None) => Err(Error::upload_failed(format!("upload pod {} disappeared", name))),
            Err(e) => Err(e),
        };
        self.print_upload_logs(name).await;
        outcome
    }
}

#[async_trait]
impl UploadRunner for PodUploadRunner {
    async fn run(&self, task: &RestoreTask, restore_claim: &str) -> Result<Option<Cleanup>, Error> {
        let image = resolve_image(
            self.client.as_ref(),
            self.pod_name.as_deref(),
            self.task_image.as_deref(),
        )
        .await?;
        let payload = task.args.encode()?;

        let archive_claim = task.archive_claim_name();
        create_volume_claim(self.client.as_ref(), task, &archive_claim, DEFAULT_CLAIM_SIZE).await?;
        let mut resources = TaskResources::claim(archive_claim.clone());

        let pod = build_upload_pod(
            task,
            &UploadPodParams {
                image: &image,
                restore_claim,
                archive_claim: &archive_claim,
                restore_target: &self.restore_target,
                archive_target: &self.archive_target,
                payload: &payload,
            },
        );
        let pod_name = task.upload_pod_name();
        if let Err(e) = self.client.create_pod(&pod).await {
            return Err(self.fail(resources, e).await);
        }
        resources = resources.with_pod(pod_name.clone());
        info!(pod = %pod_name, image = %image, "Started upload pod");

        if let Err(e) = self.await_pod(&pod_name).await {
            return Err(self.fail(resources, e).await);
        }
        Ok(Some(Cleanup::new(self.client.clone(), resources)))
    }
}
