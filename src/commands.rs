//! Top-level `restore` and `upload` commands

use std::sync::Arc;

use tracing::info;

use restore_task_common::kube_utils::create_client;
use restore_task_common::Error;

use crate::client::{KubeTaskClient, TaskClient};
use crate::config::{Settings, TaskCommand, UploadMode};
use crate::lagoon::LagoonUploader;
use crate::orchestrator::Orchestrator;
use crate::upload::{upload_pvc_to_task, InProcessUploadRunner, PodUploadRunner, UploadRunner};

/// Run the command the settings select
pub async fn run(settings: &Settings, version: &str) -> Result<(), Error> {
    settings.validate()?;
    match settings.command {
        TaskCommand::Restore => run_restore(settings, version).await,
        TaskCommand::Upload => run_upload(settings, version).await,
    }
}

/// Restore the backup, run the upload phase, clean up
pub async fn run_restore(settings: &Settings, version: &str) -> Result<(), Error> {
    let task = settings.task(version);

    info!("==================");
    info!("Restore Files Task");
    info!("{}", version);
    info!("==================");

    let kube = create_client(settings.kubeconfig.as_deref()).await?;
    let client: Arc<dyn TaskClient> = Arc::new(KubeTaskClient::new(kube, task.namespace.clone()));

    let runner: Option<Box<dyn UploadRunner>> = if settings.skip_bootstrap {
        None
    } else {
        match settings.upload_mode {
            UploadMode::Pod => Some(Box::new(
                PodUploadRunner::new(
                    client.clone(),
                    settings.pod_name.clone(),
                    settings.task_image.clone(),
                    &settings.restore_target,
                    &settings.archive_target,
                )
                .with_wait_timeout(settings.wait_timeout),
            )),
            UploadMode::InProcess => Some(Box::new(InProcessUploadRunner::new(
                Box::new(LagoonUploader::new(&task, &settings.ssh_key)?),
                &settings.restore_target,
                &settings.archive_target,
            ))),
        }
    };

    Orchestrator::new(client, task)
        .with_wait_timeout(settings.wait_timeout)
        .with_restore_logs(settings.restore_logs)
        .run(runner.as_deref())
        .await?;

    info!("==================");
    info!("Task completed");
    info!("==================");
    Ok(())
}

/// Archive the mounted restore and upload it; runs inside the upload pod
///
/// Cluster resources are the parent task's responsibility.
pub async fn run_upload(settings: &Settings, version: &str) -> Result<(), Error> {
    let task = settings.task(version);
    let uploader = LagoonUploader::new(&task, &settings.ssh_key)?;
    upload_pvc_to_task(
        &task,
        &uploader,
        &settings.restore_target,
        &settings.archive_target,
    )
    .await?;
    Ok(())
}
