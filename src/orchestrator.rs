//! Restore workflow
//!
//! Sequences provisioning, the k8up restore, the upload phase and cleanup.
//! Every step is attempted once. On failure the orchestrator cleans up what
//! the failed phase created before returning the error; on success the
//! cleanup of each phase is deferred until the whole workflow is done.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use restore_task_common::Error;

use crate::cleanup::{cleanup, Cleanup, TaskResources};
use crate::client::TaskClient;
use crate::provision::{create_volume_claim, DEFAULT_CLAIM_SIZE};
use crate::restore::{classify_restore, print_restore_logs, start_restore};
use crate::task::RestoreTask;
use crate::upload::UploadRunner;
use crate::watch::wait_for_restore;

/// A successful restore and the cleanup it still owes
#[derive(Debug)]
pub struct RestoreResult {
    /// Claim holding the restored files
    pub volume_claim: String,
    /// Deletes the claim and the Restore; not yet run
    pub cleanup: Cleanup,
}

/// Drives one task through its phases
pub struct Orchestrator {
    client: Arc<dyn TaskClient>,
    task: RestoreTask,
    wait_timeout: Option<Duration>,
    restore_logs: bool,
}

impl Orchestrator {
    /// Create an orchestrator for `task`
    pub fn new(client: Arc<dyn TaskClient>, task: RestoreTask) -> Self {
        Self {
            client,
            task,
            wait_timeout: None,
            restore_logs: false,
        }
    }

    /// Bound the wait for the restore; unbounded by default
    pub fn with_wait_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.wait_timeout = timeout;
        self
    }

    /// Print the k8up job logs once the restore finished
    pub fn with_restore_logs(mut self, enabled: bool) -> Self {
        self.restore_logs = enabled;
        self
    }

    async fn fail(&self, resources: TaskResources, err: Error) -> Error {
        cleanup(self.client.as_ref(), &resources).await;
        err
    }

    /// Restore the backup into a new volume claim
    ///
    /// On failure everything created so far is deleted before the error is
    /// returned. On success the returned cleanup has not run.
    pub async fn restore_to_pvc(&self) -> Result<RestoreResult, Error> {
        let task = &self.task;
        info!(
            filter = %task.args.restore_filter,
            backup = %task.args.backup_id,
            task_key = %task.task_key,
            "Restoring from backup"
        );

        let claim = task.restore_claim_name();
        create_volume_claim(self.client.as_ref(), task, &claim, DEFAULT_CLAIM_SIZE).await?;
        let resources = TaskResources::claim(claim.clone());

        if let Err(e) = start_restore(self.client.as_ref(), task, &claim).await {
            return Err(self.fail(resources, e).await);
        }
        let resources = resources.with_restore(task.restore_name());

        if let Err(e) =
            wait_for_restore(self.client.as_ref(), &task.restore_name(), self.wait_timeout).await
        {
            return Err(self.fail(resources, e).await);
        }

        let restore = match self.client.get_restore(&task.restore_name()).await {
            Ok(restore) => restore,
            Err(e) => return Err(self.fail(resources, e).await),
        };

        if self.restore_logs {
            info!("====== Restore logs ======");
            if let Err(e) = print_restore_logs(self.client.as_ref(), &task.restore_name()).await {
                warn!(error = %e, "Failed to get logs");
            }
        }

        if let Err(e) = classify_restore(&restore).into_result() {
            return Err(self.fail(resources, e).await);
        }

        Ok(RestoreResult {
            volume_claim: claim,
            cleanup: Cleanup::new(self.client.clone(), resources),
        })
    }

    /// Run the restore, then the upload phase unless `runner` is `None`
    ///
    /// Cleanup of both phases always runs before this returns, the upload's
    /// first since its pod mounts the restore claim.
    pub async fn run(&self, runner: Option<&dyn UploadRunner>) -> Result<(), Error> {
        let restored = self.restore_to_pvc().await?;
        info!("Restore completed");

        if let Some(runner) = runner {
            info!("Starting upload");
            match runner.run(&self.task, &restored.volume_claim).await {
                Ok(upload_cleanup) => {
                    info!("Upload completed");
                    if let Some(upload_cleanup) = upload_cleanup {
                        upload_cleanup.run().await;
                    }
                }
                Err(e) => {
                    restored.cleanup.run().await;
                    return Err(e);
                }
            }
        }

        restored.cleanup.run().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockTaskClient;
    use crate::task::{TaskArgs, UploadEndpoints};
    use crate::upload::PodUploadRunner;
    use futures::{stream, StreamExt};
    use k8s_openapi::api::core::v1::{Pod, PodStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};
    use k8s_openapi::chrono::Utc;
    use restore_task_k8up::{Restore, RestoreSpec, RestoreStatus, Schedule, ScheduleSpec};

    fn task() -> RestoreTask {
        RestoreTask::new(
            TaskArgs {
                backup_id: "bk-1".to_string(),
                restore_filter: "/data/css".to_string(),
            },
            "project-main",
            Some("42".to_string()),
            UploadEndpoints {
                token_host: "ssh.lagoon.example.com".to_string(),
                token_port: "2020".to_string(),
                api_host: "https://api.lagoon.example.com".to_string(),
            },
            "0.3.0",
        )
    }

    fn condition(type_: &str, status: &str, reason: &str, message: &str) -> Condition {
        Condition {
            type_: type_.to_string(),
            status: status.to_string(),
            reason: reason.to_string(),
            message: message.to_string(),
            last_transition_time: Time(Utc::now()),
            observed_generation: None,
        }
    }

    fn restore_with(conditions: Vec<Condition>) -> Restore {
        let mut r = Restore::new("rft-42", RestoreSpec::default());
        r.status = Some(RestoreStatus {
            conditions,
            ..Default::default()
        });
        r
    }

    fn succeeded() -> Restore {
        restore_with(vec![
            condition("Ready", "True", "Ready", "resource is ready"),
            condition("Completed", "True", "Succeeded", "restore finished"),
        ])
    }

    fn snapshot_missing() -> Restore {
        restore_with(vec![condition(
            "Completed",
            "True",
            "Failed",
            "snapshot not found",
        )])
    }

    fn pod(phase: &str) -> Pod {
        Pod {
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Mock that restores successfully or reports `outcome` from k8up
    fn restoring_client(outcome: fn() -> Restore) -> MockTaskClient {
        let mut client = MockTaskClient::new();
        client
            .expect_create_pvc()
            .withf(|p| p.metadata.name.as_deref() == Some("restore-target-rft-42"))
            .times(1)
            .returning(|p| Ok(p.clone()));
        client.expect_get_schedule().returning(|name| {
            Ok(Schedule::new(
                name,
                ScheduleSpec {
                    backend: Some(serde_json::json!({"s3": {"bucket": "baas"}})),
                },
            ))
        });
        client
            .expect_create_restore()
            .times(1)
            .returning(|r| Ok(r.clone()));
        client
            .expect_watch_restore()
            .withf(|n| n == "rft-42")
            .times(1)
            .returning(move |_| Ok(stream::iter(vec![Ok(outcome())]).boxed()));
        client
            .expect_get_restore()
            .withf(|n| n == "rft-42")
            .times(1)
            .returning(move |_| Ok(outcome()));
        client
    }

    fn expect_restore_cleanup(client: &mut MockTaskClient) {
        client
            .expect_delete_restore()
            .withf(|n| n == "rft-42")
            .times(1)
            .returning(|_| Ok(()));
        client
            .expect_delete_pvc()
            .withf(|n| n == "restore-target-rft-42")
            .times(1)
            .returning(|_| Ok(()));
    }

    /// Story: a successful restore and upload leaves nothing behind
    #[tokio::test]
    async fn story_restore_and_upload_pod_clean_up_everything() {
        let mut client = restoring_client(succeeded);
        client
            .expect_create_pvc()
            .withf(|p| p.metadata.name.as_deref() == Some("archive-target-rft-42"))
            .times(1)
            .returning(|p| Ok(p.clone()));
        client.expect_create_pod().times(1).returning(|p| Ok(p.clone()));
        client
            .expect_watch_pod()
            .returning(|_| Ok(stream::iter(vec![Ok(pod("Succeeded"))]).boxed()));
        client
            .expect_get_pod()
            .withf(|n| n == "upload-rft-42")
            .returning(|_| Ok(Some(pod("Succeeded"))));
        client
            .expect_pod_logs()
            .returning(|_| Ok("Uploading archive to Lagoon task".to_string()));
        client
            .expect_delete_pod()
            .withf(|n| n == "upload-rft-42")
            .times(1)
            .returning(|_| Ok(()));
        client
            .expect_delete_pvc()
            .withf(|n| n == "archive-target-rft-42")
            .times(1)
            .returning(|_| Ok(()));
        expect_restore_cleanup(&mut client);

        let client: Arc<dyn TaskClient> = Arc::new(client);
        let runner = PodUploadRunner::new(
            client.clone(),
            None,
            Some("uselagoon/restore-files-task:v0.3.0".to_string()),
            "/restore",
            "/archive",
        );
        let orchestrator = Orchestrator::new(client, task());
        orchestrator.run(Some(&runner)).await.unwrap();
    }

    /// Story: k8up cannot find the snapshot, so nothing is uploaded
    #[tokio::test]
    async fn story_failed_restore_aborts_before_upload() {
        let mut client = restoring_client(snapshot_missing);
        client.expect_create_pod().never();
        client.expect_list_pods().never();
        expect_restore_cleanup(&mut client);

        let client: Arc<dyn TaskClient> = Arc::new(client);
        let runner = PodUploadRunner::new(
            client.clone(),
            None,
            Some("uselagoon/restore-files-task:v0.3.0".to_string()),
            "/restore",
            "/archive",
        );
        let err = Orchestrator::new(client, task())
            .run(Some(&runner))
            .await
            .unwrap_err();
        assert!(err.is_domain_failure());
        assert!(err.to_string().contains("snapshot not found"));
    }

    /// Story: with the bootstrap skipped only the restore resources exist
    #[tokio::test]
    async fn story_skip_bootstrap_never_creates_upload_pod() {
        let mut client = restoring_client(succeeded);
        client.expect_create_pod().never();
        expect_restore_cleanup(&mut client);

        Orchestrator::new(Arc::new(client), task())
            .run(None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_restore_to_pvc_defers_cleanup() {
        let mut client = restoring_client(succeeded);
        client.expect_delete_restore().never();
        client.expect_delete_pvc().never();

        let result = Orchestrator::new(Arc::new(client), task())
            .restore_to_pvc()
            .await
            .unwrap();
        assert_eq!(result.volume_claim, "restore-target-rft-42");
        assert_eq!(
            result.cleanup.resources(),
            &TaskResources::claim("restore-target-rft-42").with_restore("rft-42")
        );
    }

    #[tokio::test]
    async fn test_start_failure_cleans_up_claim_only() {
        let mut client = MockTaskClient::new();
        client.expect_create_pvc().returning(|p| Ok(p.clone()));
        client
            .expect_get_schedule()
            .returning(|_| Err(Error::internal("schedule not found")));
        client.expect_delete_restore().never();
        client
            .expect_delete_pvc()
            .withf(|n| n == "restore-target-rft-42")
            .times(1)
            .returning(|_| Ok(()));

        let err = Orchestrator::new(Arc::new(client), task())
            .restore_to_pvc()
            .await
            .unwrap_err();
        assert!(err.to_string().contains("schedule not found"));
    }

    #[tokio::test]
    async fn test_claim_failure_creates_nothing_else() {
        let mut client = MockTaskClient::new();
        client
            .expect_create_pvc()
            .returning(|_| Err(Error::internal("quota exceeded")));
        client.expect_get_schedule().never();
        client.expect_delete_pvc().never();

        assert!(Orchestrator::new(Arc::new(client), task())
            .restore_to_pvc()
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_watch_open_failure_cleans_up_claim_and_restore() {
        let mut client = MockTaskClient::new();
        client.expect_create_pvc().returning(|p| Ok(p.clone()));
        client
            .expect_get_schedule()
            .returning(|name| Ok(Schedule::new(name, ScheduleSpec::default())));
        client.expect_create_restore().returning(|r| Ok(r.clone()));
        client
            .expect_watch_restore()
            .returning(|_| Err(Error::internal("watch failed")));
        client.expect_get_restore().never();
        expect_restore_cleanup(&mut client);

        let err = Orchestrator::new(Arc::new(client), task())
            .restore_to_pvc()
            .await
            .unwrap_err();
        assert!(err.to_string().contains("watch failed"));
    }

    #[tokio::test]
    async fn test_watch_closed_early_is_classified_as_incomplete() {
        fn in_progress() -> Restore {
            restore_with(vec![condition("Ready", "True", "Ready", "resource is ready")])
        }
        let mut client = restoring_client(in_progress);
        expect_restore_cleanup(&mut client);

        let err = Orchestrator::new(Arc::new(client), task())
            .restore_to_pvc()
            .await
            .unwrap_err();
        assert!(err.is_domain_failure());
        assert!(err.to_string().contains("restore status"), "{err}");
    }

    #[tokio::test]
    async fn test_restore_wait_timeout_cleans_up() {
        let mut client = MockTaskClient::new();
        client.expect_create_pvc().returning(|p| Ok(p.clone()));
        client
            .expect_get_schedule()
            .returning(|name| Ok(Schedule::new(name, ScheduleSpec::default())));
        client.expect_create_restore().returning(|r| Ok(r.clone()));
        client
            .expect_watch_restore()
            .returning(|_| Ok(stream::pending().boxed()));
        expect_restore_cleanup(&mut client);

        let err = Orchestrator::new(Arc::new(client), task())
            .with_wait_timeout(Some(Duration::from_millis(20)))
            .restore_to_pvc()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_restore_logs_are_best_effort() {
        let mut client = restoring_client(succeeded);
        client
            .expect_list_pods()
            .withf(|n| n == "batch.kubernetes.io/job-name=restore-rft-42")
            .times(1)
            .returning(|_| Err(Error::internal("forbidden")));

        let result = Orchestrator::new(Arc::new(client), task())
            .with_restore_logs(true)
            .restore_to_pvc()
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_upload_failure_still_cleans_up_restore() {
        let mut client = restoring_client(succeeded);
        client.expect_get_pod().returning(|_| Ok(None));
        expect_restore_cleanup(&mut client);

        // No task image and no own pod: the runner fails before creating anything
        let client: Arc<dyn TaskClient> = Arc::new(client);
        let runner = PodUploadRunner::new(
            client.clone(),
            Some("lagoon-task-abc".to_string()),
            None,
            "/restore",
            "/archive",
        );
        let err = Orchestrator::new(client, task())
            .run(Some(&runner))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }
}
