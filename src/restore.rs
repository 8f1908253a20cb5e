//! k8up Restore driver
//!
//! Creates the Restore that writes a snapshot into the task's volume claim and
//! interprets its terminal status once the watch has ended.

use kube::core::ObjectMeta;
use tracing::{info, warn};

use restore_task_common::kube_utils::STATUS_TRUE;
use restore_task_common::Error;
use restore_task_k8up::{
    Restore, RestoreMethod, RestoreSpec, CONDITION_COMPLETED, CONDITION_READY,
    LAGOON_BACKUP_SCHEDULE, REASON_CREATION_FAILED, REASON_FAILED,
};

use crate::client::TaskClient;
use crate::provision::task_labels;
use crate::task::RestoreTask;

/// k8up never re-runs or keeps more than one job for a task restore
const JOB_HISTORY_LIMIT: i32 = 1;

/// Terminal state of a Restore
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// Completed condition is true
    Succeeded,
    /// k8up could not create the restore job
    CreationFailed(String),
    /// The restore job failed; carries the Completed message
    Failed(String),
    /// No Completed condition; carries the raw status for diagnosis
    Incomplete(String),
}

impl RestoreOutcome {
    /// Convert a failed outcome into the error surfaced to the caller
    pub fn into_result(self) -> Result<(), Error> {
        match self {
            RestoreOutcome::Succeeded => Ok(()),
            RestoreOutcome::CreationFailed(msg)
            | RestoreOutcome::Failed(msg)
            | RestoreOutcome::Incomplete(msg) => Err(Error::restore_failed(msg)),
        }
    }
}

/// Build the Restore for a task, restoring into `claim_name`
///
/// `backend` is the restic backend copied from the namespace's Schedule.
pub fn build_restore(
    task: &RestoreTask,
    claim_name: &str,
    backend: Option<serde_json::Value>,
) -> Restore {
    Restore {
        metadata: ObjectMeta {
            name: Some(task.restore_name()),
            namespace: Some(task.namespace.clone()),
            labels: Some(task_labels(task)),
            ..Default::default()
        },
        spec: RestoreSpec {
            backend,
            snapshot: task.args.backup_id.clone(),
            restore_filter: task.args.restore_filter.clone(),
            restore_method: Some(RestoreMethod::folder(claim_name)),
            keep_jobs: Some(JOB_HISTORY_LIMIT),
            failed_jobs_history_limit: Some(JOB_HISTORY_LIMIT),
            successful_jobs_history_limit: None,
        },
        status: None,
    }
}

/// Create the task's Restore against a volume claim
///
/// The Lagoon backup Schedule must exist in the namespace; its backend is the
/// only thing read from it.
pub async fn start_restore(
    client: &dyn TaskClient,
    task: &RestoreTask,
    claim_name: &str,
) -> Result<Restore, Error> {
    let schedule = client.get_schedule(LAGOON_BACKUP_SCHEDULE).await?;
    let restore = build_restore(task, claim_name, schedule.spec.backend);
    let created = client.create_restore(&restore).await?;
    info!(
        restore = %task.restore_name(),
        snapshot = %task.args.backup_id,
        filter = %task.args.restore_filter,
        "Starting restore"
    );
    Ok(created)
}

/// Classify a Restore's status after the watch ended
///
/// Checked in order: Ready with reason CreationFailed, a missing Completed
/// condition, Completed with reason Failed. Anything else is success.
pub fn classify_restore(restore: &Restore) -> RestoreOutcome {
    if let Some(ready) = restore.condition(CONDITION_READY) {
        if ready.reason == REASON_CREATION_FAILED {
            return RestoreOutcome::CreationFailed(ready.message.clone());
        }
    }

    let Some(completed) = restore.condition(CONDITION_COMPLETED) else {
        let status = restore
            .status
            .as_ref()
            .map(|s| serde_json::to_string(s).unwrap_or_else(|e| e.to_string()))
            .unwrap_or_else(|| "{}".to_string());
        return RestoreOutcome::Incomplete(format!("restore status: {}", status));
    };

    if completed.reason == REASON_FAILED {
        return RestoreOutcome::Failed(completed.message.clone());
    }
    if completed.status != STATUS_TRUE {
        warn!(
            reason = %completed.reason,
            status = %completed.status,
            "Completed condition is not true, treating restore as finished"
        );
    }
    RestoreOutcome::Succeeded
}

/// Label selector of the pods k8up runs for a Restore
pub fn restore_job_selector(restore_name: &str) -> String {
    format!("batch.kubernetes.io/job-name=restore-{}", restore_name)
}

/// Print the logs of the pods that ran a restore
///
/// The logs expose the backup webhook URL, so this only runs on request.
pub async fn print_restore_logs(client: &dyn TaskClient, restore_name: &str) -> Result<(), Error> {
    let pods = client.list_pods(&restore_job_selector(restore_name)).await?;
    if pods.is_empty() {
        return Err(Error::internal_with_context(
            "restore logs",
            format!("no restore pods found for {}", restore_name),
        ));
    }

    for pod in pods {
        match client.pod_logs(&pod).await {
            Ok(logs) => println!("{}", logs.trim_end()),
            Err(e) => warn!(pod = %pod, error = %e, "Failed to get restore logs"),
        }
    }
    Ok(())
}
