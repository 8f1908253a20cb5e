//! Volume claims for restored files and archives

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    PersistentVolumeClaim, PersistentVolumeClaimSpec, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::core::ObjectMeta;
use tracing::info;

use restore_task_common::{
    Error, K8UP_BACKUP_ANNOTATION, K8UP_BACKUP_SKIP, LABEL_MANAGED_BY,
    LABEL_MANAGED_BY_RESTORE_TASK, LABEL_TASK_KEY,
};

use crate::client::TaskClient;
use crate::task::RestoreTask;

/// Storage class for task volumes
///
/// Bulk storage is NFS-backed in Lagoon clusters, so the requested size is
/// nominal. There is no way to know the restored size up front.
pub const STORAGE_CLASS: &str = "bulk";

/// Requested size of every task volume
pub const DEFAULT_CLAIM_SIZE: &str = "1Gi";

/// Labels put on every resource the task creates
pub fn task_labels(task: &RestoreTask) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_TASK_KEY.to_string(), task.task_key.clone()),
        (
            LABEL_MANAGED_BY.to_string(),
            LABEL_MANAGED_BY_RESTORE_TASK.to_string(),
        ),
    ])
}

/// Annotations that keep k8up from backing up a task resource
pub fn skip_backup_annotations() -> BTreeMap<String, String> {
    BTreeMap::from([(
        K8UP_BACKUP_ANNOTATION.to_string(),
        K8UP_BACKUP_SKIP.to_string(),
    )])
}

/// Build a task volume claim
pub fn build_volume_claim(task: &RestoreTask, name: &str, size: &str) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(task.namespace.clone()),
            labels: Some(task_labels(task)),
            annotations: Some(skip_backup_annotations()),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            storage_class_name: Some(STORAGE_CLASS.to_string()),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity(size.to_string()),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        status: None,
    }
}

/// Create a task volume claim without waiting for it to bind
///
/// The caller owns cleanup of anything created before a failure.
pub async fn create_volume_claim(
    client: &dyn TaskClient,
    task: &RestoreTask,
    name: &str,
    size: &str,
) -> Result<PersistentVolumeClaim, Error> {
    let pvc = build_volume_claim(task, name, size);
    let created = client.create_pvc(&pvc).await?;
    info!(pvc = %name, size = %size, "Created volume claim");
    Ok(created)
}
